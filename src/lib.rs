/// OMNIGUARD
///
/// Cross-chain supply integrity guard. Assembles the supply oracle and the
/// transfer router into one `BridgeSystem`:
/// - Threshold-signed supply consensus with reconciliation against the ledger
/// - A single circuit breaker gating every new transfer
/// - Multi-protocol routing with one replay guard across all protocols
/// - Composite-keyed state export in JSON and bincode

pub mod error;
pub mod persistence;
pub mod system;

pub use error::SystemError;
pub use persistence::{CompositeKey, ProtocolEntry, RouteKey, StateExport, TransferKey};
pub use system::{BridgeSystem, SystemStatus};

pub use omniguard_core::{
    logging, AccessControl, AccountId, BridgeEvent, ChainId, Clock, ErrorCategory, EventLog,
    EventSink, InMemoryLedger, Ledger, ManualClock, ProtocolId, ReporterId, Role, Settings,
    SystemClock, TransferId,
};
pub use omniguard_oracle::{
    BatchEntry, BatchSupplyReport, BreakerStatus, ChainSupplyRecord, CircuitBreaker,
    GlobalSupplySnapshot, OracleError, ReportOutcome, SupplyConsensusEngine, SupplyReport,
    TripReason,
};
pub use omniguard_router::{
    BridgeModule, BridgeReceipt, ChainRoute, FeeParameters, LegSpec, MultiLegStatus,
    ProtocolKind, RoutePreference, RouterError, ScriptedAdapter, TransferPayload, TransferRecord,
    TransferRequest, TransferStatus,
};

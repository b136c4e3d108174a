/// OMNIGUARD CORE
///
/// Shared vocabulary for the cross-chain supply guard and transfer router:
/// - Identifiers (chains, protocols, accounts, reporters, canonical transfer ids)
/// - The ledger capability consumed by the router and the oracle
/// - Time, events, role-based access control
/// - Runtime settings and the shared error taxonomy

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod types;

pub use access::{AccessControl, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, ConsensusSettings, ReconciliationSettings, RouterSettings, Settings,
    TwoPhaseSettings,
};
pub use error::{AuthorizationError, CoreError, ErrorCategory, LedgerError};
pub use events::{BridgeEvent, EventLog, EventRecord, EventSink};
pub use ledger::{InMemoryLedger, Ledger};
pub use types::{AccountId, ChainId, ProtocolId, ReporterId, TransferId};

/// OMNIGUARD TRANSFER ROUTER
///
/// Moves value between chains over competing transport protocols:
/// - Registry of protocol adapters with per-chain trusted peers and fee parameters
/// - TTL fee quote cache and a pure route selector
/// - Lock-and-release orchestrator with a replay guard shared across protocols
/// - Optional all-or-nothing two-phase coordinator for multi-leg transfers

pub mod adapter;
pub mod error;
pub mod fee_cache;
pub mod orchestrator;
pub mod protocol_registry;
pub mod replay_guard;
pub mod route_selector;
pub mod transfer;
pub mod two_phase;
pub mod unit_of_work;

pub use adapter::{BridgeModule, OutboundMessage, ProtocolKind, ScriptedAdapter, SendHandle};
pub use error::{AdapterError, RouterError};
pub use fee_cache::{FeeQuote, FeeQuoteCache};
pub use orchestrator::{BridgeReceipt, TransferOrchestrator, TransferRequest};
pub use protocol_registry::{
    BridgeOption, ChainRoute, FeeParameters, ProtocolDescriptor, ProtocolRegistry,
};
pub use replay_guard::{ReplayEntry, ReplayGuard};
pub use route_selector::{select_route, RouteCandidate, RoutePreference};
pub use transfer::{TransferDirection, TransferPayload, TransferRecord, TransferStatus};
pub use two_phase::{LegSpec, LegState, MultiLegStatus, MultiLegTransaction, TwoPhaseCoordinator};
pub use unit_of_work::UnitOfWork;

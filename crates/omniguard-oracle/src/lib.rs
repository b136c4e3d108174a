/// OMNIGUARD SUPPLY ORACLE
///
/// Threshold agreement over signed supply observations from untrusted reporters:
/// - Reports are signed (Ed25519) over a canonical SHA-256 digest
/// - Accepted reports accumulate per (chain, nonce) until a quorum matches
/// - Committed records are reconciled against the ledger's canonical supply
/// - Deviation or corrupted state trips the global circuit breaker

pub mod accumulator;
pub mod circuit_breaker;
pub mod error;
pub mod reconciliation;
pub mod report;
pub mod reporter_registry;
pub mod supply_consensus;

pub use accumulator::{ChainValue, Observation, PendingRound, RoundVerdict};
pub use circuit_breaker::{BreakerStatus, CircuitBreaker, TripReason};
pub use error::OracleError;
pub use reconciliation::{reconcile_records, GlobalSupplySnapshot, SnapshotHistory};
pub use report::{BatchEntry, BatchSupplyReport, SupplyReport};
pub use reporter_registry::{ReporterRecord, ReporterRegistry};
pub use supply_consensus::{ChainSupplyRecord, ReportOutcome, SupplyConsensusEngine, SuspectEntry};

use omniguard_core::{
    AuthorizationError, ChainId, ErrorCategory, LedgerError, ProtocolId, TransferId,
};
use thiserror::Error;

use crate::transfer::TransferStatus;

/// Failure reported by a transport adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        AdapterError(reason.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouterError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Unknown protocol {0}")]
    UnknownProtocol(ProtocolId),
    #[error("Protocol {0} already registered")]
    ProtocolAlreadyRegistered(ProtocolId),
    #[error("Protocol {0} is disabled")]
    ProtocolDisabled(ProtocolId),
    #[error("Protocol {protocol} does not support chain {chain}")]
    UnsupportedChain { protocol: ProtocolId, chain: ChainId },
    #[error("Invalid fee parameters: {0}")]
    InvalidFeeParameters(String),
    #[error("Bridge is paused: {0}")]
    BridgePaused(String),
    #[error("No available route to chain {0}")]
    NoAvailableRoute(ChainId),
    #[error("Fee {fee} exceeds budget {budget}")]
    FeeBudgetExceeded { fee: u128, budget: u128 },
    #[error("Adapter {protocol} failed: {reason}")]
    AdapterFailure { protocol: ProtocolId, reason: String },
    #[error("Duplicate transfer {0} detected")]
    DuplicateTransferDetected(TransferId),
    #[error("Delivery from untrusted source via {protocol} on chain {chain}")]
    UntrustedSource { protocol: ProtocolId, chain: ChainId },
    #[error("Transfer destined for chain {actual}, local chain is {expected}")]
    WrongDestination { expected: ChainId, actual: ChainId },
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("Transfer {transfer_id} is {status:?}, expected Pending")]
    NotPending {
        transfer_id: TransferId,
        status: TransferStatus,
    },
    #[error("Transfer {0} is already being resolved")]
    ResolutionInProgress(TransferId),
    #[error("Transfer {transfer_id} does not expire before {expires_at}")]
    NotExpired { transfer_id: TransferId, expires_at: u64 },
    #[error("Unknown multi-leg transaction {0}")]
    UnknownMultiLeg(TransferId),
    #[error("Invalid multi-leg operation: {0}")]
    MultiLegState(String),
    #[error("Deadline {deadline} has passed (now {now})")]
    DeadlinePassed { deadline: u64, now: u64 },
    #[error("Compensation failed, state may be inconsistent: {0}")]
    IntegrityBreach(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

impl RouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RouterError::InvalidAmount(_)
            | RouterError::InvalidRecipient(_)
            | RouterError::UnknownProtocol(_)
            | RouterError::ProtocolAlreadyRegistered(_)
            | RouterError::ProtocolDisabled(_)
            | RouterError::UnsupportedChain { .. }
            | RouterError::InvalidFeeParameters(_)
            | RouterError::NoAvailableRoute(_)
            | RouterError::FeeBudgetExceeded { .. }
            | RouterError::WrongDestination { .. }
            | RouterError::MalformedPayload(_)
            | RouterError::UnknownTransfer(_)
            | RouterError::UnknownMultiLeg(_) => ErrorCategory::Validation,
            RouterError::UntrustedSource { .. } | RouterError::Authorization(_) => {
                ErrorCategory::Authorization
            }
            RouterError::DuplicateTransferDetected(_) => ErrorCategory::Replay,
            RouterError::AdapterFailure { .. } => ErrorCategory::AdapterFailure,
            RouterError::IntegrityBreach(_) => ErrorCategory::IntegrityBreach,
            RouterError::Ledger(_) => ErrorCategory::Ledger,
            RouterError::BridgePaused(_)
            | RouterError::NotPending { .. }
            | RouterError::ResolutionInProgress(_)
            | RouterError::NotExpired { .. }
            | RouterError::MultiLegState(_)
            | RouterError::DeadlinePassed { .. } => ErrorCategory::State,
        }
    }

    pub(crate) fn adapter(protocol: &ProtocolId, err: AdapterError) -> Self {
        RouterError::AdapterFailure {
            protocol: protocol.clone(),
            reason: err.0,
        }
    }
}

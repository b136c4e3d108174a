use omniguard_core::{AuthorizationError, ChainId, ErrorCategory, ReporterId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("Invalid report: {0}")]
    InvalidReport(String),
    #[error("Reporter {0} is not authorized")]
    UnauthorizedReporter(ReporterId),
    #[error("Reporter {0} already registered")]
    ReporterAlreadyRegistered(ReporterId),
    #[error("Invalid signature from reporter {0}")]
    InvalidSignature(ReporterId),
    #[error("Report timestamp {timestamp} is too far ahead of now ({now})")]
    FutureTimestamp { timestamp: u64, now: u64 },
    #[error("Report timestamp {timestamp} is outside the freshness window (now {now})")]
    ExpiredReport { timestamp: u64, now: u64 },
    #[error("Nonce {nonce} already used for chain {chain}")]
    ReplayedNonce { chain: ChainId, nonce: u64 },
    #[error("Nonce {nonce} for chain {chain} is below the last accepted nonce {last}")]
    StaleNonce { chain: ChainId, nonce: u64, last: u64 },
    #[error("Supply integrity breach: {0}")]
    IntegrityBreach(String),
    #[error("Operation requires a tripped circuit breaker")]
    BreakerNotTripped,
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

impl OracleError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OracleError::InvalidReport(_)
            | OracleError::ReporterAlreadyRegistered(_)
            | OracleError::FutureTimestamp { .. } => ErrorCategory::Validation,
            OracleError::UnauthorizedReporter(_)
            | OracleError::InvalidSignature(_)
            | OracleError::Authorization(_) => ErrorCategory::Authorization,
            OracleError::ExpiredReport { .. }
            | OracleError::ReplayedNonce { .. }
            | OracleError::StaleNonce { .. } => ErrorCategory::Replay,
            OracleError::IntegrityBreach(_) => ErrorCategory::IntegrityBreach,
            OracleError::BreakerNotTripped => ErrorCategory::State,
        }
    }

    /// Rejections that may indicate an adversarial reporter
    pub fn is_possible_attack(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Replay | ErrorCategory::Authorization
        )
    }
}

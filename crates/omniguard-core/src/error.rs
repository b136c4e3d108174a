use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::Role;
use crate::types::AccountId;

/// Error taxonomy shared by every omniguard crate.
///
/// Callers branch on the category, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad input, rejected synchronously with no state change
    Validation,
    /// Caller lacks the capability for the operation
    Authorization,
    /// Stale or reused nonce, duplicate transfer id (potential attack)
    Replay,
    /// Supply deviation or corrupted invariant; mutation paths fail closed
    IntegrityBreach,
    /// A transport adapter failed
    AdapterFailure,
    /// The ledger capability refused a debit/credit
    Ledger,
    /// Operation not valid in the current lifecycle state
    State,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Authorization => "AUTHORIZATION",
            ErrorCategory::Replay => "REPLAY",
            ErrorCategory::IntegrityBreach => "INTEGRITY_BREACH",
            ErrorCategory::AdapterFailure => "ADAPTER_FAILURE",
            ErrorCategory::Ledger => "LEDGER",
            ErrorCategory::State => "STATE",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance in {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        available: u128,
        requested: u128,
    },
    #[error("Balance overflow in {0}")]
    Overflow(AccountId),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Ledger
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("{caller} lacks role {required:?}")]
    MissingRole { caller: AccountId, required: Role },
    #[error("{caller} lacks any of roles {required:?}")]
    MissingAnyRole {
        caller: AccountId,
        required: Vec<Role>,
    },
}

impl AuthorizationError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Authorization
    }
}

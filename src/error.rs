use thiserror::Error;

use omniguard_core::{AuthorizationError, ConfigError, CoreError, ErrorCategory};
use omniguard_oracle::OracleError;
use omniguard_router::RouterError;

/// Top-level error for the assembled bridge system
#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("State import rejected: {0}")]
    Import(String),
}

impl SystemError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SystemError::Config(_) | SystemError::Import(_) => ErrorCategory::Validation,
            SystemError::Core(e) => e.category(),
            SystemError::Authorization(e) => e.category(),
            SystemError::Oracle(e) => e.category(),
            SystemError::Router(e) => e.category(),
        }
    }
}

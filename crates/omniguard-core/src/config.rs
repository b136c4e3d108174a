// RUNTIME SETTINGS
// Tolerances, windows, TTLs and deadlines are configuration, never constants.
//
// Precedence: built-in defaults <- TOML file <- OMNIGUARD__SECTION__KEY env vars

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{AccountId, ChainId};

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["omniguard.toml", "config/omniguard.toml"];

pub const ENV_PREFIX: &str = "OMNIGUARD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Threshold consensus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// M: distinct matching reporters needed to commit
    pub quorum: usize,
    /// ε: max absolute difference for two reports to "match"
    pub value_tolerance: u64,
    /// Reports older than this (relative to now) are expired
    pub freshness_window_secs: u64,
    /// Reports stamped further than this into the future are rejected
    pub max_future_skew_secs: u64,
    /// 0 disables commit-triggered reconciliation
    pub reconciliation_interval_secs: u64,
    /// Number of past global snapshots retained
    pub snapshot_history: usize,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        ConsensusSettings {
            quorum: 3,
            value_tolerance: 0,
            freshness_window_secs: 3_600,
            max_future_skew_secs: 300,
            reconciliation_interval_secs: 0,
            snapshot_history: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// Max |expected - actual| before the breaker trips
    pub deviation_tolerance: u64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            deviation_tolerance: 50_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub local_chain_id: u64,
    /// Holds outbound funds until delivery is released or refunded
    pub escrow_account: String,
    pub fee_collector: String,
    pub fee_quote_ttl_secs: u64,
    /// Width of the amount bucket used in fee cache keys
    pub amount_bucket_size: u64,
    /// Pending transfers older than this may be rolled back
    pub transfer_timeout_secs: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        RouterSettings {
            local_chain_id: 1,
            escrow_account: "omniguard:escrow".to_string(),
            fee_collector: "omniguard:fees".to_string(),
            fee_quote_ttl_secs: 30,
            amount_bucket_size: 1_000_000,
            transfer_timeout_secs: 86_400,
        }
    }
}

impl RouterSettings {
    pub fn local_chain(&self) -> ChainId {
        ChainId(self.local_chain_id)
    }

    pub fn escrow(&self) -> AccountId {
        AccountId::new(self.escrow_account.clone())
    }

    pub fn collector(&self) -> AccountId {
        AccountId::new(self.fee_collector.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoPhaseSettings {
    pub deadline_secs: u64,
    pub max_legs: usize,
}

impl Default for TwoPhaseSettings {
    fn default() -> Self {
        TwoPhaseSettings {
            deadline_secs: 300,
            max_legs: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub consensus: ConsensusSettings,
    pub reconciliation: ReconciliationSettings,
    pub router: RouterSettings,
    pub two_phase: TwoPhaseSettings,
}

impl Settings {
    /// Load from an explicit path or the first default path that exists,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect(),
        };

        let mut builder = Config::builder();
        if let Some(found) = candidates.iter().find(|p| p.exists()) {
            builder = builder.add_source(File::from(found.as_path()).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from an embedded TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consensus.quorum == 0 {
            return Err(ConfigError::Invalid {
                field: "consensus.quorum",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.consensus.freshness_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "consensus.freshness_window_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.consensus.snapshot_history == 0 {
            return Err(ConfigError::Invalid {
                field: "consensus.snapshot_history",
                reason: "must retain at least one snapshot".to_string(),
            });
        }
        if self.router.amount_bucket_size == 0 {
            return Err(ConfigError::Invalid {
                field: "router.amount_bucket_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.router.escrow_account.trim().is_empty() || self.router.fee_collector.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "router.escrow_account",
                reason: "escrow and fee collector accounts must be named".to_string(),
            });
        }
        if self.router.escrow_account == self.router.fee_collector {
            return Err(ConfigError::Invalid {
                field: "router.fee_collector",
                reason: "must differ from the escrow account".to_string(),
            });
        }
        if self.two_phase.deadline_secs == 0 || self.two_phase.max_legs == 0 {
            return Err(ConfigError::Invalid {
                field: "two_phase",
                reason: "deadline and max_legs must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// REPORTER REGISTRY
// Authorized supply reporters, their verifying keys and per-chain nonce progress.
//
// SAFETY INVARIANTS:
// 1. Only registered, non-revoked reporters can contribute to a quorum
// 2. A reporter's accepted nonce per chain is strictly increasing
// 3. Revocation keeps the record (counters and nonces stay auditable)

use ed25519_dalek::VerifyingKey;
use log::info;
use std::collections::BTreeMap;

use omniguard_core::{ChainId, ReporterId};

use crate::error::OracleError;

/// Registered reporter with activity counters
#[derive(Debug, Clone)]
pub struct ReporterRecord {
    pub reporter_id: ReporterId,
    pub verifying_key: VerifyingKey,
    pub active: bool,
    pub reports_accepted: u64,
    pub reports_rejected: u64,
    /// Reports that disagreed with a committed majority
    pub suspect_reports: u64,
    last_nonce: BTreeMap<ChainId, u64>,
}

impl ReporterRecord {
    fn new(reporter_id: ReporterId, verifying_key: VerifyingKey) -> Self {
        ReporterRecord {
            reporter_id,
            verifying_key,
            active: true,
            reports_accepted: 0,
            reports_rejected: 0,
            suspect_reports: 0,
            last_nonce: BTreeMap::new(),
        }
    }

    pub fn last_nonce(&self, chain: ChainId) -> Option<u64> {
        self.last_nonce.get(&chain).copied()
    }
}

#[derive(Debug, Default)]
pub struct ReporterRegistry {
    reporters: BTreeMap<ReporterId, ReporterRecord>,
}

impl ReporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter, or re-activate a revoked one with a fresh key.
    pub fn authorize(&mut self, id: ReporterId, key: VerifyingKey) -> Result<(), OracleError> {
        match self.reporters.get_mut(&id) {
            Some(record) if record.active => Err(OracleError::ReporterAlreadyRegistered(id)),
            Some(record) => {
                record.verifying_key = key;
                record.active = true;
                info!("Reporter {} re-authorized", id);
                Ok(())
            }
            None => {
                info!("Reporter {} authorized", id);
                self.reporters.insert(id.clone(), ReporterRecord::new(id, key));
                Ok(())
            }
        }
    }

    /// Returns whether the reporter was active
    pub fn revoke(&mut self, id: &ReporterId) -> bool {
        match self.reporters.get_mut(id) {
            Some(record) if record.active => {
                record.active = false;
                info!("Reporter {} revoked", id);
                true
            }
            _ => false,
        }
    }

    /// Verifying key of an active reporter
    pub fn active_key(&self, id: &ReporterId) -> Result<VerifyingKey, OracleError> {
        self.reporters
            .get(id)
            .filter(|r| r.active)
            .map(|r| r.verifying_key)
            .ok_or_else(|| OracleError::UnauthorizedReporter(id.clone()))
    }

    pub fn is_active(&self, id: &ReporterId) -> bool {
        self.reporters.get(id).map(|r| r.active).unwrap_or(false)
    }

    /// Reject a nonce that is not strictly above the reporter's last nonce for `chain`
    pub fn check_nonce(&self, id: &ReporterId, chain: ChainId, nonce: u64) -> Result<(), OracleError> {
        match self.reporters.get(id).and_then(|r| r.last_nonce(chain)) {
            Some(last) if nonce <= last => Err(OracleError::StaleNonce { chain, nonce, last }),
            _ => Ok(()),
        }
    }

    pub fn record_accepted(&mut self, id: &ReporterId, chain: ChainId, nonce: u64) {
        if let Some(record) = self.reporters.get_mut(id) {
            record.reports_accepted += 1;
            let last = record.last_nonce.entry(chain).or_insert(nonce);
            *last = (*last).max(nonce);
        }
    }

    pub fn record_rejected(&mut self, id: &ReporterId) {
        if let Some(record) = self.reporters.get_mut(id) {
            record.reports_rejected += 1;
        }
    }

    pub fn record_suspect(&mut self, id: &ReporterId) {
        if let Some(record) = self.reporters.get_mut(id) {
            record.suspect_reports += 1;
        }
    }

    pub fn get(&self, id: &ReporterId) -> Option<&ReporterRecord> {
        self.reporters.get(id)
    }

    pub fn active_count(&self) -> usize {
        self.reporters.values().filter(|r| r.active).count()
    }
}

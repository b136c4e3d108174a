/// GLOBAL SUPPLY RECONCILIATION
///
/// Compares the sum of committed per-chain circulating supply against the
/// canonical supply held by the ledger. Snapshots are hash-committed so an
/// exported history can be checked for tampering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::error::OracleError;
use crate::supply_consensus::ChainSupplyRecord;

const SNAPSHOT_DOMAIN: &[u8] = b"omniguard.supply-snapshot.v1";

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSupplySnapshot {
    /// Canonical supply from the ledger
    pub expected_supply: u128,
    /// Σ(total - locked) over committed chain records
    pub actual_supply: u128,
    /// |expected - actual|
    pub deviation: u128,
    pub healthy: bool,
    pub timestamp: u64,
    pub chain_count: u32,
    pub snapshot_hash: Vec<u8>,
}

impl GlobalSupplySnapshot {
    pub fn compute_hash(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(SNAPSHOT_DOMAIN);
        hasher.update(self.expected_supply.to_le_bytes());
        hasher.update(self.actual_supply.to_le_bytes());
        hasher.update(self.deviation.to_le_bytes());
        hasher.update([self.healthy as u8]);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.chain_count.to_le_bytes());
        hasher.finalize().to_vec()
    }

    pub fn verify(&self) -> Result<(), OracleError> {
        if self.compute_hash() != self.snapshot_hash {
            return Err(OracleError::IntegrityBreach(
                "snapshot hash mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pure reconciliation over committed records.
///
/// Fails closed when any record has locked > total, or when the circulating
/// sum overflows.
pub fn reconcile_records<'a, I>(
    records: I,
    expected_supply: u128,
    tolerance: u128,
    timestamp: u64,
) -> Result<GlobalSupplySnapshot, OracleError>
where
    I: IntoIterator<Item = &'a ChainSupplyRecord>,
{
    let mut actual: u128 = 0;
    let mut chain_count: u32 = 0;

    for record in records {
        let circulating = record
            .total_supply
            .checked_sub(record.locked_supply)
            .ok_or_else(|| {
                OracleError::IntegrityBreach(format!(
                    "chain {} locked supply {} exceeds total supply {}",
                    record.chain_id, record.locked_supply, record.total_supply
                ))
            })?;
        actual = actual.checked_add(circulating).ok_or_else(|| {
            OracleError::IntegrityBreach("circulating supply overflow".to_string())
        })?;
        chain_count += 1;
    }

    let deviation = expected_supply.abs_diff(actual);
    let mut snapshot = GlobalSupplySnapshot {
        expected_supply,
        actual_supply: actual,
        deviation,
        healthy: deviation <= tolerance,
        timestamp,
        chain_count,
        snapshot_hash: vec![],
    };
    snapshot.snapshot_hash = snapshot.compute_hash();
    Ok(snapshot)
}

/// Bounded ring of past snapshots, oldest first
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    snapshots: VecDeque<GlobalSupplySnapshot>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        SnapshotHistory {
            capacity: capacity.max(1),
            snapshots: VecDeque::new(),
        }
    }

    pub fn push(&mut self, snapshot: GlobalSupplySnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&GlobalSupplySnapshot> {
        self.snapshots.back()
    }

    pub fn to_vec(&self) -> Vec<GlobalSupplySnapshot> {
        self.snapshots.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

// CROSS-PROTOCOL REPLAY GUARD
// One deduplication table shared by every protocol.
//
// SAFETY INVARIANTS:
// 1. A transfer id is executed at most once system-wide, whichever protocol delivers it
// 2. An id claimed by one protocol cannot be delivered through another
// 3. A revoked id (refunded transfer) can never be executed
// 4. Check-and-set happens under one lock, so two racing deliveries cannot both pass

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use omniguard_core::{ProtocolId, TransferId};

use crate::error::RouterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayEntry {
    /// Initiated outbound through `protocol`, not yet resolved
    Claimed { protocol: ProtocolId },
    /// Delivered or acknowledged through `protocol`
    Executed { protocol: ProtocolId },
    /// Refunded; must never be delivered
    Revoked,
}

#[derive(Debug, Default)]
pub struct ReplayGuard {
    entries: Mutex<BTreeMap<TransferId, ReplayEntry>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a fresh id for an outbound transfer
    pub fn reserve(&self, id: TransferId, protocol: &ProtocolId) -> Result<(), RouterError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            warn!("Transfer id {} already known (possible attack)", id.short());
            return Err(RouterError::DuplicateTransferDetected(id));
        }
        entries.insert(
            id,
            ReplayEntry::Claimed {
                protocol: protocol.clone(),
            },
        );
        Ok(())
    }

    /// Undo a reservation whose transfer never left (rollback only)
    pub fn release(&self, id: &TransferId) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(id), Some(ReplayEntry::Claimed { .. })) {
            entries.remove(id);
        }
    }

    /// Would a delivery of `id` through `protocol` be accepted?
    pub fn check_delivery(&self, id: &TransferId, protocol: &ProtocolId) -> Result<(), RouterError> {
        Self::admissible(self.entries.lock().get(id), id, protocol)
    }

    /// Atomically check and mark an inbound delivery executed.
    /// Returns the entry it replaced so a failed release can restore it.
    pub fn execute_delivery(
        &self,
        id: TransferId,
        protocol: &ProtocolId,
    ) -> Result<Option<ReplayEntry>, RouterError> {
        let mut entries = self.entries.lock();
        Self::admissible(entries.get(&id), &id, protocol)?;
        Ok(entries.insert(
            id,
            ReplayEntry::Executed {
                protocol: protocol.clone(),
            },
        ))
    }

    /// Outbound completion: Claimed -> Executed by the same protocol
    pub fn confirm(&self, id: &TransferId) -> Result<(), RouterError> {
        let mut entries = self.entries.lock();
        match entries.get(id).cloned() {
            Some(ReplayEntry::Claimed { protocol }) => {
                entries.insert(*id, ReplayEntry::Executed { protocol });
                Ok(())
            }
            _ => Err(RouterError::DuplicateTransferDetected(*id)),
        }
    }

    /// Permanently block an id; returns the previous entry
    pub fn revoke(&self, id: TransferId) -> Option<ReplayEntry> {
        self.entries.lock().insert(id, ReplayEntry::Revoked)
    }

    /// Put back an entry replaced by `execute_delivery` or `revoke`
    pub fn restore_entry(&self, id: TransferId, previous: Option<ReplayEntry>) {
        let mut entries = self.entries.lock();
        match previous {
            Some(entry) => {
                entries.insert(id, entry);
            }
            None => {
                entries.remove(&id);
            }
        }
    }

    pub fn entry(&self, id: &TransferId) -> Option<ReplayEntry> {
        self.entries.lock().get(id).cloned()
    }

    pub fn entries(&self) -> BTreeMap<TransferId, ReplayEntry> {
        self.entries.lock().clone()
    }

    pub fn restore(&self, entries: BTreeMap<TransferId, ReplayEntry>) {
        *self.entries.lock() = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn admissible(
        entry: Option<&ReplayEntry>,
        id: &TransferId,
        protocol: &ProtocolId,
    ) -> Result<(), RouterError> {
        match entry {
            None => Ok(()),
            Some(ReplayEntry::Claimed { protocol: owner }) if owner == protocol => Ok(()),
            Some(_) => Err(RouterError::DuplicateTransferDetected(*id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> TransferId {
        TransferId([n; 32])
    }

    #[test]
    fn test_second_protocol_cannot_deliver_claimed_id() {
        let guard = ReplayGuard::new();
        let p1 = ProtocolId::new("p1");
        let p2 = ProtocolId::new("p2");
        guard.reserve(id(1), &p1).unwrap();

        assert!(matches!(
            guard.check_delivery(&id(1), &p2),
            Err(RouterError::DuplicateTransferDetected(_))
        ));
        assert!(guard.check_delivery(&id(1), &p1).is_ok());
    }

    #[test]
    fn test_executed_once_across_protocols() {
        let guard = ReplayGuard::new();
        let p1 = ProtocolId::new("p1");
        let p2 = ProtocolId::new("p2");

        assert_eq!(guard.execute_delivery(id(2), &p2).unwrap(), None);
        assert!(guard.execute_delivery(id(2), &p1).is_err());
        assert!(guard.execute_delivery(id(2), &p2).is_err());
        assert!(guard.reserve(id(2), &p1).is_err());
    }

    #[test]
    fn test_revoked_id_is_never_delivered() {
        let guard = ReplayGuard::new();
        let p1 = ProtocolId::new("p1");
        guard.reserve(id(3), &p1).unwrap();
        guard.revoke(id(3));

        assert!(guard.check_delivery(&id(3), &p1).is_err());
        assert!(guard.confirm(&id(3)).is_err());
    }

    #[test]
    fn test_release_only_drops_claims() {
        let guard = ReplayGuard::new();
        let p1 = ProtocolId::new("p1");
        guard.reserve(id(4), &p1).unwrap();
        guard.release(&id(4));
        assert!(guard.is_empty());

        guard.execute_delivery(id(5), &p1).unwrap();
        guard.release(&id(5));
        assert_eq!(guard.entry(&id(5)), Some(ReplayEntry::Executed { protocol: p1 }));
    }
}

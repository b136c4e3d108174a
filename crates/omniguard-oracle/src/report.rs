/// SIGNED SUPPLY OBSERVATIONS
///
/// Reporters sign a canonical digest of what they observed on a chain.
/// Single-chain reports and multi-chain batches use distinct domain separators
/// so a signature for one can never be replayed as the other.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use omniguard_core::types::update_prefixed;
use omniguard_core::{ChainId, ReporterId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::OracleError;

const REPORT_DOMAIN: &[u8] = b"omniguard.supply-report.v1";
const BATCH_DOMAIN: &[u8] = b"omniguard.supply-batch.v1";

/// One reporter's observation of one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReport {
    pub reporter_id: ReporterId,
    pub chain_id: ChainId,
    pub total_supply: u128,
    pub locked_supply: u128,
    pub nonce: u64,
    /// Observation time (UNIX seconds)
    pub timestamp: u64,
    /// Ed25519 signature over `signing_digest()`
    pub signature: Vec<u8>,
}

impl SupplyReport {
    pub fn new(
        reporter_id: ReporterId,
        chain_id: ChainId,
        total_supply: u128,
        locked_supply: u128,
        nonce: u64,
        timestamp: u64,
    ) -> Self {
        SupplyReport {
            reporter_id,
            chain_id,
            total_supply,
            locked_supply,
            nonce,
            timestamp,
            signature: vec![],
        }
    }

    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(REPORT_DOMAIN);
        update_prefixed(&mut hasher, self.reporter_id.0.as_bytes());
        hasher.update(self.chain_id.0.to_le_bytes());
        hasher.update(self.total_supply.to_le_bytes());
        hasher.update(self.locked_supply.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.finalize().into()
    }

    /// Reporter-side helper: attach a signature made with `key`
    pub fn signed(mut self, key: &SigningKey) -> Self {
        self.signature = key.sign(&self.signing_digest()).to_bytes().to_vec();
        self
    }

    /// Structural checks that need no engine state
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.locked_supply > self.total_supply {
            return Err(OracleError::InvalidReport(format!(
                "locked supply {} exceeds total supply {}",
                self.locked_supply, self.total_supply
            )));
        }
        Ok(())
    }

    pub fn verify_signature(&self, key: &VerifyingKey) -> Result<(), OracleError> {
        verify(key, &self.signing_digest(), &self.signature, &self.reporter_id)
    }
}

/// One chain inside a batch report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub chain_id: ChainId,
    pub total_supply: u128,
    pub locked_supply: u128,
}

/// Multi-chain observation committed under one shared nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSupplyReport {
    pub reporter_id: ReporterId,
    pub nonce: u64,
    pub timestamp: u64,
    /// Strictly ascending by chain id
    pub entries: Vec<BatchEntry>,
    pub signature: Vec<u8>,
}

impl BatchSupplyReport {
    pub fn new(reporter_id: ReporterId, nonce: u64, timestamp: u64, mut entries: Vec<BatchEntry>) -> Self {
        entries.sort_by_key(|e| e.chain_id);
        BatchSupplyReport {
            reporter_id,
            nonce,
            timestamp,
            entries,
            signature: vec![],
        }
    }

    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(BATCH_DOMAIN);
        update_prefixed(&mut hasher, self.reporter_id.0.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update((self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            hasher.update(entry.chain_id.0.to_le_bytes());
            hasher.update(entry.total_supply.to_le_bytes());
            hasher.update(entry.locked_supply.to_le_bytes());
        }
        hasher.finalize().into()
    }

    pub fn signed(mut self, key: &SigningKey) -> Self {
        self.signature = key.sign(&self.signing_digest()).to_bytes().to_vec();
        self
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.entries.is_empty() {
            return Err(OracleError::InvalidReport("batch has no entries".to_string()));
        }
        for pair in self.entries.windows(2) {
            if pair[0].chain_id >= pair[1].chain_id {
                return Err(OracleError::InvalidReport(format!(
                    "batch chains must be strictly ascending ({} then {})",
                    pair[0].chain_id, pair[1].chain_id
                )));
            }
        }
        for entry in &self.entries {
            if entry.locked_supply > entry.total_supply {
                return Err(OracleError::InvalidReport(format!(
                    "chain {}: locked supply {} exceeds total supply {}",
                    entry.chain_id, entry.locked_supply, entry.total_supply
                )));
            }
        }
        Ok(())
    }

    pub fn verify_signature(&self, key: &VerifyingKey) -> Result<(), OracleError> {
        verify(key, &self.signing_digest(), &self.signature, &self.reporter_id)
    }

    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.entries.iter().map(|e| e.chain_id)
    }
}

fn verify(
    key: &VerifyingKey,
    digest: &[u8; 32],
    signature: &[u8],
    reporter: &ReporterId,
) -> Result<(), OracleError> {
    let signature = Signature::from_slice(signature)
        .map_err(|_| OracleError::InvalidSignature(reporter.clone()))?;
    key.verify_strict(digest, &signature)
        .map_err(|_| OracleError::InvalidSignature(reporter.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_signed_report_verifies() {
        let signer = key(1);
        let report = SupplyReport::new(ReporterId::new("a"), ChainId(56), 500, 20, 1000, 10)
            .signed(&signer);

        assert!(report.verify_signature(&signer.verifying_key()).is_ok());
        assert!(report.verify_signature(&key(2).verifying_key()).is_err());
    }

    #[test]
    fn test_tampered_report_fails_verification() {
        let signer = key(1);
        let mut report = SupplyReport::new(ReporterId::new("a"), ChainId(56), 500, 20, 1000, 10)
            .signed(&signer);
        report.total_supply += 1;

        assert!(matches!(
            report.verify_signature(&signer.verifying_key()),
            Err(OracleError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_locked_above_total_is_invalid() {
        let report = SupplyReport::new(ReporterId::new("a"), ChainId(1), 10, 11, 1, 1);
        assert!(matches!(report.validate(), Err(OracleError::InvalidReport(_))));
    }

    #[test]
    fn test_batch_signature_is_not_a_report_signature() {
        let signer = key(3);
        let batch = BatchSupplyReport::new(
            ReporterId::new("a"),
            7,
            10,
            vec![BatchEntry {
                chain_id: ChainId(1),
                total_supply: 5,
                locked_supply: 0,
            }],
        )
        .signed(&signer);

        let mut report = SupplyReport::new(ReporterId::new("a"), ChainId(1), 5, 0, 7, 10);
        report.signature = batch.signature.clone();
        assert!(report.verify_signature(&signer.verifying_key()).is_err());
        assert!(batch.verify_signature(&signer.verifying_key()).is_ok());
    }

    #[test]
    fn test_batch_entries_are_sorted_and_unique() {
        let entry = |chain| BatchEntry {
            chain_id: ChainId(chain),
            total_supply: 1,
            locked_supply: 0,
        };
        let batch = BatchSupplyReport::new(ReporterId::new("a"), 1, 1, vec![entry(56), entry(1)]);
        assert_eq!(batch.chains().collect::<Vec<_>>(), vec![ChainId(1), ChainId(56)]);
        assert!(batch.validate().is_ok());

        let dup = BatchSupplyReport::new(ReporterId::new("a"), 1, 1, vec![entry(1), entry(1)]);
        assert!(dup.validate().is_err());
    }
}

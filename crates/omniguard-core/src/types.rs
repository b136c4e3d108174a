// CORE IDENTIFIERS
// Chains, protocols, accounts, reporters and the canonical transfer id.
//
// SAFETY INVARIANTS:
// 1. TransferId is content-addressed: identical inputs always yield the same id
// 2. TransferId does not depend on which protocol delivers a transfer, only on
//    the protocol that originated it (carried in the payload)
// 3. Variable-length fields are length-prefixed so no two inputs share an encoding

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Domain separator for transfer id derivation
const TRANSFER_ID_DOMAIN: &[u8] = b"omniguard.transfer.v1";

/// Numeric chain identifier (EVM-style chain ids, e.g. 1, 56, 137)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(ChainId)
            .map_err(|_| CoreError::InvalidIdentifier(format!("chain id {:?}", s)))
    }
}

/// Transport protocol identifier (registry key)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolId(pub String);

impl ProtocolId {
    pub fn new(id: impl Into<String>) -> Self {
        ProtocolId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProtocolId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains(':') {
            return Err(CoreError::InvalidIdentifier(format!("protocol id {:?}", s)));
        }
        Ok(ProtocolId(s.to_string()))
    }
}

/// Ledger account (sender, recipient, escrow, fee collector)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supply reporter identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReporterId(pub String);

impl ReporterId {
    pub fn new(id: impl Into<String>) -> Self {
        ReporterId(id.into())
    }
}

impl fmt::Display for ReporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical, protocol-independent transfer identifier
///
/// SAFETY: Computed identically on the outbound and inbound paths, so a transfer
/// delivered by a second protocol maps onto the id already claimed by the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(pub [u8; 32]);

impl TransferId {
    /// H(sender, recipient, amount, destination chain, protocol, nonce)
    pub fn compute(
        sender: &AccountId,
        recipient: &AccountId,
        amount: u128,
        destination_chain: ChainId,
        protocol: &ProtocolId,
        nonce: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(TRANSFER_ID_DOMAIN);
        update_prefixed(&mut hasher, sender.0.as_bytes());
        update_prefixed(&mut hasher, recipient.0.as_bytes());
        hasher.update(amount.to_le_bytes());
        hasher.update(destination_chain.0.to_le_bytes());
        update_prefixed(&mut hasher, protocol.0.as_bytes());
        hasher.update(nonce.to_le_bytes());

        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        TransferId(id)
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl FromStr for TransferId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|_| CoreError::InvalidIdentifier(format!("transfer id {:?}", s)))?;
        if bytes.len() != 32 {
            return Err(CoreError::InvalidIdentifier(format!(
                "transfer id must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(TransferId(id))
    }
}

/// Length-prefix a variable field before hashing it
pub fn update_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

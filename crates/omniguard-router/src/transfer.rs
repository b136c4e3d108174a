// TRANSFER RECORDS AND WIRE PAYLOAD
//
// SAFETY INVARIANTS:
// 1. Pending -> {Completed, Failed, RolledBack}; terminal states never change
// 2. The payload carries everything needed to recompute the canonical id on the
//    receiving side, including the originating protocol

use serde::{Deserialize, Serialize};

use omniguard_core::{AccountId, ChainId, ProtocolId, TransferId};

use crate::error::RouterError;

const PAYLOAD_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl TransferStatus {
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Pending, TransferStatus::Completed)
                | (TransferStatus::Pending, TransferStatus::Failed)
                | (TransferStatus::Pending, TransferStatus::RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Initiated here, funds held in escrow until resolved
    Outbound,
    /// Delivered here, funds released from escrow
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub direction: TransferDirection,
    pub sender: AccountId,
    pub recipient: AccountId,
    pub amount: u128,
    pub fee: u128,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    /// Protocol that carried the transfer
    pub protocol: ProtocolId,
    pub nonce: u64,
    pub status: TransferStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub send_handle: Option<String>,
    /// Owning multi-leg transaction, if any
    pub multi_leg: Option<TransferId>,
}

impl TransferRecord {
    /// Chain half of the composite export key
    pub fn key_chain(&self) -> ChainId {
        match self.direction {
            TransferDirection::Outbound => self.destination_chain,
            TransferDirection::Inbound => self.source_chain,
        }
    }
}

/// Cross-chain message body, bincode encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    pub version: u8,
    pub transfer_id: TransferId,
    pub sender: AccountId,
    pub recipient: AccountId,
    pub amount: u128,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub origin_protocol: ProtocolId,
    pub nonce: u64,
}

impl TransferPayload {
    pub fn new(
        sender: AccountId,
        recipient: AccountId,
        amount: u128,
        source_chain: ChainId,
        destination_chain: ChainId,
        origin_protocol: ProtocolId,
        nonce: u64,
    ) -> Self {
        let transfer_id = TransferId::compute(
            &sender,
            &recipient,
            amount,
            destination_chain,
            &origin_protocol,
            nonce,
        );
        TransferPayload {
            version: PAYLOAD_VERSION,
            transfer_id,
            sender,
            recipient,
            amount,
            source_chain,
            destination_chain,
            origin_protocol,
            nonce,
        }
    }

    /// Id recomputed from content, never trusted from the wire
    pub fn canonical_id(&self) -> TransferId {
        TransferId::compute(
            &self.sender,
            &self.recipient,
            self.amount,
            self.destination_chain,
            &self.origin_protocol,
            self.nonce,
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, RouterError> {
        bincode::serialize(self).map_err(|e| RouterError::MalformedPayload(e.to_string()))
    }

    /// Decode and check that the embedded id matches the content
    pub fn decode(bytes: &[u8]) -> Result<Self, RouterError> {
        let payload: TransferPayload =
            bincode::deserialize(bytes).map_err(|e| RouterError::MalformedPayload(e.to_string()))?;
        if payload.version != PAYLOAD_VERSION {
            return Err(RouterError::MalformedPayload(format!(
                "unsupported payload version {}",
                payload.version
            )));
        }
        if payload.canonical_id() != payload.transfer_id {
            return Err(RouterError::MalformedPayload(
                "transfer id does not match payload content".to_string(),
            ));
        }
        if payload.amount == 0 || payload.recipient.is_empty() {
            return Err(RouterError::MalformedPayload(
                "empty amount or recipient".to_string(),
            ));
        }
        Ok(payload)
    }
}

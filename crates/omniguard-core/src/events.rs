// OBSERVABILITY EVENTS
// Every state transition of interest is emitted as an immutable event.
//
// Design: events are append-only and sequenced; sinks never feed back into
// engine state.

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ChainId, ProtocolId, ReporterId, TransferId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    BridgeInitiated {
        transfer_id: TransferId,
        sender: AccountId,
        recipient: AccountId,
        amount: u128,
        destination_chain: ChainId,
        protocol: ProtocolId,
    },
    SupplyUpdated {
        chain: ChainId,
        total_supply: u128,
        locked_supply: u128,
        timestamp: u64,
    },
    SupplyMismatchDetected {
        expected: u128,
        actual: u128,
        deviation: u128,
    },
    BridgePaused {
        reason: String,
    },
    BridgeUnpaused {
        by: AccountId,
    },
    ReportRejected {
        reporter: ReporterId,
        chain: ChainId,
        nonce: u64,
        reason: String,
    },
    SuspectReport {
        reporter: ReporterId,
        chain: ChainId,
        nonce: u64,
        total_supply: u128,
        locked_supply: u128,
    },
    TransferCompleted {
        transfer_id: TransferId,
        protocol: ProtocolId,
    },
    TransferFailed {
        transfer_id: TransferId,
        reason: String,
    },
    TransferRolledBack {
        transfer_id: TransferId,
        reason: String,
    },
    DuplicateTransferRejected {
        transfer_id: TransferId,
        delivering_protocol: ProtocolId,
    },
    ProtocolRegistered {
        protocol: ProtocolId,
    },
    FeeParametersUpdated {
        protocol: ProtocolId,
    },
    MultiLegPrepared {
        transaction_id: TransferId,
        locked_amount: u128,
        deadline: u64,
    },
    MultiLegCommitted {
        transaction_id: TransferId,
    },
    MultiLegAborted {
        transaction_id: TransferId,
        reason: String,
    },
    EmergencyOverride {
        by: AccountId,
        chain: ChainId,
    },
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BridgeInitiated { .. } => "bridge_initiated",
            Self::SupplyUpdated { .. } => "supply_updated",
            Self::SupplyMismatchDetected { .. } => "supply_mismatch_detected",
            Self::BridgePaused { .. } => "bridge_paused",
            Self::BridgeUnpaused { .. } => "bridge_unpaused",
            Self::ReportRejected { .. } => "report_rejected",
            Self::SuspectReport { .. } => "suspect_report",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::TransferRolledBack { .. } => "transfer_rolled_back",
            Self::DuplicateTransferRejected { .. } => "duplicate_transfer_rejected",
            Self::ProtocolRegistered { .. } => "protocol_registered",
            Self::FeeParametersUpdated { .. } => "fee_parameters_updated",
            Self::MultiLegPrepared { .. } => "multi_leg_prepared",
            Self::MultiLegCommitted { .. } => "multi_leg_committed",
            Self::MultiLegAborted { .. } => "multi_leg_aborted",
            Self::EmergencyOverride { .. } => "emergency_override",
        }
    }

    /// Events an operator must look at
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::SupplyMismatchDetected { .. }
                | Self::BridgePaused { .. }
                | Self::DuplicateTransferRejected { .. }
                | Self::EmergencyOverride { .. }
        )
    }
}

/// Sequenced event as recorded by a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: u64,
    pub event: BridgeEvent,
}

/// Destination for emitted events
pub trait EventSink: Send + Sync {
    fn emit(&self, timestamp: u64, event: BridgeEvent);
}

/// In-memory append-only event log
#[derive(Debug, Default)]
pub struct EventLog {
    records: Mutex<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<BridgeEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event.name() == name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&self, timestamp: u64, event: BridgeEvent) {
        if event.is_critical() {
            warn!("event {}: {:?}", event.name(), event);
        } else {
            debug!("event {}: {:?}", event.name(), event);
        }
        let mut records = self.records.lock();
        let sequence = records.len() as u64;
        records.push(EventRecord {
            sequence,
            timestamp,
            event,
        });
    }
}

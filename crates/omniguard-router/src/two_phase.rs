// TWO-PHASE MULTI-LEG COORDINATOR
// Prepare / commit / abort across several outbound legs, all-or-nothing.
//
// SAFETY INVARIANTS:
// 1. Prepared -> {Committed, Aborted}; Aborted and Committed are terminal
// 2. prepare() locks sum(amount) + fee_budget in escrow; every exit path either
//    turns that lock into pending leg transfers plus fees or refunds it in full
// 3. commit() requires every leg acknowledged, the deadline not passed and the
//    breaker armed
// 4. A send failure on any leg revokes every leg already sent
// 5. Deadlines are checked lazily on the next call, never by a timer
// 6. Committing is transient: commit() never returns with it still set

use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use omniguard_core::types::update_prefixed;
use omniguard_core::{
    AccountId, BridgeEvent, ChainId, ProtocolId, Role, TransferId, TwoPhaseSettings,
};

use crate::error::RouterError;
use crate::orchestrator::TransferOrchestrator;
use crate::transfer::{TransferDirection, TransferPayload, TransferRecord, TransferStatus};
use crate::unit_of_work::UnitOfWork;

const MULTI_LEG_DOMAIN: &[u8] = b"omniguard.multi-leg.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegSpec {
    pub protocol: ProtocolId,
    pub destination_chain: ChainId,
    pub recipient: AccountId,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegState {
    pub spec: LegSpec,
    /// Fee quoted at prepare time
    pub fee: u128,
    pub acknowledged: bool,
    pub failure: Option<String>,
    /// Set once the leg has been sent
    pub transfer_id: Option<TransferId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiLegStatus {
    Initiated,
    Prepared,
    /// commit() is sending legs
    Committing,
    Committed,
    Aborted,
}

impl MultiLegStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MultiLegStatus::Committed | MultiLegStatus::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLegTransaction {
    pub transaction_id: TransferId,
    pub sender: AccountId,
    pub legs: Vec<LegState>,
    pub fee_budget: u128,
    pub locked_amount: u128,
    pub status: MultiLegStatus,
    pub created_at: u64,
    pub deadline: Option<u64>,
    pub abort_reason: Option<String>,
}

impl MultiLegTransaction {
    pub fn total_amount(&self) -> u128 {
        self.legs.iter().map(|l| l.spec.amount).sum()
    }

    pub fn total_fee(&self) -> u128 {
        self.legs.iter().map(|l| l.fee).sum()
    }

    pub fn all_acknowledged(&self) -> bool {
        self.legs.iter().all(|l| l.acknowledged)
    }

    pub fn has_failed_leg(&self) -> bool {
        self.legs.iter().any(|l| l.failure.is_some())
    }

    pub fn deadline_passed(&self, now: u64) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    transactions: BTreeMap<TransferId, MultiLegTransaction>,
    sequence: u64,
}

pub struct TwoPhaseCoordinator {
    orchestrator: Arc<TransferOrchestrator>,
    settings: TwoPhaseSettings,
    state: Mutex<CoordinatorState>,
}

impl TwoPhaseCoordinator {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, settings: TwoPhaseSettings) -> Self {
        TwoPhaseCoordinator {
            orchestrator,
            settings,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Record a multi-leg intent. Nothing is locked until `prepare`.
    pub fn begin_multi_leg(
        &self,
        sender: &AccountId,
        legs: Vec<LegSpec>,
        fee_budget: u128,
    ) -> Result<TransferId, RouterError> {
        if sender.is_empty() {
            return Err(RouterError::InvalidRecipient("empty sender".to_string()));
        }
        if legs.is_empty() || legs.len() > self.settings.max_legs {
            return Err(RouterError::MultiLegState(format!(
                "leg count {} outside 1..={}",
                legs.len(),
                self.settings.max_legs
            )));
        }
        let mut total: u128 = 0;
        for leg in &legs {
            if leg.amount == 0 {
                return Err(RouterError::InvalidAmount("leg amount must be positive".to_string()));
            }
            if leg.destination_chain == self.orchestrator.local_chain() {
                return Err(RouterError::WrongDestination {
                    expected: leg.destination_chain,
                    actual: self.orchestrator.local_chain(),
                });
            }
            let (descriptor, _) = self
                .orchestrator
                .registry
                .routable(&leg.protocol, leg.destination_chain)?;
            descriptor.kind.encode_recipient(&leg.recipient)?;
            total = total
                .checked_add(leg.amount)
                .ok_or_else(|| RouterError::InvalidAmount("leg total overflows".to_string()))?;
        }
        total
            .checked_add(fee_budget)
            .ok_or_else(|| RouterError::InvalidAmount("lock amount overflows".to_string()))?;

        let now = self.orchestrator.clock.now();
        let mut state = self.state.lock();
        state.sequence += 1;
        let transaction_id = Self::transaction_id(sender, state.sequence, &legs);
        let transaction = MultiLegTransaction {
            transaction_id,
            sender: sender.clone(),
            legs: legs
                .into_iter()
                .map(|spec| LegState {
                    spec,
                    fee: 0,
                    acknowledged: false,
                    failure: None,
                    transfer_id: None,
                })
                .collect(),
            fee_budget,
            locked_amount: 0,
            status: MultiLegStatus::Initiated,
            created_at: now,
            deadline: None,
            abort_reason: None,
        };
        info!(
            "Multi-leg {} begun by {} with {} legs",
            transaction_id.short(),
            sender,
            transaction.legs.len()
        );
        state.transactions.insert(transaction_id, transaction);
        Ok(transaction_id)
    }

    fn transaction_id(sender: &AccountId, sequence: u64, legs: &[LegSpec]) -> TransferId {
        let mut hasher = Sha256::new();
        hasher.update(MULTI_LEG_DOMAIN);
        update_prefixed(&mut hasher, sender.as_str().as_bytes());
        hasher.update(sequence.to_le_bytes());
        for leg in legs {
            update_prefixed(&mut hasher, leg.protocol.as_str().as_bytes());
            hasher.update(leg.destination_chain.0.to_le_bytes());
            update_prefixed(&mut hasher, leg.recipient.as_str().as_bytes());
            hasher.update(leg.amount.to_le_bytes());
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        TransferId(id)
    }

    /// Quote every leg and lock the total plus fee budget in escrow
    pub fn prepare(&self, caller: &AccountId, transaction_id: &TransferId) -> Result<u64, RouterError> {
        self.orchestrator.ensure_armed()?;
        let transaction = self.require_status(transaction_id, MultiLegStatus::Initiated)?;
        if &transaction.sender != caller {
            self.orchestrator.access.require(caller, Role::Admin)?;
        }

        let mut fees = Vec::with_capacity(transaction.legs.len());
        for leg in &transaction.legs {
            let fee = self.orchestrator.registry.quote(
                &leg.spec.protocol,
                leg.spec.destination_chain,
                leg.spec.amount,
            )?;
            fees.push(fee);
        }
        let total_fee = fees
            .iter()
            .try_fold(0u128, |acc, fee| acc.checked_add(*fee))
            .ok_or_else(|| RouterError::InvalidAmount("fee total overflows".to_string()))?;
        if total_fee > transaction.fee_budget {
            return Err(RouterError::FeeBudgetExceeded {
                fee: total_fee,
                budget: transaction.fee_budget,
            });
        }
        // validated at begin
        let locked_amount = transaction.total_amount() + transaction.fee_budget;

        let mut uow = UnitOfWork::begin(
            format!("prepare {}", transaction_id.short()),
            self.orchestrator.ledger.as_ref(),
            self.orchestrator.breaker.as_ref(),
        );
        uow.transfer(&transaction.sender, &self.orchestrator.settings.escrow(), locked_amount)?;

        let now = self.orchestrator.clock.now();
        let deadline = now.saturating_add(self.settings.deadline_secs);
        {
            let mut state = self.state.lock();
            let current = state
                .transactions
                .get_mut(transaction_id)
                .ok_or(RouterError::UnknownMultiLeg(*transaction_id))?;
            if current.status != MultiLegStatus::Initiated {
                // lost a race with another prepare; the unit of work unwinds on drop
                return Err(RouterError::MultiLegState(format!(
                    "transaction is {:?}",
                    current.status
                )));
            }
            for (leg, fee) in current.legs.iter_mut().zip(fees) {
                leg.fee = fee;
            }
            current.locked_amount = locked_amount;
            current.status = MultiLegStatus::Prepared;
            current.deadline = Some(deadline);
        }
        uow.commit();

        info!(
            "Multi-leg {} prepared: {} locked until {}",
            transaction_id.short(),
            locked_amount,
            deadline
        );
        self.orchestrator.events.emit(
            now,
            BridgeEvent::MultiLegPrepared {
                transaction_id: *transaction_id,
                locked_amount,
                deadline,
            },
        );
        Ok(deadline)
    }

    /// A leg's protocol confirms it can carry its part
    pub fn acknowledge_prepare(
        &self,
        relayer: &AccountId,
        transaction_id: &TransferId,
        leg: usize,
        protocol: &ProtocolId,
    ) -> Result<(), RouterError> {
        self.orchestrator
            .access
            .require_any(relayer, &[Role::Relayer, Role::Admin])?;
        let now = self.orchestrator.clock.now();
        self.with_prepared_leg(transaction_id, leg, protocol, |transaction, index| {
            if transaction.deadline_passed(now) {
                return Err(RouterError::DeadlinePassed {
                    deadline: transaction.deadline.unwrap_or_default(),
                    now,
                });
            }
            transaction.legs[index].acknowledged = true;
            Ok(())
        })
    }

    /// A leg's protocol reports it cannot carry its part; the transaction becomes abortable
    pub fn record_leg_failure(
        &self,
        relayer: &AccountId,
        transaction_id: &TransferId,
        leg: usize,
        protocol: &ProtocolId,
        reason: &str,
    ) -> Result<(), RouterError> {
        self.orchestrator
            .access
            .require_any(relayer, &[Role::Relayer, Role::Admin])?;
        self.with_prepared_leg(transaction_id, leg, protocol, |transaction, index| {
            transaction.legs[index].failure = Some(reason.to_string());
            Ok(())
        })?;
        warn!(
            "Multi-leg {} leg {} failed via {}: {}",
            transaction_id.short(),
            leg,
            protocol,
            reason
        );
        Ok(())
    }

    fn with_prepared_leg<F>(
        &self,
        transaction_id: &TransferId,
        leg: usize,
        protocol: &ProtocolId,
        apply: F,
    ) -> Result<(), RouterError>
    where
        F: FnOnce(&mut MultiLegTransaction, usize) -> Result<(), RouterError>,
    {
        let mut state = self.state.lock();
        let transaction = state
            .transactions
            .get_mut(transaction_id)
            .ok_or(RouterError::UnknownMultiLeg(*transaction_id))?;
        if transaction.status != MultiLegStatus::Prepared {
            return Err(RouterError::MultiLegState(format!(
                "transaction is {:?}",
                transaction.status
            )));
        }
        let spec = transaction
            .legs
            .get(leg)
            .map(|l| &l.spec)
            .ok_or_else(|| RouterError::MultiLegState(format!("no leg {}", leg)))?;
        if &spec.protocol != protocol {
            return Err(RouterError::UntrustedSource {
                protocol: protocol.clone(),
                chain: spec.destination_chain,
            });
        }
        apply(transaction, leg)
    }

    /// Send every leg, or none of them
    pub fn commit(&self, caller: &AccountId, transaction_id: &TransferId) -> Result<Vec<TransferId>, RouterError> {
        let now = self.orchestrator.clock.now();
        let transaction = {
            let mut state = self.state.lock();
            let transaction = state
                .transactions
                .get_mut(transaction_id)
                .ok_or(RouterError::UnknownMultiLeg(*transaction_id))?;
            if transaction.status != MultiLegStatus::Prepared {
                return Err(RouterError::MultiLegState(format!(
                    "cannot commit a {:?} transaction",
                    transaction.status
                )));
            }
            if &transaction.sender != caller {
                self.orchestrator.access.require(caller, Role::Admin)?;
            }
            if transaction.deadline_passed(now) {
                return Err(RouterError::DeadlinePassed {
                    deadline: transaction.deadline.unwrap_or_default(),
                    now,
                });
            }
            if transaction.has_failed_leg() || !transaction.all_acknowledged() {
                return Err(RouterError::MultiLegState(
                    "every leg must acknowledge prepare".to_string(),
                ));
            }
            self.orchestrator.ensure_armed()?;
            transaction.status = MultiLegStatus::Committing;
            transaction.clone()
        };

        // fees settle first; the unit stays open so a failed send undoes them
        let escrow = self.orchestrator.settings.escrow();
        let total_fee = transaction.total_fee();
        let mut uow = UnitOfWork::begin(
            format!("commit {}", transaction_id.short()),
            self.orchestrator.ledger.as_ref(),
            self.orchestrator.breaker.as_ref(),
        );
        let settled = uow
            .transfer(&escrow, &self.orchestrator.settings.collector(), total_fee)
            .and_then(|_| uow.transfer(&escrow, &transaction.sender, transaction.fee_budget - total_fee));
        if let Err(err) = settled {
            let rolled_back = uow.rollback();
            warn!(
                "Multi-leg {} fee settlement failed: {}; nothing sent, transaction reopened",
                transaction_id.short(),
                err
            );
            self.set_status(transaction_id, MultiLegStatus::Prepared);
            rolled_back?;
            return Err(err);
        }

        let mut sent: Vec<TransferRecord> = Vec::with_capacity(transaction.legs.len());
        for (index, leg) in transaction.legs.iter().enumerate() {
            match self.send_leg(&transaction, leg, now) {
                Ok(record) => sent.push(record),
                Err(err) => {
                    error!(
                        "Multi-leg {} leg {} failed to send: {}; rolling back {} sent legs",
                        transaction_id.short(),
                        index,
                        err,
                        sent.len()
                    );
                    let fees_restored = uow.rollback();
                    self.unwind_sent(&transaction, &sent, now);
                    self.finish_abort(&transaction, format!("leg {} send failed: {}", index, err), now)?;
                    fees_restored?;
                    return Err(err);
                }
            }
        }

        let ids: Vec<TransferId> = sent.iter().map(|r| r.transfer_id).collect();
        {
            let mut state = self.state.lock();
            if let Some(current) = state.transactions.get_mut(transaction_id) {
                for (leg, id) in current.legs.iter_mut().zip(&ids) {
                    leg.transfer_id = Some(*id);
                }
                current.status = MultiLegStatus::Committed;
            }
        }
        for record in &sent {
            self.orchestrator.insert_record(record.clone());
        }
        uow.commit();

        info!(
            "Multi-leg {} committed: {} legs, fees {}",
            transaction_id.short(),
            ids.len(),
            total_fee
        );
        for record in sent {
            self.orchestrator.events.emit(
                now,
                BridgeEvent::BridgeInitiated {
                    transfer_id: record.transfer_id,
                    sender: record.sender,
                    recipient: record.recipient,
                    amount: record.amount,
                    destination_chain: record.destination_chain,
                    protocol: record.protocol,
                },
            );
        }
        self.orchestrator.events.emit(
            now,
            BridgeEvent::MultiLegCommitted {
                transaction_id: *transaction_id,
            },
        );
        Ok(ids)
    }

    fn send_leg(
        &self,
        transaction: &MultiLegTransaction,
        leg: &LegState,
        now: u64,
    ) -> Result<TransferRecord, RouterError> {
        let spec = &leg.spec;
        let (descriptor, adapter) = self.orchestrator.registry.lookup(&spec.protocol)?;
        let payload: TransferPayload = self.orchestrator.reserve_outbound(
            &transaction.sender,
            &spec.recipient,
            &spec.protocol,
            spec.destination_chain,
            spec.amount,
        )?;
        let handle = match self
            .orchestrator
            .send_payload(adapter.as_ref(), &spec.protocol, descriptor.kind, &payload)
        {
            Ok(handle) => handle,
            Err(err) => {
                self.orchestrator.replay.release(&payload.transfer_id);
                return Err(err);
            }
        };
        Ok(TransferRecord {
            transfer_id: payload.transfer_id,
            direction: TransferDirection::Outbound,
            sender: transaction.sender.clone(),
            recipient: spec.recipient.clone(),
            amount: spec.amount,
            fee: leg.fee,
            source_chain: self.orchestrator.local_chain(),
            destination_chain: spec.destination_chain,
            protocol: spec.protocol.clone(),
            nonce: payload.nonce,
            status: TransferStatus::Pending,
            created_at: now,
            updated_at: now,
            send_handle: Some(handle.0),
            multi_leg: Some(transaction.transaction_id),
        })
    }

    /// Revoke legs that already left so their deliveries are refused
    fn unwind_sent(
        &self,
        transaction: &MultiLegTransaction,
        sent: &[TransferRecord],
        now: u64,
    ) {
        for record in sent {
            self.orchestrator.replay.revoke(record.transfer_id);
            let mut rolled_back = record.clone();
            rolled_back.status = TransferStatus::RolledBack;
            self.orchestrator.insert_record(rolled_back);
            self.orchestrator.events.emit(
                now,
                BridgeEvent::TransferRolledBack {
                    transfer_id: record.transfer_id,
                    reason: format!("multi-leg {} aborted", transaction.transaction_id.short()),
                },
            );
        }
    }

    /// Release the lock of a transaction that can no longer commit
    pub fn abort(&self, transaction_id: &TransferId) -> Result<(), RouterError> {
        let now = self.orchestrator.clock.now();
        let transaction = {
            let mut state = self.state.lock();
            let transaction = state
                .transactions
                .get_mut(transaction_id)
                .ok_or(RouterError::UnknownMultiLeg(*transaction_id))?;
            match transaction.status {
                MultiLegStatus::Initiated => {}
                MultiLegStatus::Prepared => {
                    if !transaction.deadline_passed(now) && !transaction.has_failed_leg() {
                        return Err(RouterError::MultiLegState(
                            "abort requires a passed deadline or a failed leg".to_string(),
                        ));
                    }
                }
                status => {
                    return Err(RouterError::MultiLegState(format!(
                        "cannot abort a {:?} transaction",
                        status
                    )))
                }
            }
            // claim the transaction so a concurrent commit cannot start
            transaction.status = MultiLegStatus::Committing;
            transaction.clone()
        };

        let reason = if transaction.has_failed_leg() {
            "leg failure".to_string()
        } else if transaction.locked_amount == 0 {
            "abandoned before prepare".to_string()
        } else {
            "prepare deadline passed".to_string()
        };
        self.finish_abort(&transaction, reason, now)
    }

    fn finish_abort(
        &self,
        transaction: &MultiLegTransaction,
        reason: String,
        now: u64,
    ) -> Result<(), RouterError> {
        let mut uow = UnitOfWork::begin(
            format!("abort {}", transaction.transaction_id.short()),
            self.orchestrator.ledger.as_ref(),
            self.orchestrator.breaker.as_ref(),
        );
        let refund = uow.transfer(
            &self.orchestrator.settings.escrow(),
            &transaction.sender,
            transaction.locked_amount,
        );
        if let Err(err) = refund {
            drop(uow);
            // the lock stays held; reopen the transaction so abort can be retried
            let reopened = if transaction.locked_amount == 0 {
                MultiLegStatus::Initiated
            } else {
                MultiLegStatus::Prepared
            };
            self.set_status(&transaction.transaction_id, reopened);
            return Err(err);
        }

        {
            let mut state = self.state.lock();
            if let Some(current) = state.transactions.get_mut(&transaction.transaction_id) {
                current.status = MultiLegStatus::Aborted;
                current.abort_reason = Some(reason.clone());
            }
        }
        uow.commit();

        warn!(
            "Multi-leg {} aborted ({}), {} refunded to {}",
            transaction.transaction_id.short(),
            reason,
            transaction.locked_amount,
            transaction.sender
        );
        self.orchestrator.events.emit(
            now,
            BridgeEvent::MultiLegAborted {
                transaction_id: transaction.transaction_id,
                reason,
            },
        );
        Ok(())
    }

    fn set_status(&self, transaction_id: &TransferId, status: MultiLegStatus) {
        if let Some(current) = self.state.lock().transactions.get_mut(transaction_id) {
            current.status = status;
        }
    }

    fn require_status(
        &self,
        transaction_id: &TransferId,
        expected: MultiLegStatus,
    ) -> Result<MultiLegTransaction, RouterError> {
        let state = self.state.lock();
        let transaction = state
            .transactions
            .get(transaction_id)
            .ok_or(RouterError::UnknownMultiLeg(*transaction_id))?;
        if transaction.status != expected {
            return Err(RouterError::MultiLegState(format!(
                "transaction is {:?}, expected {:?}",
                transaction.status, expected
            )));
        }
        Ok(transaction.clone())
    }

    pub fn transaction(&self, transaction_id: &TransferId) -> Option<MultiLegTransaction> {
        self.state.lock().transactions.get(transaction_id).cloned()
    }

    pub fn transactions(&self) -> Vec<MultiLegTransaction> {
        self.state.lock().transactions.values().cloned().collect()
    }

    pub fn restore(&self, transactions: Vec<MultiLegTransaction>) {
        let mut state = self.state.lock();
        state.sequence = transactions.len() as u64;
        state.transactions = transactions
            .into_iter()
            .map(|t| (t.transaction_id, t))
            .collect();
    }
}

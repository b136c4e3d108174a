// TRANSFER ORCHESTRATOR
// Creates, tracks and finalizes transfers across competing transport protocols.
//
// SAFETY INVARIANTS:
// 1. No new transfer is initiated while the breaker is tripped
// 2. bridge() is all-or-nothing: reservation, debit, escrow, fee and send either
//    all apply or none do
// 3. The canonical transfer id is computed identically outbound and inbound and
//    checked against one replay guard shared by every protocol
// 4. Pending -> {Completed, Failed, RolledBack}; refunded ids are revoked so the
//    same funds can never also be released
// 5. No lock is held while an adapter or the ledger is called
// 6. Senders cannot cancel; only the carrying protocol or the timeout resolves a transfer

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use omniguard_core::{
    AccessControl, AccountId, BridgeEvent, ChainId, Clock, EventSink, Ledger, ProtocolId, Role,
    RouterSettings, TransferId,
};
use omniguard_oracle::CircuitBreaker;

use crate::adapter::{BridgeModule, OutboundMessage, ProtocolKind, SendHandle};
use crate::error::RouterError;
use crate::protocol_registry::ProtocolRegistry;
use crate::replay_guard::ReplayGuard;
use crate::route_selector::{select_route, RouteCandidate, RoutePreference};
use crate::transfer::{TransferDirection, TransferPayload, TransferRecord, TransferStatus};
use crate::unit_of_work::UnitOfWork;

/// Caller-side description of an outbound transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub destination_chain: ChainId,
    pub amount: u128,
    /// Most the sender is willing to pay in fees; the unused part is refunded
    pub fee_budget: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReceipt {
    pub transfer_id: TransferId,
    pub protocol: ProtocolId,
    pub nonce: u64,
    pub fee_charged: u128,
    pub fee_refund: u128,
    pub send_handle: SendHandle,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    transfers: BTreeMap<TransferId, TransferRecord>,
    nonces: BTreeMap<AccountId, u64>,
    /// Pending transfers whose refund is in flight
    resolving: BTreeSet<TransferId>,
}

pub struct TransferOrchestrator {
    state: Mutex<OrchestratorState>,
    pub(crate) registry: Arc<ProtocolRegistry>,
    pub(crate) replay: Arc<ReplayGuard>,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) access: Arc<AccessControl>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: RouterSettings,
}

impl TransferOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: RouterSettings,
        registry: Arc<ProtocolRegistry>,
        replay: Arc<ReplayGuard>,
        ledger: Arc<dyn Ledger>,
        breaker: Arc<CircuitBreaker>,
        access: Arc<AccessControl>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TransferOrchestrator {
            state: Mutex::new(OrchestratorState::default()),
            registry,
            replay,
            ledger,
            breaker,
            access,
            events,
            clock,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn replay_guard(&self) -> &Arc<ReplayGuard> {
        &self.replay
    }

    pub fn local_chain(&self) -> ChainId {
        self.settings.local_chain()
    }

    // ---- outbound ----

    /// Initiate a transfer through a specific protocol.
    pub fn bridge(&self, protocol: &ProtocolId, request: TransferRequest) -> Result<BridgeReceipt, RouterError> {
        self.validate_request(&request)?;
        self.ensure_armed()?;

        let (descriptor, adapter) = self.registry.routable(protocol, request.destination_chain)?;
        descriptor.kind.encode_recipient(&request.recipient)?;

        let fee = self
            .registry
            .quote(protocol, request.destination_chain, request.amount)?;
        if fee > request.fee_budget {
            return Err(RouterError::FeeBudgetExceeded {
                fee,
                budget: request.fee_budget,
            });
        }
        let total_debit = request
            .amount
            .checked_add(request.fee_budget)
            .ok_or_else(|| RouterError::InvalidAmount("amount plus fee budget overflows".to_string()))?;
        let refund = request.fee_budget - fee;

        let payload = self.reserve_outbound(
            &request.sender,
            &request.recipient,
            protocol,
            request.destination_chain,
            request.amount,
        )?;
        let transfer_id = payload.transfer_id;

        let escrow = self.settings.escrow();
        let collector = self.settings.collector();
        let mut uow = UnitOfWork::begin(
            format!("bridge {}", transfer_id.short()),
            self.ledger.as_ref(),
            self.breaker.as_ref(),
        );
        let replay = self.replay.as_ref();
        uow.on_rollback("release transfer id", move || replay.release(&transfer_id));
        uow.debit(&request.sender, total_debit)?;
        uow.credit(&escrow, request.amount)?;
        uow.credit(&collector, fee)?;
        uow.credit(&request.sender, refund)?;

        // a trip observed just before sending still aborts the whole transfer
        if !self.breaker.is_armed() {
            uow.rollback()?;
            return Err(self.paused_error());
        }

        let handle = match self.send_payload(adapter.as_ref(), protocol, descriptor.kind, &payload) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Transfer {} via {} rolled back: {}", transfer_id.short(), protocol, err);
                uow.rollback()?;
                return Err(err);
            }
        };

        let now = self.clock.now();
        let record = TransferRecord {
            transfer_id,
            direction: TransferDirection::Outbound,
            sender: request.sender.clone(),
            recipient: request.recipient.clone(),
            amount: request.amount,
            fee,
            source_chain: self.local_chain(),
            destination_chain: request.destination_chain,
            protocol: protocol.clone(),
            nonce: payload.nonce,
            status: TransferStatus::Pending,
            created_at: now,
            updated_at: now,
            send_handle: Some(handle.0.clone()),
            multi_leg: None,
        };
        self.state.lock().transfers.insert(transfer_id, record);
        uow.commit();

        info!(
            "Transfer {} initiated: {} -> {} amount {} to chain {} via {} (fee {})",
            transfer_id.short(),
            request.sender,
            request.recipient,
            request.amount,
            request.destination_chain,
            protocol,
            fee
        );
        self.events.emit(
            now,
            BridgeEvent::BridgeInitiated {
                transfer_id,
                sender: request.sender,
                recipient: request.recipient,
                amount: request.amount,
                destination_chain: request.destination_chain,
                protocol: protocol.clone(),
            },
        );

        Ok(BridgeReceipt {
            transfer_id,
            protocol: protocol.clone(),
            nonce: payload.nonce,
            fee_charged: fee,
            fee_refund: refund,
            send_handle: handle,
        })
    }

    /// Pick a protocol by preference, then `bridge` through it
    pub fn bridge_auto(
        &self,
        preference: RoutePreference,
        request: TransferRequest,
    ) -> Result<BridgeReceipt, RouterError> {
        self.validate_request(&request)?;
        self.ensure_armed()?;
        let route = self.get_optimal_route(request.destination_chain, request.amount, preference)?;
        self.bridge(&route.protocol_id, request)
    }

    pub fn get_optimal_route(
        &self,
        chain: ChainId,
        amount: u128,
        preference: RoutePreference,
    ) -> Result<RouteCandidate, RouterError> {
        let candidates: Vec<RouteCandidate> = self
            .registry
            .get_bridge_options(chain, amount)
            .iter()
            .filter_map(|option| option.candidate())
            .collect();
        select_route(&candidates, preference)
            .cloned()
            .ok_or(RouterError::NoAvailableRoute(chain))
    }

    fn validate_request(&self, request: &TransferRequest) -> Result<(), RouterError> {
        if request.amount == 0 {
            return Err(RouterError::InvalidAmount("amount must be positive".to_string()));
        }
        if request.recipient.is_empty() {
            return Err(RouterError::InvalidRecipient("empty recipient".to_string()));
        }
        if request.sender.is_empty() {
            return Err(RouterError::InvalidRecipient("empty sender".to_string()));
        }
        if request.destination_chain == self.local_chain() {
            return Err(RouterError::WrongDestination {
                expected: request.destination_chain,
                actual: self.local_chain(),
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_armed(&self) -> Result<(), RouterError> {
        if self.breaker.is_armed() {
            Ok(())
        } else {
            Err(self.paused_error())
        }
    }

    pub(crate) fn paused_error(&self) -> RouterError {
        let reason = self
            .breaker
            .trip_reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "tripped".to_string());
        RouterError::BridgePaused(reason)
    }

    /// Allocate the sender's next nonce, derive the canonical id and claim it
    pub(crate) fn reserve_outbound(
        &self,
        sender: &AccountId,
        recipient: &AccountId,
        protocol: &ProtocolId,
        destination_chain: ChainId,
        amount: u128,
    ) -> Result<TransferPayload, RouterError> {
        let nonce = {
            let mut state = self.state.lock();
            let next = state.nonces.entry(sender.clone()).or_insert(0);
            *next += 1;
            *next
        };
        let payload = TransferPayload::new(
            sender.clone(),
            recipient.clone(),
            amount,
            self.local_chain(),
            destination_chain,
            protocol.clone(),
            nonce,
        );
        self.replay.reserve(payload.transfer_id, protocol)?;
        Ok(payload)
    }

    pub(crate) fn send_payload(
        &self,
        adapter: &dyn BridgeModule,
        protocol: &ProtocolId,
        kind: ProtocolKind,
        payload: &TransferPayload,
    ) -> Result<SendHandle, RouterError> {
        let message = OutboundMessage {
            destination_chain: payload.destination_chain,
            recipient: kind.encode_recipient(&payload.recipient)?,
            amount: payload.amount,
            payload: payload.encode()?,
        };
        adapter
            .send(&message)
            .map_err(|e| RouterError::adapter(protocol, e))
    }

    pub(crate) fn insert_record(&self, record: TransferRecord) {
        self.state.lock().transfers.insert(record.transfer_id, record);
    }

    // ---- inbound ----

    /// Adapter callback for a message arriving on the local chain.
    ///
    /// Rejects any id already executed, revoked or claimed by another protocol
    /// with `DuplicateTransferDetected` and changes nothing.
    pub fn handle_delivery(
        &self,
        relayer: &AccountId,
        protocol: &ProtocolId,
        source_chain: ChainId,
        sender_encoded: &[u8],
        payload: &[u8],
    ) -> Result<TransferId, RouterError> {
        self.access.require_any(relayer, &[Role::Relayer, Role::Admin])?;

        let payload = TransferPayload::decode(payload)?;
        let transfer_id = payload.canonical_id();

        if let Err(err) = self.replay.check_delivery(&transfer_id, protocol) {
            self.reject_duplicate(transfer_id, protocol);
            return Err(err);
        }

        let (descriptor, _) = self.registry.lookup(protocol)?;
        let trusted = descriptor
            .supported_chains
            .get(&source_chain)
            .map(|route| route.trusted_peer.as_slice() == sender_encoded)
            .unwrap_or(false);
        if !trusted || payload.source_chain != source_chain {
            warn!(
                "Delivery {} via {} from untrusted peer {} on chain {} (possible attack)",
                transfer_id.short(),
                protocol,
                hex::encode(sender_encoded),
                source_chain
            );
            return Err(RouterError::UntrustedSource {
                protocol: protocol.clone(),
                chain: source_chain,
            });
        }
        if payload.destination_chain != self.local_chain() {
            return Err(RouterError::WrongDestination {
                expected: self.local_chain(),
                actual: payload.destination_chain,
            });
        }

        let previous = match self.replay.execute_delivery(transfer_id, protocol) {
            Ok(previous) => previous,
            Err(err) => {
                self.reject_duplicate(transfer_id, protocol);
                return Err(err);
            }
        };

        let mut uow = UnitOfWork::begin(
            format!("deliver {}", transfer_id.short()),
            self.ledger.as_ref(),
            self.breaker.as_ref(),
        );
        let replay = self.replay.as_ref();
        uow.on_rollback("restore replay entry", move || {
            replay.restore_entry(transfer_id, previous)
        });
        uow.transfer(&self.settings.escrow(), &payload.recipient, payload.amount)?;

        let now = self.clock.now();
        self.insert_record(TransferRecord {
            transfer_id,
            direction: TransferDirection::Inbound,
            sender: payload.sender.clone(),
            recipient: payload.recipient.clone(),
            amount: payload.amount,
            fee: 0,
            source_chain,
            destination_chain: payload.destination_chain,
            protocol: protocol.clone(),
            nonce: payload.nonce,
            status: TransferStatus::Completed,
            created_at: now,
            updated_at: now,
            send_handle: None,
            multi_leg: None,
        });
        uow.commit();

        info!(
            "Transfer {} delivered via {}: {} released to {}",
            transfer_id.short(),
            protocol,
            payload.amount,
            payload.recipient
        );
        self.events.emit(
            now,
            BridgeEvent::TransferCompleted {
                transfer_id,
                protocol: protocol.clone(),
            },
        );
        Ok(transfer_id)
    }

    fn reject_duplicate(&self, transfer_id: TransferId, protocol: &ProtocolId) {
        warn!(
            "Duplicate delivery of {} via {} rejected (possible attack)",
            transfer_id.short(),
            protocol
        );
        self.events.emit(
            self.clock.now(),
            BridgeEvent::DuplicateTransferRejected {
                transfer_id,
                delivering_protocol: protocol.clone(),
            },
        );
    }

    // ---- outbound resolution ----

    /// The carrying protocol confirms destination delivery: Pending -> Completed
    pub fn acknowledge_delivery(
        &self,
        relayer: &AccountId,
        protocol: &ProtocolId,
        transfer_id: &TransferId,
    ) -> Result<(), RouterError> {
        self.access.require_any(relayer, &[Role::Relayer, Role::Admin])?;
        {
            let mut state = self.state.lock();
            let record = Self::pending_outbound(&mut state, transfer_id, Some(protocol))?;
            self.replay.confirm(transfer_id)?;
            record.status = TransferStatus::Completed;
            record.updated_at = self.clock.now();
        }

        info!("Transfer {} completed via {}", transfer_id.short(), protocol);
        self.events.emit(
            self.clock.now(),
            BridgeEvent::TransferCompleted {
                transfer_id: *transfer_id,
                protocol: protocol.clone(),
            },
        );
        Ok(())
    }

    /// The carrying protocol reports a failed delivery: Pending -> Failed, refund
    pub fn report_delivery_failure(
        &self,
        relayer: &AccountId,
        protocol: &ProtocolId,
        transfer_id: &TransferId,
        reason: &str,
    ) -> Result<TransferRecord, RouterError> {
        self.access.require_any(relayer, &[Role::Relayer, Role::Admin])?;
        let record = self.refund_pending(transfer_id, Some(protocol), TransferStatus::Failed, |_| Ok(()))?;

        warn!("Transfer {} failed via {}: {}", transfer_id.short(), protocol, reason);
        self.events.emit(
            self.clock.now(),
            BridgeEvent::TransferFailed {
                transfer_id: *transfer_id,
                reason: reason.to_string(),
            },
        );
        Ok(record)
    }

    /// Roll back a transfer left Pending past the configured timeout
    pub fn expire_transfer(&self, transfer_id: &TransferId) -> Result<TransferRecord, RouterError> {
        let now = self.clock.now();
        let timeout = self.settings.transfer_timeout_secs;
        let record = self.refund_pending(transfer_id, None, TransferStatus::RolledBack, |record| {
            let expires_at = record.created_at.saturating_add(timeout);
            if now < expires_at {
                return Err(RouterError::NotExpired {
                    transfer_id: record.transfer_id,
                    expires_at,
                });
            }
            Ok(())
        })?;

        warn!("Transfer {} timed out and was rolled back", transfer_id.short());
        self.events.emit(
            now,
            BridgeEvent::TransferRolledBack {
                transfer_id: *transfer_id,
                reason: "timeout".to_string(),
            },
        );
        Ok(record)
    }

    /// Revoke a pending outbound transfer's id, refund the escrowed amount,
    /// then move it to `target`. The record stays Pending until the refund has
    /// landed; any failure restores the previous state.
    fn refund_pending<F>(
        &self,
        transfer_id: &TransferId,
        protocol: Option<&ProtocolId>,
        target: TransferStatus,
        precondition: F,
    ) -> Result<TransferRecord, RouterError>
    where
        F: FnOnce(&TransferRecord) -> Result<(), RouterError>,
    {
        let record = {
            let mut state = self.state.lock();
            let record = {
                let record = Self::pending_outbound(&mut state, transfer_id, protocol)?;
                precondition(record)?;
                record.clone()
            };
            state.resolving.insert(*transfer_id);
            record
        };

        let refunded = self.refund_escrow(&record);

        let mut state = self.state.lock();
        state.resolving.remove(transfer_id);
        refunded?;
        let current = state
            .transfers
            .get_mut(transfer_id)
            .ok_or(RouterError::UnknownTransfer(*transfer_id))?;
        current.status = target;
        current.updated_at = self.clock.now();
        Ok(current.clone())
    }

    fn refund_escrow(&self, record: &TransferRecord) -> Result<(), RouterError> {
        let id = record.transfer_id;
        let previous = self.replay.revoke(id);
        let mut uow = UnitOfWork::begin(
            format!("refund {}", id.short()),
            self.ledger.as_ref(),
            self.breaker.as_ref(),
        );
        uow.on_rollback("restore replay entry", move || {
            self.replay.restore_entry(id, previous);
        });
        uow.transfer(&self.settings.escrow(), &record.sender, record.amount)?;
        uow.commit();
        Ok(())
    }

    fn pending_outbound<'s>(
        state: &'s mut OrchestratorState,
        transfer_id: &TransferId,
        protocol: Option<&ProtocolId>,
    ) -> Result<&'s mut TransferRecord, RouterError> {
        if state.resolving.contains(transfer_id) {
            return Err(RouterError::ResolutionInProgress(*transfer_id));
        }
        let record = state
            .transfers
            .get_mut(transfer_id)
            .ok_or(RouterError::UnknownTransfer(*transfer_id))?;
        if record.direction != TransferDirection::Outbound || record.status != TransferStatus::Pending {
            return Err(RouterError::NotPending {
                transfer_id: *transfer_id,
                status: record.status,
            });
        }
        if let Some(protocol) = protocol {
            if &record.protocol != protocol {
                warn!(
                    "Resolution of {} via {} but carried by {} (possible attack)",
                    transfer_id.short(),
                    protocol,
                    record.protocol
                );
                return Err(RouterError::UntrustedSource {
                    protocol: protocol.clone(),
                    chain: record.destination_chain,
                });
            }
        }
        Ok(record)
    }

    // ---- inspection ----

    pub fn transfer(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        self.state.lock().transfers.get(transfer_id).cloned()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state.lock().transfers.values().cloned().collect()
    }

    pub fn transfers_with_status(&self, status: TransferStatus) -> Vec<TransferRecord> {
        self.state
            .lock()
            .transfers
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Last nonce allocated per sender
    pub fn sender_nonces(&self) -> BTreeMap<AccountId, u64> {
        self.state.lock().nonces.clone()
    }

    /// Reinstate transfer records and sender nonces from an export
    pub fn restore(&self, transfers: Vec<TransferRecord>, nonces: BTreeMap<AccountId, u64>) {
        let mut state = self.state.lock();
        state.transfers = transfers.into_iter().map(|r| (r.transfer_id, r)).collect();
        state.nonces = nonces;
        state.resolving.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ScriptedAdapter;
    use crate::fee_cache::FeeQuoteCache;
    use crate::protocol_registry::{ChainRoute, FeeParameters};
    use omniguard_core::{EventLog, InMemoryLedger, LedgerError, ManualClock};
    use crate::replay_guard::ReplayEntry;
    use omniguard_oracle::TripReason;

    type CreditHook = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

    /// Runs a one-shot hook before the next credit reaches the inner ledger
    struct HookedLedger {
        inner: Arc<InMemoryLedger>,
        hook: CreditHook,
    }

    impl Ledger for HookedLedger {
        fn debit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError> {
            self.inner.debit(account, amount)
        }

        fn credit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError> {
            let hook = self.hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.credit(account, amount)
        }

        fn expected_supply(&self) -> u128 {
            self.inner.expected_supply()
        }
    }

    struct Fixture {
        orchestrator: Arc<TransferOrchestrator>,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        log: Arc<EventLog>,
        breaker: Arc<CircuitBreaker>,
        admin: AccountId,
        relayer: AccountId,
        p1: Arc<ScriptedAdapter>,
        p2: Arc<ScriptedAdapter>,
    }

    const REMOTE: ChainId = ChainId(56);

    fn fixture() -> Fixture {
        fixture_with_ledger(|inner| inner)
    }

    fn fixture_with_ledger<W>(wrap: W) -> Fixture
    where
        W: FnOnce(Arc<InMemoryLedger>) -> Arc<dyn Ledger>,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let admin = AccountId::new("admin");
        let relayer = AccountId::new("relayer");
        let access = Arc::new(AccessControl::with_admin(admin.clone()));
        access.grant_role(&admin, relayer.clone(), Role::Relayer).unwrap();
        let log = Arc::new(EventLog::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(0));
        let breaker = Arc::new(CircuitBreaker::new(access.clone(), log.clone(), clock.clone()));
        let settings = RouterSettings::default();
        let registry = Arc::new(ProtocolRegistry::new(
            FeeQuoteCache::new(settings.fee_quote_ttl_secs, settings.amount_bucket_size),
            access.clone(),
            log.clone(),
            clock.clone(),
        ));

        let p1 = Arc::new(ScriptedAdapter::new(ProtocolKind::LayerZero, 10, 10));
        let p2 = Arc::new(ScriptedAdapter::new(ProtocolKind::Wormhole, 5, 60));
        registry
            .register_protocol(&admin, ProtocolId::new("p1"), p1.clone(), 9)
            .unwrap();
        registry
            .register_protocol(&admin, ProtocolId::new("p2"), p2.clone(), 7)
            .unwrap();
        for id in ["p1", "p2"] {
            registry
                .configure_chain_support(
                    &admin,
                    &ProtocolId::new(id),
                    REMOTE,
                    Some(ChainRoute {
                        trusted_peer: format!("{}-router", id).into_bytes(),
                    }),
                )
                .unwrap();
        }

        ledger.set_balance(AccountId::new("alice"), 1_000);
        ledger.set_balance(settings.escrow(), 10_000);

        let orchestrator = Arc::new(TransferOrchestrator::new(
            settings,
            registry,
            Arc::new(ReplayGuard::new()),
            wrap(ledger.clone()),
            breaker.clone(),
            access,
            log.clone(),
            clock.clone(),
        ));
        Fixture {
            orchestrator,
            ledger,
            clock,
            log,
            breaker,
            admin,
            relayer,
            p1,
            p2,
        }
    }

    fn request(amount: u128, fee_budget: u128) -> TransferRequest {
        TransferRequest {
            sender: AccountId::new("alice"),
            recipient: AccountId::new("bob"),
            destination_chain: REMOTE,
            amount,
            fee_budget,
        }
    }

    fn inbound_payload(protocol: &str, nonce: u64, amount: u128) -> Vec<u8> {
        TransferPayload::new(
            AccountId::new("carol"),
            AccountId::new("dave"),
            amount,
            REMOTE,
            ChainId(1),
            ProtocolId::new(protocol),
            nonce,
        )
        .encode()
        .unwrap()
    }

    #[test]
    fn test_bridge_locks_funds_and_refunds_budget() {
        let f = fixture();
        let receipt = f
            .orchestrator
            .bridge(&ProtocolId::new("p1"), request(100, 25))
            .unwrap();

        assert_eq!(receipt.fee_charged, 10);
        assert_eq!(receipt.fee_refund, 15);
        assert_eq!(f.ledger.balance_of(&AccountId::new("alice")), 890);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:escrow")), 10_100);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:fees")), 10);

        let record = f.orchestrator.transfer(&receipt.transfer_id).unwrap();
        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(f.p1.sent().len(), 1);
        assert_eq!(f.log.count("bridge_initiated"), 1);
    }

    #[test]
    fn test_adapter_failure_rolls_back_everything() {
        let f = fixture();
        f.p1.fail_sends(true);

        let err = f
            .orchestrator
            .bridge(&ProtocolId::new("p1"), request(100, 10))
            .unwrap_err();
        assert!(matches!(err, RouterError::AdapterFailure { .. }));
        assert_eq!(f.ledger.balance_of(&AccountId::new("alice")), 1_000);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:escrow")), 10_000);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:fees")), 0);
        assert!(f.orchestrator.transfers().is_empty());
        assert!(f.orchestrator.replay_guard().is_empty());
        assert!(f.breaker.is_armed());
    }

    #[test]
    fn test_bridge_validation() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");

        assert!(matches!(
            f.orchestrator.bridge(&p1, request(0, 10)),
            Err(RouterError::InvalidAmount(_))
        ));
        let mut no_recipient = request(10, 10);
        no_recipient.recipient = AccountId::new("");
        assert!(matches!(
            f.orchestrator.bridge(&p1, no_recipient),
            Err(RouterError::InvalidRecipient(_))
        ));
        assert!(matches!(
            f.orchestrator.bridge(&p1, request(10, 9)),
            Err(RouterError::FeeBudgetExceeded { fee: 10, budget: 9 })
        ));
        assert!(matches!(
            f.orchestrator.bridge(&p1, request(2_000, 10)),
            Err(RouterError::Ledger(LedgerError::InsufficientBalance { .. }))
        ));
        assert!(f.orchestrator.replay_guard().is_empty());
    }

    #[test]
    fn test_tripped_breaker_blocks_initiation_until_reset() {
        let f = fixture();
        f.breaker.trip(TripReason::Manual {
            by: f.admin.clone(),
        });

        assert!(matches!(
            f.orchestrator.bridge(&ProtocolId::new("p1"), request(10, 10)),
            Err(RouterError::BridgePaused(_))
        ));
        assert!(matches!(
            f.orchestrator.bridge_auto(RoutePreference::Cheapest, request(10, 10)),
            Err(RouterError::BridgePaused(_))
        ));

        f.breaker.reset(&f.admin).unwrap();
        assert!(f.orchestrator.bridge(&ProtocolId::new("p1"), request(10, 10)).is_ok());
    }

    #[test]
    fn test_bridge_auto_uses_preference() {
        let f = fixture();
        let cheapest = f
            .orchestrator
            .bridge_auto(RoutePreference::Cheapest, request(100, 20))
            .unwrap();
        assert_eq!(cheapest.protocol, ProtocolId::new("p2"));
        assert_eq!(cheapest.fee_refund, 15);

        let fastest = f
            .orchestrator
            .bridge_auto(RoutePreference::Fastest, request(100, 20))
            .unwrap();
        assert_eq!(fastest.protocol, ProtocolId::new("p1"));

        f.p1.fail_quotes(true);
        f.p2.fail_quotes(true);
        f.orchestrator.registry().fee_cache().clear();
        assert!(matches!(
            f.orchestrator.get_optimal_route(REMOTE, 100, RoutePreference::Fastest),
            Err(RouterError::NoAvailableRoute(_))
        ));
    }

    #[test]
    fn test_second_protocol_delivery_is_duplicate() {
        let f = fixture();
        let receipt = f
            .orchestrator
            .bridge(&ProtocolId::new("p1"), request(100, 10))
            .unwrap();
        let payload = f.p1.sent()[0].payload.clone();

        let err = f
            .orchestrator
            .handle_delivery(&f.relayer, &ProtocolId::new("p2"), REMOTE, b"p2-router", &payload)
            .unwrap_err();
        assert_eq!(err, RouterError::DuplicateTransferDetected(receipt.transfer_id));
        assert_eq!(
            f.orchestrator.transfer(&receipt.transfer_id).unwrap().status,
            TransferStatus::Pending
        );
        assert_eq!(f.log.count("duplicate_transfer_rejected"), 1);
    }

    #[test]
    fn test_inbound_delivery_releases_once() {
        let f = fixture();
        let payload = inbound_payload("p1", 1, 300);

        let id = f
            .orchestrator
            .handle_delivery(&f.relayer, &ProtocolId::new("p1"), REMOTE, b"p1-router", &payload)
            .unwrap();
        assert_eq!(f.ledger.balance_of(&AccountId::new("dave")), 300);
        assert_eq!(f.orchestrator.transfer(&id).unwrap().status, TransferStatus::Completed);

        // the same logical transfer raced through the other protocol
        assert!(matches!(
            f.orchestrator
                .handle_delivery(&f.relayer, &ProtocolId::new("p2"), REMOTE, b"p2-router", &payload),
            Err(RouterError::DuplicateTransferDetected(_))
        ));
        assert!(f
            .orchestrator
            .handle_delivery(&f.relayer, &ProtocolId::new("p1"), REMOTE, b"p1-router", &payload)
            .is_err());
        assert_eq!(f.ledger.balance_of(&AccountId::new("dave")), 300);
    }

    #[test]
    fn test_inbound_delivery_checks() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let payload = inbound_payload("p1", 2, 50);

        assert!(matches!(
            f.orchestrator
                .handle_delivery(&AccountId::new("nobody"), &p1, REMOTE, b"p1-router", &payload),
            Err(RouterError::Authorization(_))
        ));
        assert!(matches!(
            f.orchestrator.handle_delivery(&f.relayer, &p1, REMOTE, b"evil", &payload),
            Err(RouterError::UntrustedSource { .. })
        ));
        assert!(matches!(
            f.orchestrator
                .handle_delivery(&f.relayer, &p1, ChainId(137), b"p1-router", &payload),
            Err(RouterError::UntrustedSource { .. })
        ));
        assert!(matches!(
            f.orchestrator
                .handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", b"junk"),
            Err(RouterError::MalformedPayload(_))
        ));

        let elsewhere = TransferPayload::new(
            AccountId::new("carol"),
            AccountId::new("dave"),
            50,
            REMOTE,
            ChainId(137),
            p1.clone(),
            3,
        )
        .encode()
        .unwrap();
        assert!(matches!(
            f.orchestrator
                .handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", &elsewhere),
            Err(RouterError::WrongDestination { .. })
        ));

        // none of the rejections consumed the id
        assert!(f
            .orchestrator
            .handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", &payload)
            .is_ok());
    }

    #[test]
    fn test_failed_release_leaves_id_deliverable() {
        let f = fixture();
        f.ledger.set_balance(AccountId::new("omniguard:escrow"), 10);
        let payload = inbound_payload("p1", 4, 50);
        let p1 = ProtocolId::new("p1");

        assert!(matches!(
            f.orchestrator.handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", &payload),
            Err(RouterError::Ledger(_))
        ));
        assert!(f.orchestrator.replay_guard().is_empty());

        f.ledger.set_balance(AccountId::new("omniguard:escrow"), 100);
        assert!(f
            .orchestrator
            .handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", &payload)
            .is_ok());
    }

    #[test]
    fn test_acknowledge_completes_pending() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let receipt = f.orchestrator.bridge(&p1, request(100, 10)).unwrap();

        assert!(matches!(
            f.orchestrator
                .acknowledge_delivery(&f.relayer, &ProtocolId::new("p2"), &receipt.transfer_id),
            Err(RouterError::UntrustedSource { .. })
        ));
        f.orchestrator
            .acknowledge_delivery(&f.relayer, &p1, &receipt.transfer_id)
            .unwrap();
        assert_eq!(
            f.orchestrator.transfer(&receipt.transfer_id).unwrap().status,
            TransferStatus::Completed
        );
        assert!(matches!(
            f.orchestrator.acknowledge_delivery(&f.relayer, &p1, &receipt.transfer_id),
            Err(RouterError::NotPending { .. })
        ));
    }

    #[test]
    fn test_delivery_failure_refunds_and_revokes() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let receipt = f.orchestrator.bridge(&p1, request(100, 10)).unwrap();

        let record = f
            .orchestrator
            .report_delivery_failure(&f.relayer, &p1, &receipt.transfer_id, "destination reverted")
            .unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        // amount refunded, fee kept by the collector
        assert_eq!(f.ledger.balance_of(&AccountId::new("alice")), 990);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:escrow")), 10_000);

        let payload = f.p1.sent()[0].payload.clone();
        assert!(matches!(
            f.orchestrator.handle_delivery(&f.relayer, &p1, REMOTE, b"p1-router", &payload),
            Err(RouterError::DuplicateTransferDetected(_))
        ));
    }

    #[test]
    fn test_refund_in_flight_keeps_record_pending() {
        let hook: CreditHook = Arc::new(Mutex::new(None));
        let cell = hook.clone();
        let f = fixture_with_ledger(move |inner| {
            Arc::new(HookedLedger { inner, hook: cell }) as Arc<dyn Ledger>
        });
        let p1 = ProtocolId::new("p1");
        let receipt = f.orchestrator.bridge(&p1, request(100, 10)).unwrap();

        let observed = Arc::new(Mutex::new(None));
        {
            let orchestrator = f.orchestrator.clone();
            let observed = observed.clone();
            let relayer = f.relayer.clone();
            let id = receipt.transfer_id;
            *hook.lock() = Some(Box::new(move || {
                let status = orchestrator.transfer(&id).map(|r| r.status);
                let ack = orchestrator.acknowledge_delivery(&relayer, &ProtocolId::new("p1"), &id);
                let pending = orchestrator.transfers_with_status(TransferStatus::Pending).len();
                *observed.lock() = Some((status, ack, pending));
            }));
        }

        let record = f
            .orchestrator
            .report_delivery_failure(&f.relayer, &p1, &receipt.transfer_id, "destination reverted")
            .unwrap();
        assert_eq!(record.status, TransferStatus::Failed);

        let (status, ack, pending) = observed.lock().take().unwrap();
        assert_eq!(status, Some(TransferStatus::Pending));
        assert!(matches!(ack, Err(RouterError::ResolutionInProgress(_))));
        assert_eq!(pending, 1);
        assert_eq!(
            f.orchestrator.transfer(&receipt.transfer_id).unwrap().status,
            TransferStatus::Failed
        );
        assert_eq!(f.ledger.balance_of(&AccountId::new("alice")), 990);
    }

    #[test]
    fn test_failed_refund_leaves_transfer_pending() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let receipt = f.orchestrator.bridge(&p1, request(100, 10)).unwrap();
        let alice = AccountId::new("alice");
        f.ledger.set_balance(alice.clone(), u128::MAX);

        assert!(matches!(
            f.orchestrator
                .report_delivery_failure(&f.relayer, &p1, &receipt.transfer_id, "reverted"),
            Err(RouterError::Ledger(LedgerError::Overflow(_)))
        ));
        assert_eq!(
            f.orchestrator.transfer(&receipt.transfer_id).unwrap().status,
            TransferStatus::Pending
        );
        assert_eq!(
            f.orchestrator.replay_guard().entry(&receipt.transfer_id),
            Some(ReplayEntry::Claimed { protocol: p1.clone() })
        );
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:escrow")), 10_100);
        assert!(f.breaker.is_armed());

        // nothing is left claimed; the refund can be retried
        f.ledger.set_balance(alice.clone(), 890);
        f.orchestrator
            .report_delivery_failure(&f.relayer, &p1, &receipt.transfer_id, "reverted")
            .unwrap();
        assert_eq!(f.ledger.balance_of(&alice), 990);
    }

    #[test]
    fn test_expire_only_after_timeout() {
        let f = fixture();
        let receipt = f
            .orchestrator
            .bridge(&ProtocolId::new("p1"), request(100, 10))
            .unwrap();

        f.clock.advance(86_399);
        assert!(matches!(
            f.orchestrator.expire_transfer(&receipt.transfer_id),
            Err(RouterError::NotExpired { .. })
        ));
        assert_eq!(
            f.orchestrator.transfer(&receipt.transfer_id).unwrap().status,
            TransferStatus::Pending
        );

        f.clock.advance(1);
        let record = f.orchestrator.expire_transfer(&receipt.transfer_id).unwrap();
        assert_eq!(record.status, TransferStatus::RolledBack);
        assert_eq!(f.ledger.balance_of(&AccountId::new("alice")), 990);
        assert_eq!(f.log.count("transfer_rolled_back"), 1);
    }

    #[test]
    fn test_pending_transfers_resolve_while_paused_and_disabled() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let receipt = f.orchestrator.bridge(&p1, request(100, 10)).unwrap();

        f.orchestrator
            .registry()
            .set_enabled(&f.admin, &p1, false)
            .unwrap();
        f.breaker.pause(&f.admin).unwrap();

        f.orchestrator
            .acknowledge_delivery(&f.relayer, &p1, &receipt.transfer_id)
            .unwrap();
        assert!(matches!(
            f.orchestrator.bridge(&p1, request(100, 10)),
            Err(RouterError::BridgePaused(_))
        ));
    }

    #[test]
    fn test_fee_parameters_flow_into_charges() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        f.orchestrator
            .registry()
            .set_fee_parameters(
                &f.admin,
                &p1,
                FeeParameters {
                    flat_fee: 2,
                    markup_bps: 1_000,
                },
            )
            .unwrap();

        let receipt = f.orchestrator.bridge(&p1, request(100, 20)).unwrap();
        assert_eq!(receipt.fee_charged, 13);
        assert_eq!(f.ledger.balance_of(&AccountId::new("omniguard:fees")), 13);
    }

    #[test]
    fn test_nonces_make_repeat_transfers_distinct() {
        let f = fixture();
        let p1 = ProtocolId::new("p1");
        let first = f.orchestrator.bridge(&p1, request(10, 10)).unwrap();
        let second = f.orchestrator.bridge(&p1, request(10, 10)).unwrap();

        assert_ne!(first.transfer_id, second.transfer_id);
        assert_eq!(second.nonce, first.nonce + 1);
        assert_eq!(f.orchestrator.sender_nonces()[&AccountId::new("alice")], 2);
    }
}

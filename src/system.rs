// BRIDGE SYSTEM
// Wires the supply oracle and the transfer router around one breaker, one
// event log and one access-control table.
//
// SAFETY INVARIANTS:
// 1. Oracle and router observe the same CircuitBreaker instance, so a supply
//    deviation detected by reconciliation halts new transfers immediately
// 2. Every administrative entry point is gated by a role in AccessControl
// 3. Unpausing never happens implicitly

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use omniguard_core::{
    AccessControl, AccountId, ChainId, Clock, EventLog, Ledger, ProtocolId, Role, Settings,
    SystemClock,
};
use omniguard_oracle::{
    BreakerStatus, ChainSupplyRecord, CircuitBreaker, GlobalSupplySnapshot, OracleError,
    SupplyConsensusEngine,
};
use omniguard_router::{
    BridgeModule, ChainRoute, FeeParameters, FeeQuoteCache, ProtocolRegistry, ReplayGuard,
    TransferOrchestrator, TransferStatus, TwoPhaseCoordinator,
};

use crate::error::SystemError;

/// Point-in-time summary for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub breaker: BreakerStatus,
    pub trip_count: u64,
    pub healthy: bool,
    pub supply_records: usize,
    pub pending_rounds: usize,
    pub protocols: usize,
    pub pending_transfers: usize,
    pub latest_snapshot: Option<GlobalSupplySnapshot>,
}

pub struct BridgeSystem {
    settings: Settings,
    access: Arc<AccessControl>,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn Ledger>,
    breaker: Arc<CircuitBreaker>,
    oracle: SupplyConsensusEngine,
    registry: Arc<ProtocolRegistry>,
    orchestrator: Arc<TransferOrchestrator>,
    two_phase: TwoPhaseCoordinator,
}

impl BridgeSystem {
    /// Assemble a system with `admin` holding the Admin role
    pub fn new(
        settings: Settings,
        admin: AccountId,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SystemError> {
        settings.validate()?;

        let access = Arc::new(AccessControl::with_admin(admin.clone()));
        let events = Arc::new(EventLog::new());
        let breaker = Arc::new(CircuitBreaker::new(
            access.clone(),
            events.clone(),
            clock.clone(),
        ));
        let oracle = SupplyConsensusEngine::new(
            &settings,
            ledger.clone(),
            breaker.clone(),
            access.clone(),
            events.clone(),
            clock.clone(),
        );
        let registry = Arc::new(ProtocolRegistry::new(
            FeeQuoteCache::new(
                settings.router.fee_quote_ttl_secs,
                settings.router.amount_bucket_size,
            ),
            access.clone(),
            events.clone(),
            clock.clone(),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            settings.router.clone(),
            registry.clone(),
            Arc::new(ReplayGuard::new()),
            ledger.clone(),
            breaker.clone(),
            access.clone(),
            events.clone(),
            clock.clone(),
        ));
        let two_phase = TwoPhaseCoordinator::new(orchestrator.clone(), settings.two_phase.clone());

        info!(
            "Bridge system ready on chain {} (quorum {}, admin {})",
            settings.router.local_chain_id, settings.consensus.quorum, admin
        );
        Ok(BridgeSystem {
            settings,
            access,
            events,
            clock,
            ledger,
            breaker,
            oracle,
            registry,
            orchestrator,
            two_phase,
        })
    }

    /// Load settings through the config layer and run on the wall clock
    pub fn from_config(
        path: Option<&Path>,
        admin: AccountId,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self, SystemError> {
        let settings = Settings::load(path)?;
        Self::new(settings, admin, ledger, Arc::new(SystemClock))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn oracle(&self) -> &SupplyConsensusEngine {
        &self.oracle
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn two_phase(&self) -> &TwoPhaseCoordinator {
        &self.two_phase
    }

    // ---- administration ----

    pub fn grant_role(&self, caller: &AccountId, account: AccountId, role: Role) -> Result<(), SystemError> {
        self.access.grant_role(caller, account, role)?;
        Ok(())
    }

    pub fn revoke_role(&self, caller: &AccountId, account: &AccountId, role: Role) -> Result<bool, SystemError> {
        Ok(self.access.revoke_role(caller, account, role)?)
    }

    /// Guardian or Admin halt of new transfers
    pub fn pause(&self, caller: &AccountId) -> Result<bool, SystemError> {
        Ok(self.breaker.pause(caller)?)
    }

    /// Admin re-arm. Refused while the last reconciliation is still unhealthy
    /// unless a fresh reconciliation comes back clean.
    pub fn unpause(&self, caller: &AccountId) -> Result<bool, SystemError> {
        self.access.require(caller, Role::Admin)?;
        if self.breaker.is_armed() {
            return Ok(false);
        }
        if !self.oracle.is_healthy() {
            let snapshot = self.oracle.reconcile()?;
            if !snapshot.healthy {
                warn!(
                    "Unpause by {} refused: supply deviation {} still outstanding",
                    caller, snapshot.deviation
                );
                return Err(SystemError::Oracle(OracleError::IntegrityBreach(format!(
                    "supply deviation {} outstanding",
                    snapshot.deviation
                ))));
            }
        }
        Ok(self.breaker.reset(caller)?)
    }

    pub fn register_protocol(
        &self,
        caller: &AccountId,
        protocol_id: ProtocolId,
        adapter: Arc<dyn BridgeModule>,
        security_level: u8,
    ) -> Result<(), SystemError> {
        self.registry
            .register_protocol(caller, protocol_id, adapter, security_level)?;
        Ok(())
    }

    pub fn configure_chain_support(
        &self,
        caller: &AccountId,
        protocol_id: &ProtocolId,
        chain: ChainId,
        route: Option<ChainRoute>,
    ) -> Result<(), SystemError> {
        self.registry
            .configure_chain_support(caller, protocol_id, chain, route)?;
        Ok(())
    }

    pub fn set_fee_parameters(
        &self,
        caller: &AccountId,
        protocol_id: &ProtocolId,
        parameters: FeeParameters,
    ) -> Result<(), SystemError> {
        self.registry
            .set_fee_parameters(caller, protocol_id, parameters)?;
        Ok(())
    }

    pub fn emergency_override(
        &self,
        caller: &AccountId,
        chain: ChainId,
        total_supply: u128,
        locked_supply: u128,
    ) -> Result<ChainSupplyRecord, SystemError> {
        Ok(self
            .oracle
            .emergency_override(caller, chain, total_supply, locked_supply)?)
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            breaker: self.breaker.status(),
            trip_count: self.breaker.trip_count(),
            healthy: self.oracle.is_healthy(),
            supply_records: self.oracle.records().len(),
            pending_rounds: self.oracle.pending_rounds(),
            protocols: self.registry.descriptors().len(),
            pending_transfers: self
                .orchestrator
                .transfers_with_status(TransferStatus::Pending)
                .len(),
            latest_snapshot: self.oracle.snapshot(),
        }
    }
}

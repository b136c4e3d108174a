// THRESHOLD SUPPLY CONSENSUS ENGINE
// Signed per-chain supply observations -> quorum commit -> global reconciliation.
//
// SAFETY INVARIANTS:
// 1. A ChainSupplyRecord changes only when >= quorum distinct authorized reporters
//    agree (within tolerance) on the same (chain, nonce), or through an Admin
//    emergency override while the breaker is tripped
// 2. Committed nonces per chain are strictly increasing; resubmitting a committed
//    nonce is rejected and changes nothing
// 3. Rejected reports never change records, rounds or nonces
// 4. Reconciliation fails closed on corrupted records and trips the breaker on
//    deviation beyond tolerance; it never re-arms the breaker
// 5. Ledger reads and event emission happen outside the state lock

use ed25519_dalek::VerifyingKey;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use omniguard_core::{
    AccessControl, AccountId, BridgeEvent, ChainId, Clock, ConsensusSettings, EventSink, Ledger,
    ReporterId, Role, Settings,
};

use crate::accumulator::{ChainValue, Observation, PendingRound, RoundVerdict};
use crate::circuit_breaker::{CircuitBreaker, TripReason};
use crate::error::OracleError;
use crate::reconciliation::{reconcile_records, GlobalSupplySnapshot, SnapshotHistory};
use crate::report::{BatchSupplyReport, SupplyReport};
use crate::reporter_registry::{ReporterRecord, ReporterRegistry};

/// Committed supply view of one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSupplyRecord {
    pub chain_id: ChainId,
    pub total_supply: u128,
    pub locked_supply: u128,
    pub last_update_nonce: u64,
    pub last_update_time: u64,
}

impl ChainSupplyRecord {
    pub fn circulating(&self) -> Option<u128> {
        self.total_supply.checked_sub(self.locked_supply)
    }
}

/// A report that disagreed with a committed majority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectEntry {
    pub reporter_id: ReporterId,
    pub chain_id: ChainId,
    pub nonce: u64,
    pub total_supply: u128,
    pub locked_supply: u128,
    pub detected_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Accepted; quorum not reached yet
    Pending {
        chain_id: ChainId,
        nonce: u64,
        matching: usize,
        required: usize,
    },
    Committed(ChainSupplyRecord),
    BatchCommitted(Vec<ChainSupplyRecord>),
}

impl ReportOutcome {
    pub fn is_committed(&self) -> bool {
        !matches!(self, ReportOutcome::Pending { .. })
    }
}

#[derive(Debug)]
struct ConsensusState {
    reporters: ReporterRegistry,
    records: BTreeMap<ChainId, ChainSupplyRecord>,
    rounds: BTreeMap<(ChainId, u64), PendingRound>,
    batch_rounds: BTreeMap<u64, PendingRound>,
    suspects: Vec<SuspectEntry>,
    history: SnapshotHistory,
    last_reconciled: Option<u64>,
}

impl ConsensusState {
    fn committed_nonce(&self, chain: ChainId) -> Option<u64> {
        self.records.get(&chain).map(|r| r.last_update_nonce)
    }

    fn check_replay(&self, reporter: &ReporterId, chain: ChainId, nonce: u64) -> Result<(), OracleError> {
        if let Some(committed) = self.committed_nonce(chain) {
            if nonce <= committed {
                return Err(OracleError::ReplayedNonce { chain, nonce });
            }
        }
        self.reporters.check_nonce(reporter, chain, nonce)
    }

    /// Lazily drop rounds whose observations have all left the freshness window
    fn prune(&mut self, cutoff: u64) {
        self.rounds.retain(|_, round| round.retain_fresh(cutoff));
        self.batch_rounds.retain(|_, round| round.retain_fresh(cutoff));
    }

    /// Rounds for `chain` at or below a committed nonce can never commit
    fn discard_superseded(&mut self, chain: ChainId, nonce: u64) {
        self.rounds.retain(|(c, n), _| !(*c == chain && *n <= nonce));
        self.batch_rounds
            .retain(|n, round| !(*n <= nonce && round.covers(chain)));
    }
}

pub struct SupplyConsensusEngine {
    state: Mutex<ConsensusState>,
    settings: ConsensusSettings,
    deviation_tolerance: u128,
    ledger: Arc<dyn Ledger>,
    breaker: Arc<CircuitBreaker>,
    access: Arc<AccessControl>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl SupplyConsensusEngine {
    pub fn new(
        settings: &Settings,
        ledger: Arc<dyn Ledger>,
        breaker: Arc<CircuitBreaker>,
        access: Arc<AccessControl>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SupplyConsensusEngine {
            state: Mutex::new(ConsensusState {
                reporters: ReporterRegistry::new(),
                records: BTreeMap::new(),
                rounds: BTreeMap::new(),
                batch_rounds: BTreeMap::new(),
                suspects: Vec::new(),
                history: SnapshotHistory::new(settings.consensus.snapshot_history),
                last_reconciled: None,
            }),
            settings: settings.consensus.clone(),
            deviation_tolerance: settings.reconciliation.deviation_tolerance as u128,
            ledger,
            breaker,
            access,
            events,
            clock,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    // ---- reporter administration ----

    pub fn authorize_reporter(
        &self,
        caller: &AccountId,
        reporter: ReporterId,
        key: VerifyingKey,
    ) -> Result<(), OracleError> {
        self.access.require(caller, Role::Admin)?;
        self.state.lock().reporters.authorize(reporter, key)
    }

    pub fn revoke_reporter(&self, caller: &AccountId, reporter: &ReporterId) -> Result<bool, OracleError> {
        self.access.require(caller, Role::Admin)?;
        Ok(self.state.lock().reporters.revoke(reporter))
    }

    pub fn reporter(&self, reporter: &ReporterId) -> Option<ReporterRecord> {
        self.state.lock().reporters.get(reporter).cloned()
    }

    // ---- submission ----

    /// Accept one signed observation.
    ///
    /// Insufficient agreement is `Ok(ReportOutcome::Pending)`, not an error.
    pub fn submit_report(&self, report: SupplyReport) -> Result<ReportOutcome, OracleError> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let result = {
            let mut state = self.state.lock();
            let result = self.accept_report(&mut state, &report, now, &mut events);
            if result.is_err() {
                state.reporters.record_rejected(&report.reporter_id);
            }
            result
        };

        self.finish(
            result,
            &report.reporter_id,
            report.chain_id,
            report.nonce,
            now,
            events,
        )
    }

    /// Accept one signed multi-chain observation. Its chains commit together or not at all.
    pub fn submit_batch_report(&self, batch: BatchSupplyReport) -> Result<ReportOutcome, OracleError> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let result = {
            let mut state = self.state.lock();
            let result = self.accept_batch(&mut state, &batch, now, &mut events);
            if result.is_err() {
                state.reporters.record_rejected(&batch.reporter_id);
            }
            result
        };

        let chain = batch.entries.first().map(|e| e.chain_id).unwrap_or(ChainId(0));
        self.finish(result, &batch.reporter_id, chain, batch.nonce, now, events)
    }

    fn check_timing(&self, timestamp: u64, now: u64) -> Result<(), OracleError> {
        if timestamp > now.saturating_add(self.settings.max_future_skew_secs) {
            return Err(OracleError::FutureTimestamp { timestamp, now });
        }
        if now.saturating_sub(timestamp) > self.settings.freshness_window_secs {
            return Err(OracleError::ExpiredReport { timestamp, now });
        }
        Ok(())
    }

    fn accept_report(
        &self,
        state: &mut ConsensusState,
        report: &SupplyReport,
        now: u64,
        events: &mut Vec<BridgeEvent>,
    ) -> Result<ReportOutcome, OracleError> {
        report.validate()?;
        let key = state.reporters.active_key(&report.reporter_id)?;
        report.verify_signature(&key)?;
        self.check_timing(report.timestamp, now)?;
        state.check_replay(&report.reporter_id, report.chain_id, report.nonce)?;

        state.prune(now.saturating_sub(self.settings.freshness_window_secs));

        let key = (report.chain_id, report.nonce);
        let round = state.rounds.entry(key).or_default();
        if round.contains(&report.reporter_id) {
            return Err(OracleError::ReplayedNonce {
                chain: report.chain_id,
                nonce: report.nonce,
            });
        }
        round.insert(
            report.reporter_id.clone(),
            Observation {
                values: vec![ChainValue {
                    chain_id: report.chain_id,
                    total_supply: report.total_supply,
                    locked_supply: report.locked_supply,
                }],
                timestamp: report.timestamp,
            },
        );
        state
            .reporters
            .record_accepted(&report.reporter_id, report.chain_id, report.nonce);

        let verdict = round.evaluate(self.settings.quorum, self.settings.value_tolerance as u128);
        match verdict {
            RoundVerdict::Pending { matching, required } => {
                debug!(
                    "Chain {} nonce {}: {}/{} matching reports",
                    report.chain_id, report.nonce, matching, required
                );
                Ok(ReportOutcome::Pending {
                    chain_id: report.chain_id,
                    nonce: report.nonce,
                    matching,
                    required,
                })
            }
            RoundVerdict::Commit {
                values,
                supporters,
                dissenters,
            } => {
                let round = state.rounds.remove(&key).unwrap_or_default();
                let mut committed =
                    Self::apply_commit(state, &round, values, &supporters, &dissenters, report.nonce, now, events);
                match committed.pop() {
                    Some(record) => Ok(ReportOutcome::Committed(record)),
                    None => Err(OracleError::IntegrityBreach(
                        "quorum commit produced no record".to_string(),
                    )),
                }
            }
        }
    }

    fn accept_batch(
        &self,
        state: &mut ConsensusState,
        batch: &BatchSupplyReport,
        now: u64,
        events: &mut Vec<BridgeEvent>,
    ) -> Result<ReportOutcome, OracleError> {
        batch.validate()?;
        let key = state.reporters.active_key(&batch.reporter_id)?;
        batch.verify_signature(&key)?;
        self.check_timing(batch.timestamp, now)?;
        for chain in batch.chains() {
            state.check_replay(&batch.reporter_id, chain, batch.nonce)?;
        }

        state.prune(now.saturating_sub(self.settings.freshness_window_secs));

        let round = state.batch_rounds.entry(batch.nonce).or_default();
        if round.contains(&batch.reporter_id) {
            return Err(OracleError::ReplayedNonce {
                chain: batch.entries[0].chain_id,
                nonce: batch.nonce,
            });
        }
        round.insert(
            batch.reporter_id.clone(),
            Observation {
                values: batch
                    .entries
                    .iter()
                    .map(|e| ChainValue {
                        chain_id: e.chain_id,
                        total_supply: e.total_supply,
                        locked_supply: e.locked_supply,
                    })
                    .collect(),
                timestamp: batch.timestamp,
            },
        );
        for chain in batch.chains() {
            state.reporters.record_accepted(&batch.reporter_id, chain, batch.nonce);
        }

        let verdict = round.evaluate(self.settings.quorum, self.settings.value_tolerance as u128);
        match verdict {
            RoundVerdict::Pending { matching, required } => Ok(ReportOutcome::Pending {
                chain_id: batch.entries[0].chain_id,
                nonce: batch.nonce,
                matching,
                required,
            }),
            RoundVerdict::Commit {
                values,
                supporters,
                dissenters,
            } => {
                let round = state.batch_rounds.remove(&batch.nonce).unwrap_or_default();
                let committed =
                    Self::apply_commit(state, &round, values, &supporters, &dissenters, batch.nonce, now, events);
                info!(
                    "Batch nonce {} committed {} chains",
                    batch.nonce,
                    committed.len()
                );
                Ok(ReportOutcome::BatchCommitted(committed))
            }
        }
    }

    /// Write every committed chain value under the held lock and log dissent.
    #[allow(clippy::too_many_arguments)]
    fn apply_commit(
        state: &mut ConsensusState,
        round: &PendingRound,
        values: Vec<ChainValue>,
        supporters: &[ReporterId],
        dissenters: &[ReporterId],
        nonce: u64,
        now: u64,
        events: &mut Vec<BridgeEvent>,
    ) -> Vec<ChainSupplyRecord> {
        let mut committed = Vec::with_capacity(values.len());

        for value in values {
            let record = ChainSupplyRecord {
                chain_id: value.chain_id,
                total_supply: value.total_supply,
                locked_supply: value.locked_supply,
                last_update_nonce: nonce,
                last_update_time: now,
            };
            info!(
                "Supply committed for chain {} at nonce {}: total {} locked {} ({} reporters)",
                record.chain_id,
                nonce,
                record.total_supply,
                record.locked_supply,
                supporters.len()
            );
            state.records.insert(record.chain_id, record.clone());
            state.discard_superseded(record.chain_id, nonce);
            events.push(BridgeEvent::SupplyUpdated {
                chain: record.chain_id,
                total_supply: record.total_supply,
                locked_supply: record.locked_supply,
                timestamp: now,
            });
            committed.push(record);
        }

        for dissenter in dissenters {
            let Some(observation) = round.observation(dissenter) else {
                continue;
            };
            state.reporters.record_suspect(dissenter);
            for value in &observation.values {
                warn!(
                    "Suspect report from {} for chain {} nonce {}: total {} locked {} disagrees with quorum",
                    dissenter, value.chain_id, nonce, value.total_supply, value.locked_supply
                );
                state.suspects.push(SuspectEntry {
                    reporter_id: dissenter.clone(),
                    chain_id: value.chain_id,
                    nonce,
                    total_supply: value.total_supply,
                    locked_supply: value.locked_supply,
                    detected_at: now,
                });
                events.push(BridgeEvent::SuspectReport {
                    reporter: dissenter.clone(),
                    chain: value.chain_id,
                    nonce,
                    total_supply: value.total_supply,
                    locked_supply: value.locked_supply,
                });
            }
        }

        committed
    }

    /// Emit collected events, log rejections, and run a scheduled reconciliation.
    fn finish(
        &self,
        result: Result<ReportOutcome, OracleError>,
        reporter: &ReporterId,
        chain: ChainId,
        nonce: u64,
        now: u64,
        events: Vec<BridgeEvent>,
    ) -> Result<ReportOutcome, OracleError> {
        for event in events {
            self.events.emit(now, event);
        }

        match result {
            Err(err) => {
                warn!(
                    "Rejected report from {} for chain {} nonce {} (possible attack): {} [{}]",
                    reporter,
                    chain,
                    nonce,
                    err,
                    err.category().as_str()
                );
                self.events.emit(
                    now,
                    BridgeEvent::ReportRejected {
                        reporter: reporter.clone(),
                        chain,
                        nonce,
                        reason: err.to_string(),
                    },
                );
                Err(err)
            }
            Ok(outcome) => {
                if outcome.is_committed() && self.reconciliation_due(now) {
                    // a failed reconciliation trips the breaker; the commit itself stands
                    if let Err(err) = self.reconcile() {
                        error!("Scheduled reconciliation failed: {}", err);
                    }
                }
                Ok(outcome)
            }
        }
    }

    fn reconciliation_due(&self, now: u64) -> bool {
        let interval = self.settings.reconciliation_interval_secs;
        if interval == 0 {
            return false;
        }
        match self.state.lock().last_reconciled {
            None => true,
            Some(last) => now.saturating_sub(last) >= interval,
        }
    }

    // ---- reconciliation ----

    /// Compare committed circulating supply with the ledger's expected supply.
    ///
    /// A deviation beyond tolerance is reported through an unhealthy snapshot and
    /// a tripped breaker. A corrupted record is an error.
    pub fn reconcile(&self) -> Result<GlobalSupplySnapshot, OracleError> {
        let expected = self.ledger.expected_supply();
        let now = self.clock.now();

        let result = {
            let mut state = self.state.lock();
            let result = reconcile_records(state.records.values(), expected, self.deviation_tolerance, now);
            if let Ok(snapshot) = &result {
                state.history.push(snapshot.clone());
                state.last_reconciled = Some(now);
            }
            result
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Reconciliation failed closed: {}", err);
                self.breaker
                    .trip(TripReason::IntegrityViolation(err.to_string()));
                return Err(err);
            }
        };

        if snapshot.healthy {
            info!(
                "Reconciled {} chains: actual {} expected {} deviation {}",
                snapshot.chain_count, snapshot.actual_supply, snapshot.expected_supply, snapshot.deviation
            );
        } else {
            error!(
                "SUPPLY MISMATCH: actual {} expected {} deviation {} exceeds tolerance {}",
                snapshot.actual_supply, snapshot.expected_supply, snapshot.deviation, self.deviation_tolerance
            );
            self.events.emit(
                now,
                BridgeEvent::SupplyMismatchDetected {
                    expected: snapshot.expected_supply,
                    actual: snapshot.actual_supply,
                    deviation: snapshot.deviation,
                },
            );
            self.breaker.trip(TripReason::SupplyDeviation {
                expected: snapshot.expected_supply,
                actual: snapshot.actual_supply,
                deviation: snapshot.deviation,
            });
        }

        Ok(snapshot)
    }

    /// Overwrite one chain record while the bridge is halted. Admin only.
    ///
    /// The record's nonce is kept so normal consensus resumes where it left off.
    pub fn emergency_override(
        &self,
        caller: &AccountId,
        chain: ChainId,
        total_supply: u128,
        locked_supply: u128,
    ) -> Result<ChainSupplyRecord, OracleError> {
        self.access.require(caller, Role::Admin)?;
        if self.breaker.is_armed() {
            return Err(OracleError::BreakerNotTripped);
        }
        if locked_supply > total_supply {
            return Err(OracleError::InvalidReport(format!(
                "locked supply {} exceeds total supply {}",
                locked_supply, total_supply
            )));
        }

        let now = self.clock.now();
        let record = {
            let mut state = self.state.lock();
            let nonce = state.committed_nonce(chain).unwrap_or(0);
            let record = ChainSupplyRecord {
                chain_id: chain,
                total_supply,
                locked_supply,
                last_update_nonce: nonce,
                last_update_time: now,
            };
            state.records.insert(chain, record.clone());
            record
        };

        warn!(
            "EMERGENCY OVERRIDE by {} on chain {}: total {} locked {}",
            caller, chain, total_supply, locked_supply
        );
        self.events.emit(
            now,
            BridgeEvent::EmergencyOverride {
                by: caller.clone(),
                chain,
            },
        );
        self.events.emit(
            now,
            BridgeEvent::SupplyUpdated {
                chain,
                total_supply,
                locked_supply,
                timestamp: now,
            },
        );
        Ok(record)
    }

    // ---- inspection ----

    pub fn record(&self, chain: ChainId) -> Option<ChainSupplyRecord> {
        self.state.lock().records.get(&chain).cloned()
    }

    pub fn records(&self) -> Vec<ChainSupplyRecord> {
        self.state.lock().records.values().cloned().collect()
    }

    /// Latest global snapshot
    pub fn snapshot(&self) -> Option<GlobalSupplySnapshot> {
        self.state.lock().history.latest().cloned()
    }

    pub fn snapshot_history(&self) -> Vec<GlobalSupplySnapshot> {
        self.state.lock().history.to_vec()
    }

    /// Health per the latest reconciliation (healthy until the first one runs)
    pub fn is_healthy(&self) -> bool {
        self.snapshot().map(|s| s.healthy).unwrap_or(true)
    }

    pub fn suspects(&self) -> Vec<SuspectEntry> {
        self.state.lock().suspects.clone()
    }

    pub fn pending_rounds(&self) -> usize {
        let state = self.state.lock();
        state.rounds.len() + state.batch_rounds.len()
    }

    /// Reinstate committed records from an export
    pub fn restore_records(&self, records: Vec<ChainSupplyRecord>) {
        let mut state = self.state.lock();
        state.records = records.into_iter().map(|r| (r.chain_id, r)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::BatchEntry;
    use ed25519_dalek::SigningKey;
    use omniguard_core::{EventLog, InMemoryLedger, ManualClock};

    const START: u64 = 1_700_000_000;

    struct Harness {
        engine: SupplyConsensusEngine,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        log: Arc<EventLog>,
        admin: AccountId,
    }

    fn signer(name: &str) -> SigningKey {
        SigningKey::from_bytes(&[name.as_bytes()[0]; 32])
    }

    fn harness(settings: Settings) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let admin = AccountId::new("admin");
        let access = Arc::new(AccessControl::with_admin(admin.clone()));
        let log = Arc::new(EventLog::new());
        let clock = Arc::new(ManualClock::new(START));
        let ledger = Arc::new(InMemoryLedger::new(5_000_000_000));
        let breaker = Arc::new(CircuitBreaker::new(access.clone(), log.clone(), clock.clone()));
        let engine = SupplyConsensusEngine::new(
            &settings,
            ledger.clone(),
            breaker.clone(),
            access,
            log.clone(),
            clock.clone(),
        );
        for name in ["a", "b", "c", "d"] {
            engine
                .authorize_reporter(&admin, ReporterId::new(name), signer(name).verifying_key())
                .unwrap();
        }
        Harness {
            engine,
            breaker,
            ledger,
            clock,
            log,
            admin,
        }
    }

    fn report(name: &str, chain: u64, total: u128, locked: u128, nonce: u64, ts: u64) -> SupplyReport {
        SupplyReport::new(ReporterId::new(name), ChainId(chain), total, locked, nonce, ts).signed(&signer(name))
    }

    #[test]
    fn test_quorum_commit_and_replay_rejection() {
        let h = harness(Settings::default());

        for name in ["a", "b"] {
            let outcome = h.engine.submit_report(report(name, 56, 5_000_000, 0, 1000, START)).unwrap();
            assert!(matches!(outcome, ReportOutcome::Pending { .. }));
        }
        assert!(h.engine.record(ChainId(56)).is_none());

        let outcome = h.engine.submit_report(report("c", 56, 5_000_000, 0, 1000, START)).unwrap();
        match outcome {
            ReportOutcome::Committed(record) => {
                assert_eq!(record.total_supply, 5_000_000);
                assert_eq!(record.last_update_nonce, 1000);
            }
            other => panic!("expected commit, got {:?}", other),
        }

        let err = h
            .engine
            .submit_report(report("d", 56, 5_000_000, 0, 1000, START))
            .unwrap_err();
        assert!(matches!(err, OracleError::ReplayedNonce { nonce: 1000, .. }));
        assert_eq!(h.engine.record(ChainId(56)).unwrap().last_update_nonce, 1000);
        assert_eq!(h.log.count("supply_updated"), 1);
        assert_eq!(h.log.count("report_rejected"), 1);
    }

    #[test]
    fn test_unauthorized_and_forged_reports_are_rejected() {
        let h = harness(Settings::default());

        let stranger = SupplyReport::new(ReporterId::new("zed"), ChainId(1), 10, 0, 1, START)
            .signed(&signer("zed"));
        assert!(matches!(
            h.engine.submit_report(stranger),
            Err(OracleError::UnauthorizedReporter(_))
        ));

        // "a" signed with "b"'s key
        let forged = SupplyReport::new(ReporterId::new("a"), ChainId(1), 10, 0, 1, START)
            .signed(&signer("b"));
        assert!(matches!(
            h.engine.submit_report(forged),
            Err(OracleError::InvalidSignature(_))
        ));
        assert_eq!(h.engine.pending_rounds(), 0);
        assert_eq!(h.engine.reporter(&ReporterId::new("a")).unwrap().reports_rejected, 1);
    }

    #[test]
    fn test_timing_checks() {
        let h = harness(Settings::default());

        let future = report("a", 1, 10, 0, 1, START + 301);
        assert!(matches!(
            h.engine.submit_report(future),
            Err(OracleError::FutureTimestamp { .. })
        ));

        let old = report("a", 1, 10, 0, 1, START - 3_601);
        assert!(matches!(
            h.engine.submit_report(old),
            Err(OracleError::ExpiredReport { .. })
        ));

        assert!(h.engine.submit_report(report("a", 1, 10, 0, 1, START + 300)).is_ok());
    }

    #[test]
    fn test_reporter_nonce_must_increase() {
        let h = harness(Settings::default());
        h.engine.submit_report(report("a", 1, 10, 0, 5, START)).unwrap();

        assert!(matches!(
            h.engine.submit_report(report("a", 1, 10, 0, 5, START)),
            Err(OracleError::StaleNonce { .. })
        ));
        assert!(matches!(
            h.engine.submit_report(report("a", 1, 10, 0, 4, START)),
            Err(OracleError::StaleNonce { .. })
        ));
    }

    #[test]
    fn test_dissenter_is_logged_as_suspect() {
        let h = harness(Settings::default());
        h.engine.submit_report(report("d", 1, 999, 0, 1, START)).unwrap();
        for name in ["a", "b"] {
            h.engine.submit_report(report(name, 1, 100, 0, 1, START)).unwrap();
        }
        let outcome = h.engine.submit_report(report("c", 1, 100, 0, 1, START)).unwrap();
        assert!(outcome.is_committed());

        let suspects = h.engine.suspects();
        assert_eq!(suspects.len(), 1);
        assert_eq!(suspects[0].reporter_id, ReporterId::new("d"));
        assert_eq!(suspects[0].total_supply, 999);
        assert_eq!(h.log.count("suspect_report"), 1);
        assert_eq!(h.engine.reporter(&ReporterId::new("d")).unwrap().suspect_reports, 1);
    }

    #[test]
    fn test_expired_rounds_are_pruned() {
        let h = harness(Settings::default());
        h.engine.submit_report(report("a", 1, 10, 0, 1, START)).unwrap();
        assert_eq!(h.engine.pending_rounds(), 1);

        h.clock.advance(3_601);
        h.engine
            .submit_report(report("b", 2, 10, 0, 1, START + 3_601))
            .unwrap();
        assert_eq!(h.engine.pending_rounds(), 1);
    }

    #[test]
    fn test_batch_commits_all_chains_together() {
        let h = harness(Settings::default());
        let entries = vec![
            BatchEntry {
                chain_id: ChainId(1),
                total_supply: 3_000,
                locked_supply: 0,
            },
            BatchEntry {
                chain_id: ChainId(56),
                total_supply: 2_000,
                locked_supply: 100,
            },
        ];

        for name in ["a", "b"] {
            let batch = BatchSupplyReport::new(ReporterId::new(name), 7, START, entries.clone())
                .signed(&signer(name));
            assert!(!h.engine.submit_batch_report(batch).unwrap().is_committed());
        }
        assert!(h.engine.records().is_empty());

        let batch = BatchSupplyReport::new(ReporterId::new("c"), 7, START, entries)
            .signed(&signer("c"));
        match h.engine.submit_batch_report(batch).unwrap() {
            ReportOutcome::BatchCommitted(records) => assert_eq!(records.len(), 2),
            other => panic!("expected batch commit, got {:?}", other),
        }
        assert_eq!(h.engine.record(ChainId(56)).unwrap().locked_supply, 100);
        assert_eq!(h.engine.record(ChainId(1)).unwrap().last_update_nonce, 7);
    }

    #[test]
    fn test_batch_with_different_chain_sets_does_not_commit() {
        let h = harness(Settings::default());
        let one = |chain| BatchEntry {
            chain_id: ChainId(chain),
            total_supply: 10,
            locked_supply: 0,
        };

        for (name, entries) in [
            ("a", vec![one(1), one(2)]),
            ("b", vec![one(1), one(2)]),
            ("c", vec![one(1)]),
        ] {
            let batch = BatchSupplyReport::new(ReporterId::new(name), 3, START, entries)
                .signed(&signer(name));
            assert!(!h.engine.submit_batch_report(batch).unwrap().is_committed());
        }
        assert!(h.engine.records().is_empty());
    }

    fn commit_chain(h: &Harness, chain: u64, total: u128, nonce: u64) {
        for name in ["a", "b", "c"] {
            h.engine
                .submit_report(report(name, chain, total, 0, nonce, h.clock.now()))
                .unwrap();
        }
    }

    #[test]
    fn test_deviation_trips_breaker() {
        let h = harness(Settings::default());
        commit_chain(&h, 1, 3_000_000_000, 1);
        commit_chain(&h, 56, 2_050_000_001, 1);

        let snapshot = h.engine.reconcile().unwrap();
        assert_eq!(snapshot.deviation, 50_000_001);
        assert!(!snapshot.healthy);
        assert!(!h.breaker.is_armed());
        assert!(!h.engine.is_healthy());
        assert_eq!(h.log.count("supply_mismatch_detected"), 1);

        // a healthy reconciliation restores health but never re-arms
        h.ledger.set_expected_supply(5_050_000_001);
        assert!(h.engine.reconcile().unwrap().healthy);
        assert!(h.engine.is_healthy());
        assert!(!h.breaker.is_armed());
        assert_eq!(h.engine.snapshot_history().len(), 2);
    }

    #[test]
    fn test_commit_triggers_scheduled_reconciliation() {
        let mut settings = Settings::default();
        settings.consensus.reconciliation_interval_secs = 60;
        let h = harness(settings);

        commit_chain(&h, 1, 1_000, 1);
        // expected 5e9 vs actual 1000
        assert!(!h.breaker.is_armed());
        assert_eq!(h.engine.snapshot_history().len(), 1);

        // interval not elapsed: no second reconciliation
        commit_chain(&h, 1, 1_000, 2);
        assert_eq!(h.engine.snapshot_history().len(), 1);

        h.clock.advance(60);
        commit_chain(&h, 1, 1_000, 3);
        assert_eq!(h.engine.snapshot_history().len(), 2);
    }

    #[test]
    fn test_emergency_override_requires_tripped_breaker() {
        let h = harness(Settings::default());
        commit_chain(&h, 1, 1_000, 9);

        assert!(matches!(
            h.engine.emergency_override(&h.admin, ChainId(1), 5_000_000_000, 0),
            Err(OracleError::BreakerNotTripped)
        ));

        h.breaker.pause(&h.admin).unwrap();
        assert!(matches!(
            h.engine.emergency_override(&AccountId::new("mallory"), ChainId(1), 1, 0),
            Err(OracleError::Authorization(_))
        ));

        let record = h
            .engine
            .emergency_override(&h.admin, ChainId(1), 5_000_000_000, 0)
            .unwrap();
        assert_eq!(record.last_update_nonce, 9);
        assert!(h.engine.reconcile().unwrap().healthy);
        assert!(!h.breaker.is_armed());
        assert_eq!(h.log.count("emergency_override"), 1);
    }
}

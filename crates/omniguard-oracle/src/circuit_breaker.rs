// BRIDGE CIRCUIT BREAKER
// Global pause gate for new transfer initiation.
//
// SAFETY INVARIANTS:
// 1. Armed -> Tripped on a supply deviation, an integrity violation or a manual trip
// 2. Tripped -> Armed only through an explicit Admin reset, never automatically
// 3. The first trip reason is kept until reset (later trips do not overwrite it)
// 4. Pending transfers are not affected; only initiation is gated

use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use omniguard_core::{AccessControl, AccountId, BridgeEvent, Clock, EventSink, Role};

use crate::error::OracleError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    SupplyDeviation {
        expected: u128,
        actual: u128,
        deviation: u128,
    },
    /// A stored invariant no longer holds (fail closed)
    IntegrityViolation(String),
    Manual { by: AccountId },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::SupplyDeviation {
                expected,
                actual,
                deviation,
            } => write!(
                f,
                "supply deviation {} (expected {}, actual {})",
                deviation, expected, actual
            ),
            TripReason::IntegrityViolation(detail) => write!(f, "integrity violation: {}", detail),
            TripReason::Manual { by } => write!(f, "manual pause by {}", by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerStatus {
    Armed,
    Tripped { reason: TripReason, since: u64 },
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    trip_count: u64,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    access: Arc<AccessControl>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(access: Arc<AccessControl>, events: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            state: Mutex::new(BreakerState {
                status: BreakerStatus::Armed,
                trip_count: 0,
            }),
            access,
            events,
            clock,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        self.state.lock().status.clone()
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state.lock().status, BreakerStatus::Armed)
    }

    /// Reason for the current trip, if any
    pub fn trip_reason(&self) -> Option<TripReason> {
        match &self.state.lock().status {
            BreakerStatus::Armed => None,
            BreakerStatus::Tripped { reason, .. } => Some(reason.clone()),
        }
    }

    pub fn trip_count(&self) -> u64 {
        self.state.lock().trip_count
    }

    /// Trip the breaker. Returns false if it was already tripped.
    pub fn trip(&self, reason: TripReason) -> bool {
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            if let BreakerStatus::Tripped { reason: current, .. } = &state.status {
                warn!("Breaker already tripped ({}); ignoring {}", current, reason);
                return false;
            }
            state.status = BreakerStatus::Tripped {
                reason: reason.clone(),
                since: now,
            };
            state.trip_count += 1;
        }

        match &reason {
            TripReason::Manual { .. } => warn!("BRIDGE PAUSED: {}", reason),
            _ => error!("BRIDGE PAUSED: {}", reason),
        }
        self.events.emit(
            now,
            BridgeEvent::BridgePaused {
                reason: reason.to_string(),
            },
        );
        true
    }

    /// Manual trip by a Guardian or Admin
    pub fn pause(&self, caller: &AccountId) -> Result<bool, OracleError> {
        self.access.require_any(caller, &[Role::Admin, Role::Guardian])?;
        Ok(self.trip(TripReason::Manual { by: caller.clone() }))
    }

    /// Re-arm. Admin only. Returns false if the breaker was not tripped.
    pub fn reset(&self, caller: &AccountId) -> Result<bool, OracleError> {
        self.access.require(caller, Role::Admin)?;
        {
            let mut state = self.state.lock();
            if state.status == BreakerStatus::Armed {
                return Ok(false);
            }
            state.status = BreakerStatus::Armed;
        }

        info!("Bridge re-armed by {}", caller);
        self.events.emit(
            self.clock.now(),
            BridgeEvent::BridgeUnpaused { by: caller.clone() },
        );
        Ok(true)
    }

    /// Reinstate state from an export
    pub fn restore(&self, status: BreakerStatus, trip_count: u64) {
        let mut state = self.state.lock();
        state.status = status;
        state.trip_count = trip_count;
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniguard_core::{EventLog, ManualClock};

    fn setup() -> (CircuitBreaker, Arc<EventLog>, AccountId) {
        let admin = AccountId::new("admin");
        let access = Arc::new(AccessControl::with_admin(admin.clone()));
        let log = Arc::new(EventLog::new());
        let breaker = CircuitBreaker::new(access, log.clone(), Arc::new(ManualClock::new(10)));
        (breaker, log, admin)
    }

    #[test]
    fn test_trip_keeps_first_reason() {
        let (breaker, log, _) = setup();
        assert!(breaker.trip(TripReason::IntegrityViolation("first".into())));
        assert!(!breaker.trip(TripReason::IntegrityViolation("second".into())));

        assert_eq!(
            breaker.trip_reason(),
            Some(TripReason::IntegrityViolation("first".into()))
        );
        assert_eq!(breaker.trip_count(), 1);
        assert_eq!(log.count("bridge_paused"), 1);
    }

    #[test]
    fn test_reset_requires_admin() {
        let (breaker, log, admin) = setup();
        breaker.trip(TripReason::Manual { by: admin.clone() });

        assert!(breaker.reset(&AccountId::new("mallory")).is_err());
        assert!(!breaker.is_armed());

        assert!(breaker.reset(&admin).unwrap());
        assert!(breaker.is_armed());
        assert!(!breaker.reset(&admin).unwrap());
        assert_eq!(log.count("bridge_unpaused"), 1);
    }

    #[test]
    fn test_guardian_can_pause_but_not_reset() {
        let admin = AccountId::new("admin");
        let guardian = AccountId::new("guardian");
        let access = Arc::new(AccessControl::with_admin(admin.clone()));
        access.grant_role(&admin, guardian.clone(), Role::Guardian).unwrap();
        let breaker = CircuitBreaker::new(
            access,
            Arc::new(EventLog::new()),
            Arc::new(ManualClock::new(0)),
        );

        assert!(breaker.pause(&guardian).unwrap());
        assert!(matches!(
            breaker.reset(&guardian),
            Err(OracleError::Authorization(_))
        ));
        assert!(breaker.pause(&AccountId::new("nobody")).is_err());
    }
}

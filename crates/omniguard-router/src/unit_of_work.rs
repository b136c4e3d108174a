// UNIT OF WORK
// Begin / commit / rollback wrapper around a sequence of ledger mutations.
//
// SAFETY INVARIANTS:
// 1. Every applied step registers its compensation before the next step runs
// 2. Rollback runs compensations in reverse order
// 3. A unit that is dropped without commit rolls back
// 4. A failing compensation trips the breaker (state can no longer be trusted)

use log::{debug, error};

use omniguard_core::{AccountId, Ledger};
use omniguard_oracle::{CircuitBreaker, TripReason};

use crate::error::RouterError;

type Compensation<'a> = Box<dyn FnOnce() -> Result<(), String> + 'a>;

pub struct UnitOfWork<'a> {
    label: String,
    ledger: &'a dyn Ledger,
    breaker: &'a CircuitBreaker,
    compensations: Vec<(String, Compensation<'a>)>,
    finished: bool,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(label: impl Into<String>, ledger: &'a dyn Ledger, breaker: &'a CircuitBreaker) -> Self {
        UnitOfWork {
            label: label.into(),
            ledger,
            breaker,
            compensations: Vec::new(),
            finished: false,
        }
    }

    pub fn debit(&mut self, account: &AccountId, amount: u128) -> Result<(), RouterError> {
        if amount == 0 {
            return Ok(());
        }
        self.ledger.debit(account, amount)?;
        let ledger = self.ledger;
        let account = account.clone();
        self.compensations.push((
            format!("re-credit {} to {}", amount, account),
            Box::new(move || ledger.credit(&account, amount).map_err(|e| e.to_string())),
        ));
        Ok(())
    }

    pub fn credit(&mut self, account: &AccountId, amount: u128) -> Result<(), RouterError> {
        if amount == 0 {
            return Ok(());
        }
        self.ledger.credit(account, amount)?;
        let ledger = self.ledger;
        let account = account.clone();
        self.compensations.push((
            format!("re-debit {} from {}", amount, account),
            Box::new(move || ledger.debit(&account, amount).map_err(|e| e.to_string())),
        ));
        Ok(())
    }

    /// Move `amount` between two accounts as two compensated steps
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: u128) -> Result<(), RouterError> {
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    /// Register a non-ledger undo step
    pub fn on_rollback(&mut self, description: impl Into<String>, undo: impl FnOnce() + 'a) {
        self.compensations.push((
            description.into(),
            Box::new(move || {
                undo();
                Ok(())
            }),
        ));
    }

    pub fn commit(mut self) {
        debug!("{}: committed {} steps", self.label, self.compensations.len());
        self.compensations.clear();
        self.finished = true;
    }

    /// Undo everything applied so far. Returns an error if any compensation failed.
    pub fn rollback(mut self) -> Result<(), RouterError> {
        self.run_compensations()
    }

    fn run_compensations(&mut self) -> Result<(), RouterError> {
        self.finished = true;
        let mut failures = Vec::new();
        while let Some((description, undo)) = self.compensations.pop() {
            if let Err(reason) = undo() {
                error!("{}: compensation '{}' failed: {}", self.label, description, reason);
                failures.push(format!("{}: {}", description, reason));
            }
        }

        if failures.is_empty() {
            debug!("{}: rolled back", self.label);
            return Ok(());
        }

        let detail = format!("{} rollback incomplete: {}", self.label, failures.join("; "));
        self.breaker.trip(TripReason::IntegrityViolation(detail.clone()));
        Err(RouterError::IntegrityBreach(detail))
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.run_compensations();
        }
    }
}

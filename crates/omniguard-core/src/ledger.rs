// LEDGER CAPABILITY
// Narrow interface to the external balance ledger.
//
// SAFETY INVARIANTS:
// 1. debit and credit are individually atomic: they either apply fully or not at all
// 2. debit never drives a balance negative (fails with InsufficientBalance)
// 3. expected_supply is the canonical supply the oracle reconciles against

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::types::AccountId;

/// Balance bookkeeping owned by an external collaborator
pub trait Ledger: Send + Sync {
    fn debit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError>;

    fn credit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError>;

    /// Canonical total supply of the asset
    fn expected_supply(&self) -> u128;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LedgerBook {
    balances: BTreeMap<AccountId, u128>,
    expected_supply: u128,
}

/// Reference ledger used by tests and local simulations
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: Mutex<LedgerBook>,
}

impl InMemoryLedger {
    pub fn new(expected_supply: u128) -> Self {
        InMemoryLedger {
            book: Mutex::new(LedgerBook {
                balances: BTreeMap::new(),
                expected_supply,
            }),
        }
    }

    pub fn balance_of(&self, account: &AccountId) -> u128 {
        self.book.lock().balances.get(account).copied().unwrap_or(0)
    }

    /// Seed a balance directly (genesis allocation)
    pub fn set_balance(&self, account: AccountId, amount: u128) {
        self.book.lock().balances.insert(account, amount);
    }

    pub fn set_expected_supply(&self, supply: u128) {
        self.book.lock().expected_supply = supply;
    }

    /// Sum of all balances held by this ledger
    pub fn total_balances(&self) -> u128 {
        self.book
            .lock()
            .balances
            .values()
            .fold(0u128, |acc, b| acc.saturating_add(*b))
    }
}

impl Ledger for InMemoryLedger {
    fn debit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError> {
        let mut book = self.book.lock();
        let available = book.balances.get(account).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                available,
                requested: amount,
            });
        }
        book.balances.insert(account.clone(), available - amount);
        Ok(())
    }

    fn credit(&self, account: &AccountId, amount: u128) -> Result<(), LedgerError> {
        let mut book = self.book.lock();
        let current = book.balances.get(account).copied().unwrap_or(0);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(account.clone()))?;
        book.balances.insert(account.clone(), updated);
        Ok(())
    }

    fn expected_supply(&self) -> u128 {
        self.book.lock().expected_supply
    }
}

//! Balance store interface
//!
//! The engine never owns balances; it only checks, debits and credits them
//! through [`BalanceStore`]. [`InMemoryBalanceStore`] backs the demo binary
//! and the tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

use crate::error::BalanceError;
use crate::types::{Amount, BettorId};

/// Result of an idempotent credit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Funds moved
    Applied,
    /// A credit with the same key was already applied; nothing moved
    Duplicate,
}

/// External balance storage, atomic at its own boundary
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current spendable balance
    async fn check_balance(&self, bettor_id: &BettorId) -> Result<Amount, BalanceError>;

    /// Remove `amount`; fails without side effects if funds are short
    async fn debit(&self, bettor_id: &BettorId, amount: Amount) -> Result<(), BalanceError>;

    /// Add `amount` at most once per `idempotency_key`
    async fn credit(
        &self,
        bettor_id: &BettorId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<CreditOutcome, BalanceError>;
}

/// Process-local balance store
#[derive(Default)]
pub struct InMemoryBalanceStore {
    balances: RwLock<HashMap<BettorId, Amount>>,
    applied_credits: RwLock<HashSet<String>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an account (admin top-up), creating it if needed
    pub fn deposit(&self, bettor_id: &BettorId, amount: Amount) {
        if let Ok(mut balances) = self.balances.write() {
            *balances.entry(bettor_id.clone()).or_insert(0.0) += amount;
        }
    }

    pub fn balance_of(&self, bettor_id: &BettorId) -> Amount {
        self.balances
            .read()
            .ok()
            .and_then(|b| b.get(bettor_id).copied())
            .unwrap_or(0.0)
    }

    /// Sum of all balances
    pub fn total(&self) -> Amount {
        self.balances
            .read()
            .map(|b| b.values().sum())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn check_balance(&self, bettor_id: &BettorId) -> Result<Amount, BalanceError> {
        Ok(self.balance_of(bettor_id))
    }

    async fn debit(&self, bettor_id: &BettorId, amount: Amount) -> Result<(), BalanceError> {
        let mut balances = self
            .balances
            .write()
            .map_err(|_| BalanceError::Unreachable("balance lock poisoned".to_string()))?;
        let balance = balances
            .get_mut(bettor_id)
            .ok_or_else(|| BalanceError::UnknownAccount(bettor_id.clone()))?;
        if *balance < amount {
            return Err(BalanceError::InsufficientFunds {
                bettor_id: bettor_id.clone(),
                available: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        debug!(bettor_id = %bettor_id, amount = amount, balance = *balance, "Debited");
        Ok(())
    }

    async fn credit(
        &self,
        bettor_id: &BettorId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<CreditOutcome, BalanceError> {
        // Key check and balance update under one lock order: credits, then balances.
        let mut applied = self
            .applied_credits
            .write()
            .map_err(|_| BalanceError::Unreachable("credit journal poisoned".to_string()))?;
        if applied.contains(idempotency_key) {
            return Ok(CreditOutcome::Duplicate);
        }
        let mut balances = self
            .balances
            .write()
            .map_err(|_| BalanceError::Unreachable("balance lock poisoned".to_string()))?;
        *balances.entry(bettor_id.clone()).or_insert(0.0) += amount;
        applied.insert(idempotency_key.to_string());
        debug!(bettor_id = %bettor_id, amount = amount, key = %idempotency_key, "Credited");
        Ok(CreditOutcome::Applied)
    }
}

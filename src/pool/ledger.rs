use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::LedgerError;
use crate::types::{Amount, MarketId, OutcomeId, Pool};

/// Authoritative per-market stake totals.
///
/// Each market's pool is its own versioned record behind its own lock, so
/// independent markets never contend. Mutation is compare-and-swap on the
/// pool version.
#[derive(Default)]
pub struct PoolLedger {
    pools: RwLock<HashMap<MarketId, Arc<RwLock<Pool>>>>,
}

impl PoolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the empty pool for a newly opened market
    pub fn open_pool(&self, market_id: &MarketId, outcomes: &[OutcomeId]) -> Result<Pool, LedgerError> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| LedgerError::Poisoned("pool index"))?;
        if pools.contains_key(market_id) {
            return Err(LedgerError::AlreadyOpen(market_id.clone()));
        }
        let pool = Pool::empty(market_id.clone(), outcomes);
        pools.insert(market_id.clone(), Arc::new(RwLock::new(pool.clone())));
        Ok(pool)
    }

    /// Put back a pool recovered from persisted state
    pub fn restore_pool(&self, pool: Pool) -> Result<(), LedgerError> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| LedgerError::Poisoned("pool index"))?;
        if pools.contains_key(&pool.market_id) {
            return Err(LedgerError::AlreadyOpen(pool.market_id));
        }
        pools.insert(pool.market_id.clone(), Arc::new(RwLock::new(pool)));
        Ok(())
    }

    fn record(&self, market_id: &MarketId) -> Result<Arc<RwLock<Pool>>, LedgerError> {
        self.pools
            .read()
            .map_err(|_| LedgerError::Poisoned("pool index"))?
            .get(market_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownMarket(market_id.clone()))
    }

    /// Versioned, read-only copy of the market's pool
    pub fn snapshot(&self, market_id: &MarketId) -> Result<Pool, LedgerError> {
        let record = self.record(market_id)?;
        let pool = record
            .read()
            .map_err(|_| LedgerError::Poisoned("pool record"))?;
        Ok(pool.clone())
    }

    /// Add `amount` to `outcome_id` if the pool is still at `expected_version`.
    ///
    /// Returns the new pool. Only the admission commit section calls this.
    pub fn apply_stake(
        &self,
        market_id: &MarketId,
        outcome_id: &OutcomeId,
        amount: Amount,
        expected_version: u64,
    ) -> Result<Pool, LedgerError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let record = self.record(market_id)?;
        let mut pool = record
            .write()
            .map_err(|_| LedgerError::Poisoned("pool record"))?;

        if pool.frozen {
            return Err(LedgerError::Frozen(market_id.clone()));
        }
        if pool.version != expected_version {
            return Err(LedgerError::VersionConflict {
                market_id: market_id.clone(),
                expected: expected_version,
                current: pool.version,
            });
        }

        let slot = pool
            .per_outcome_stake
            .get_mut(outcome_id)
            .ok_or_else(|| LedgerError::UnknownOutcome {
                market_id: market_id.clone(),
                outcome_id: outcome_id.clone(),
            })?;
        *slot += amount;

        // Recomputed in outcome order so the sum invariant holds bit-for-bit.
        pool.total_stake = pool.outcome_sum();
        pool.version += 1;

        debug!(
            market_id = %market_id,
            outcome_id = %outcome_id,
            amount = amount,
            version = pool.version,
            total = pool.total_stake,
            "[LEDGER] Stake applied"
        );

        Ok(pool.clone())
    }

    /// Reject every later mutation of the market's pool
    pub fn freeze(&self, market_id: &MarketId) -> Result<Pool, LedgerError> {
        let record = self.record(market_id)?;
        let mut pool = record
            .write()
            .map_err(|_| LedgerError::Poisoned("pool record"))?;
        pool.frozen = true;
        Ok(pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_market() -> (PoolLedger, MarketId) {
        let ledger = PoolLedger::new();
        let market = MarketId::from("m1");
        ledger
            .open_pool(&market, &[OutcomeId::from("a"), OutcomeId::from("b")])
            .unwrap();
        (ledger, market)
    }

    #[test]
    fn apply_stake_bumps_version_and_keeps_sum() {
        let (ledger, market) = ledger_with_market();
        let pool = ledger
            .apply_stake(&market, &OutcomeId::from("a"), 1000.0, 0)
            .unwrap();
        assert_eq!(pool.version, 1);
        let pool = ledger
            .apply_stake(&market, &OutcomeId::from("b"), 2000.0, 1)
            .unwrap();
        assert_eq!(pool.version, 2);
        assert_eq!(pool.total_stake, 3000.0);
        assert_eq!(pool.stake_on(&OutcomeId::from("a")), 1000.0);
        assert!(pool.is_consistent());
    }

    #[test]
    fn stale_version_is_rejected_without_mutation() {
        let (ledger, market) = ledger_with_market();
        ledger
            .apply_stake(&market, &OutcomeId::from("a"), 10.0, 0)
            .unwrap();
        let err = ledger
            .apply_stake(&market, &OutcomeId::from("a"), 10.0, 0)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::VersionConflict {
                market_id: market.clone(),
                expected: 0,
                current: 1
            }
        );
        assert_eq!(ledger.snapshot(&market).unwrap().total_stake, 10.0);
    }

    #[test]
    fn unknown_outcome_and_bad_amounts_rejected() {
        let (ledger, market) = ledger_with_market();
        assert!(matches!(
            ledger.apply_stake(&market, &OutcomeId::from("zzz"), 1.0, 0),
            Err(LedgerError::UnknownOutcome { .. })
        ));
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ledger.apply_stake(&market, &OutcomeId::from("a"), bad, 0),
                Err(LedgerError::InvalidAmount(_))
            ));
        }
        let pool = ledger.snapshot(&market).unwrap();
        assert_eq!(pool.version, 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn frozen_pool_rejects_stakes() {
        let (ledger, market) = ledger_with_market();
        ledger.freeze(&market).unwrap();
        assert_eq!(
            ledger.apply_stake(&market, &OutcomeId::from("a"), 1.0, 0),
            Err(LedgerError::Frozen(market.clone()))
        );
    }

    #[test]
    fn duplicate_open_is_rejected() {
        let (ledger, market) = ledger_with_market();
        assert_eq!(
            ledger.open_pool(&market, &[OutcomeId::from("a")]),
            Err(LedgerError::AlreadyOpen(market))
        );
    }
}

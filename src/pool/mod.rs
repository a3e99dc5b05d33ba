//! Pool accounting and odds quoting.

pub mod ledger;
pub mod quote;

pub use ledger::PoolLedger;
pub use quote::{net_multiplier, quote, Quote, EMPTY_RUNNER_EPSILON};

use crate::types::{OutcomeId, Pool};

/// Quote a candidate stake on `outcome_id` against a pool snapshot
pub fn quote_pool(pool: &Pool, outcome_id: &OutcomeId, takeout_rate: f64, stake: f64) -> Quote {
    quote(pool.total_stake, pool.stake_on(outcome_id), takeout_rate, stake)
}

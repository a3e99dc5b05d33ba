use serde::{Deserialize, Serialize};

use crate::types::Amount;

/// Stand-in for the runner stake when quoting a first stake on an empty outcome.
/// Never stored, never used by settlement arithmetic.
pub const EMPTY_RUNNER_EPSILON: f64 = 1e-9;

/// Odds and payout figures for a candidate stake against a pool snapshot.
///
/// Multipliers are `None` when the pool carries no information for the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub baseline_multiplier: Option<f64>,
    pub effective_multiplier: Option<f64>,
    pub est_payout: Amount,
    pub max_possible_payout: Amount,
    pub implied_prob: f64,
    pub price_impact: f64,
}

/// Fraction of the pool returned to winners after take-out
pub fn net_multiplier(takeout_rate: f64) -> f64 {
    let r = if takeout_rate.is_nan() {
        0.0
    } else {
        takeout_rate.clamp(0.0, 1.0)
    };
    (1.0 - r).max(0.0)
}

/// Quote a stake of `stake` on an outcome holding `runner_stake` out of `total_stake`.
///
/// `stake == 0.0` previews the pool with no new money; settlement uses exactly this call.
pub fn quote(total_stake: Amount, runner_stake: Amount, takeout_rate: f64, stake: Amount) -> Quote {
    let net = net_multiplier(takeout_rate);

    let baseline_multiplier = if runner_stake > 0.0 {
        Some(net * total_stake / runner_stake)
    } else if stake > 0.0 {
        Some(net * total_stake / EMPTY_RUNNER_EPSILON)
    } else {
        None
    };

    let total_after = total_stake + stake;
    let runner_after = runner_stake + stake;

    let effective_multiplier = if total_after > 0.0 && runner_after > 0.0 {
        Some(net * total_after / runner_after)
    } else {
        None
    };

    let max_possible_payout = net * total_after;

    let est_payout = match effective_multiplier {
        Some(m) => (stake * m).min(max_possible_payout),
        None => 0.0,
    };

    let implied_prob = if total_after > 0.0 {
        runner_after / total_after
    } else {
        0.0
    };

    let price_impact = match (effective_multiplier, baseline_multiplier) {
        (Some(eff), Some(base)) if base > 0.0 => 1.0 - eff / base,
        _ => 0.0,
    };

    Quote {
        baseline_multiplier,
        effective_multiplier,
        est_payout,
        max_possible_payout,
        implied_prob,
        price_impact,
    }
}

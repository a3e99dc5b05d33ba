//! Settlement Engine
//!
//! Converts a closed pool into final payouts. The payout multiplier is the
//! live quote formula evaluated with a zero candidate stake, so the odds a
//! bettor was shown and the odds they are paid come from the same function.
//!
//! Key properties:
//! - **Exclusive**: one pass per market at a time
//! - **Idempotent credits**: every credit is keyed by wager id, so a resumed
//!   pass never pays a wager twice
//! - **Terminal**: the market becomes settled only after every wager has a
//!   final payout

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::admission::backoff_delay;
use crate::balance::{BalanceStore, CreditOutcome};
use crate::config::SettlementConfig;
use crate::error::{BalanceError, LifecycleError, SettlementError};
use crate::lifecycle::MarketLifecycle;
use crate::notify::{PoolNotifier, PoolUpdate, UpdateKind};
use crate::pool::{quote, PoolLedger};
use crate::types::{Amount, Market, MarketId, MarketStatus, OutcomeId, Pool, Wager};
use crate::wagers::WagerBook;

/// How a closed pool pays out
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutPlan {
    pub winners: Vec<OutcomeId>,
    pub total_stake: Amount,
    /// Combined stake on all winning outcomes
    pub winning_stake: Amount,
    /// `None` when nothing was staked on any winner
    pub multiplier: Option<f64>,
    /// Every stake is returned instead
    pub refund: bool,
}

impl PayoutPlan {
    pub fn new(
        pool: &Pool,
        winners: &[OutcomeId],
        takeout_rate: f64,
        refund_when_no_winning_stake: bool,
    ) -> Self {
        let total_stake = pool.total_stake;
        let winning_stake = pool.stake_on_all(winners);
        let multiplier = quote(total_stake, winning_stake, takeout_rate, 0.0).effective_multiplier;
        let refund = refund_when_no_winning_stake && multiplier.is_none() && total_stake > 0.0;
        Self {
            winners: winners.to_vec(),
            total_stake,
            winning_stake,
            multiplier,
            refund,
        }
    }

    pub fn is_winner(&self, outcome_id: &OutcomeId) -> bool {
        self.winners.iter().any(|w| w == outcome_id)
    }

    pub fn payout_for(&self, wager: &Wager) -> Amount {
        if self.refund {
            return wager.stake;
        }
        match self.multiplier {
            Some(m) if self.is_winner(&wager.outcome_id) => wager.stake * m,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub market_id: MarketId,
    pub winners: Vec<OutcomeId>,
    pub takeout_rate: f64,
    pub pool_version: u64,
    pub total_stake: Amount,
    pub winning_stake: Amount,
    pub payout_multiplier: Option<f64>,
    pub refunded: bool,
    /// Stakes returned under the refund policy
    pub refunded_total: Amount,
    pub winning_wagers: usize,
    pub losing_wagers: usize,
    /// Settled by this pass
    pub settled_this_pass: usize,
    /// Settled by an earlier, interrupted pass
    pub previously_settled: usize,
    /// Credits the balance store had already applied
    pub duplicate_credits: usize,
    /// Sum of all wager payouts for the market
    pub total_paid: Amount,
    /// Take-out plus anything no winner could claim
    pub retained: Amount,
}

fn same_outcomes(a: &[OutcomeId], b: &[OutcomeId]) -> bool {
    a.len() == b.len() && a.iter().all(|o| b.contains(o))
}

/// Releases the per-market exclusivity claim on drop
struct PassGuard<'a> {
    in_progress: &'a Mutex<HashSet<MarketId>>,
    market_id: MarketId,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_progress.lock() {
            set.remove(&self.market_id);
        }
    }
}

pub struct SettlementEngine {
    ledger: Arc<PoolLedger>,
    lifecycle: Arc<MarketLifecycle>,
    balances: Arc<dyn BalanceStore>,
    wagers: Arc<WagerBook>,
    notifier: PoolNotifier,
    config: SettlementConfig,
    in_progress: Mutex<HashSet<MarketId>>,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<PoolLedger>,
        lifecycle: Arc<MarketLifecycle>,
        balances: Arc<dyn BalanceStore>,
        wagers: Arc<WagerBook>,
        notifier: PoolNotifier,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            lifecycle,
            balances,
            wagers,
            notifier,
            config,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, market_id: &MarketId) -> Result<PassGuard<'_>, SettlementError> {
        let mut set = self
            .in_progress
            .lock()
            .map_err(|_| SettlementError::SettlementInProgress(market_id.clone()))?;
        if !set.insert(market_id.clone()) {
            return Err(SettlementError::SettlementInProgress(market_id.clone()));
        }
        Ok(PassGuard {
            in_progress: &self.in_progress,
            market_id: market_id.clone(),
        })
    }

    fn closed_market(&self, market_id: &MarketId) -> Result<Market, SettlementError> {
        let market = self.lifecycle.market(market_id).map_err(|e| match e {
            LifecycleError::UnknownMarket(id) => SettlementError::UnknownMarket(id),
            other => other.into(),
        })?;
        match market.status {
            MarketStatus::Closed => Ok(market),
            MarketStatus::Settled => Err(SettlementError::MarketAlreadySettled(market_id.clone())),
            status => Err(SettlementError::MarketNotClosed {
                market_id: market_id.clone(),
                status,
            }),
        }
    }

    /// Credit one wager, retrying while the store is unreachable
    async fn credit(&self, wager: &Wager, amount: Amount) -> Result<CreditOutcome, SettlementError> {
        let key = wager.id.to_string();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.balances.credit(&wager.bettor_id, amount, &key).await {
                Ok(outcome) => return Ok(outcome),
                Err(BalanceError::Unreachable(reason)) if attempt < self.config.credit_attempts => {
                    let base = self.config.backoff_base_ms;
                    let delay = backoff_delay(attempt, base, base.saturating_mul(16), 0.2);
                    warn!(
                        wager_id = %wager.id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "[SETTLE] Credit failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(SettlementError::CreditFailed {
                        wager_id: wager.id,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Settle a closed market with the declared winning outcome(s).
    ///
    /// A pass that stops on a credit failure can simply be run again.
    pub async fn settle(
        &self,
        market_id: &MarketId,
        winners: &[OutcomeId],
    ) -> Result<SettlementReport, SettlementError> {
        let market = self.closed_market(market_id)?;

        let mut declared: Vec<OutcomeId> = Vec::new();
        for winner in winners {
            if !market.has_outcome(winner) {
                return Err(SettlementError::UnknownOutcome {
                    market_id: market_id.clone(),
                    outcome_id: winner.clone(),
                });
            }
            if !declared.contains(winner) {
                declared.push(winner.clone());
            }
        }
        if declared.is_empty() {
            return Err(SettlementError::NoWinners(market_id.clone()));
        }

        let _pass = self.claim(market_id)?;
        // Another pass may have settled the market between the first check and the claim.
        let market = self.closed_market(market_id)?;

        // A resumed pass pays the rest of the market under the plan it started with.
        let pinned = self.lifecycle.declare_winners(market_id, &declared)?;
        if !same_outcomes(&pinned, &declared) {
            warn!(
                market_id = %market_id,
                declared = ?pinned,
                requested = ?declared,
                "[SETTLE] Rejecting pass with different winners"
            );
            return Err(SettlementError::WinnersMismatch {
                market_id: market_id.clone(),
                declared: pinned,
                requested: declared,
            });
        }

        let pool = self.ledger.snapshot(market_id)?;
        let plan = PayoutPlan::new(
            &pool,
            &declared,
            market.takeout_rate,
            self.config.refund_when_no_winning_stake,
        );

        info!(
            market_id = %market_id,
            winners = ?declared,
            total_stake = plan.total_stake,
            winning_stake = plan.winning_stake,
            multiplier = ?plan.multiplier,
            refund = plan.refund,
            "🏁 [SETTLE] Starting settlement pass"
        );

        let wagers = self.wagers.for_market(market_id);
        let mut settled_this_pass = 0usize;
        let mut previously_settled = 0usize;
        let mut duplicate_credits = 0usize;

        for wager in &wagers {
            if wager.settled {
                previously_settled += 1;
                continue;
            }
            let payout = plan.payout_for(wager);
            if payout > 0.0 && self.credit(wager, payout).await? == CreditOutcome::Duplicate {
                duplicate_credits += 1;
            }
            if self.wagers.mark_settled(&wager.id, payout) {
                settled_this_pass += 1;
            }
        }

        // Every wager must be terminal before the market is.
        let final_wagers = self.wagers.for_market(market_id);
        if let Some(open) = final_wagers.iter().find(|w| !w.settled) {
            return Err(SettlementError::CreditFailed {
                wager_id: open.id,
                reason: "wager left unsettled".to_string(),
            });
        }

        self.lifecycle.mark_settled(market_id)?;

        let total_paid: Amount = final_wagers.iter().filter_map(|w| w.payout).sum();
        let winning_wagers = final_wagers
            .iter()
            .filter(|w| plan.is_winner(&w.outcome_id) && w.payout.map(|p| p > 0.0).unwrap_or(false))
            .count();

        let report = SettlementReport {
            market_id: market_id.clone(),
            winners: declared,
            takeout_rate: market.takeout_rate,
            pool_version: pool.version,
            total_stake: plan.total_stake,
            winning_stake: plan.winning_stake,
            payout_multiplier: plan.multiplier,
            refunded: plan.refund,
            refunded_total: if plan.refund { total_paid } else { 0.0 },
            winning_wagers,
            losing_wagers: final_wagers.len() - winning_wagers,
            settled_this_pass,
            previously_settled,
            duplicate_credits,
            total_paid,
            retained: (plan.total_stake - total_paid).max(0.0),
        };

        self.notifier.publish(PoolUpdate::from_pool(
            &pool,
            MarketStatus::Settled,
            UpdateKind::Settlement,
        ));

        info!(
            market_id = %market_id,
            total_paid = %format!("{:.2}", report.total_paid),
            retained = %format!("{:.2}", report.retained),
            winning_wagers = report.winning_wagers,
            losing_wagers = report.losing_wagers,
            resumed = previously_settled > 0,
            "✅ [SETTLE] Market settled"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BettorId, WagerId};
    use chrono::Utc;

    fn pool(stakes: &[(&str, f64)]) -> Pool {
        let outcomes: Vec<OutcomeId> = stakes.iter().map(|(o, _)| OutcomeId::from(*o)).collect();
        let mut pool = Pool::empty(MarketId::from("m"), &outcomes);
        for (o, s) in stakes {
            pool.per_outcome_stake.insert(OutcomeId::from(*o), *s);
        }
        pool.total_stake = pool.outcome_sum();
        pool
    }

    fn wager(outcome: &str, stake: f64) -> Wager {
        Wager {
            id: WagerId::new(),
            market_id: MarketId::from("m"),
            outcome_id: OutcomeId::from(outcome),
            bettor_id: BettorId::from("x"),
            stake,
            quote_at_placement: quote(0.0, 0.0, 0.1, stake),
            pool_version: 1,
            placed_at: Utc::now(),
            settled: false,
            payout: None,
        }
    }

    #[test]
    fn plan_matches_zero_stake_quote() {
        let p = pool(&[("a", 1000.0), ("b", 2000.0)]);
        let plan = PayoutPlan::new(&p, &[OutcomeId::from("a")], 0.1, false);
        let m = plan.multiplier.unwrap();
        assert!((m - 2.7).abs() < 1e-12);
        assert_eq!(Some(m), quote(3000.0, 1000.0, 0.1, 0.0).effective_multiplier);
        assert!((plan.payout_for(&wager("a", 1000.0)) - 2700.0).abs() < 1e-9);
        assert_eq!(plan.payout_for(&wager("b", 2000.0)), 0.0);
    }

    #[test]
    fn dead_heat_shares_the_net_pool() {
        let p = pool(&[("a", 1000.0), ("b", 2000.0), ("c", 1000.0)]);
        let plan = PayoutPlan::new(&p, &[OutcomeId::from("a"), OutcomeId::from("b")], 0.1, false);
        let paid = plan.payout_for(&wager("a", 1000.0)) + plan.payout_for(&wager("b", 2000.0));
        assert!((paid - 0.9 * 4000.0).abs() < 1e-9);
    }

    #[test]
    fn empty_winner_pays_nothing_unless_refunding() {
        let p = pool(&[("a", 0.0), ("b", 500.0)]);
        let plan = PayoutPlan::new(&p, &[OutcomeId::from("a")], 0.1, false);
        assert_eq!(plan.multiplier, None);
        assert_eq!(plan.payout_for(&wager("b", 500.0)), 0.0);

        let plan = PayoutPlan::new(&p, &[OutcomeId::from("a")], 0.1, true);
        assert!(plan.refund);
        assert_eq!(plan.payout_for(&wager("b", 500.0)), 500.0);
    }

    #[test]
    fn payouts_stay_within_net_pool() {
        for rate in [0.0, 0.05, 0.175, 0.5] {
            for split in [1.0, 7.5, 333.3, 999.0] {
                let p = pool(&[("a", split), ("b", 1000.0 - split), ("c", 123.45)]);
                let plan = PayoutPlan::new(&p, &[OutcomeId::from("a")], rate, false);
                let paid = plan.payout_for(&wager("a", split));
                assert!(paid <= p.total_stake * (1.0 - rate) + 1e-9);
            }
        }
    }

    #[test]
    fn only_one_pass_per_market() {
        let ledger = Arc::new(PoolLedger::new());
        let directory = Arc::new(crate::directory::InMemoryMarketDirectory::new());
        let lifecycle = Arc::new(MarketLifecycle::new(
            directory,
            ledger.clone(),
            Arc::new(crate::clock::SystemClock),
        ));
        let engine = SettlementEngine::new(
            ledger,
            lifecycle,
            Arc::new(crate::balance::InMemoryBalanceStore::new()),
            Arc::new(WagerBook::new()),
            PoolNotifier::new(4),
            SettlementConfig::default(),
        );
        let m = MarketId::from("m");

        let first = engine.claim(&m).unwrap();
        assert!(matches!(
            engine.claim(&m),
            Err(SettlementError::SettlementInProgress(_))
        ));
        assert!(engine.claim(&MarketId::from("other")).is_ok());
        drop(first);
        assert!(engine.claim(&m).is_ok());
    }

    #[test]
    fn fully_empty_pool_never_refunds() {
        let p = pool(&[("a", 0.0), ("b", 0.0)]);
        let plan = PayoutPlan::new(&p, &[OutcomeId::from("a")], 0.1, true);
        assert!(!plan.refund);
        assert_eq!(plan.multiplier, None);
    }

    #[test]
    fn winner_sets_compare_without_order() {
        let a = OutcomeId::from("a");
        let b = OutcomeId::from("b");
        assert!(same_outcomes(&[a.clone(), b.clone()], &[b.clone(), a.clone()]));
        assert!(!same_outcomes(&[a.clone()], &[b.clone()]));
        assert!(!same_outcomes(&[a.clone()], &[a, b]));
    }
}

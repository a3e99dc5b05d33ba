//! Tote engine facade
//!
//! Wires the ledger, lifecycle, admission, settlement and notification
//! components together behind one handle. Everything here is `&self` so the
//! engine can be shared across tasks behind an `Arc`.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::info;

use crate::admission::WagerAdmission;
use crate::balance::BalanceStore;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::directory::MarketDirectory;
use crate::error::{LifecycleError, SettlementError, WagerError};
use crate::lifecycle::MarketLifecycle;
use crate::notify::{PoolNotifier, PoolUpdate};
use crate::persistence::EngineSnapshot;
use crate::pool::{quote_pool, PoolLedger, Quote};
use crate::settlement::{SettlementEngine, SettlementReport};
use crate::types::{Amount, BettorId, Market, MarketId, MarketStatus, OutcomeId, Pool, Wager};
use crate::wagers::WagerBook;

/// Zero-stake odds for one outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsLine {
    pub outcome_id: OutcomeId,
    pub runner_stake: Amount,
    pub quote: Quote,
}

/// Read-only overview of one market
#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub market: Market,
    pub pool: Pool,
    pub wager_count: usize,
    pub in_flight: usize,
}

pub struct ToteEngine {
    directory: Arc<dyn MarketDirectory>,
    ledger: Arc<PoolLedger>,
    lifecycle: Arc<MarketLifecycle>,
    wagers: Arc<WagerBook>,
    admission: WagerAdmission,
    settlement: SettlementEngine,
    notifier: PoolNotifier,
}

impl ToteEngine {
    pub fn new(
        directory: Arc<dyn MarketDirectory>,
        balances: Arc<dyn BalanceStore>,
        config: &EngineConfig,
    ) -> Self {
        Self::with_clock(directory, balances, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        directory: Arc<dyn MarketDirectory>,
        balances: Arc<dyn BalanceStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ledger = Arc::new(PoolLedger::new());
        let wagers = Arc::new(WagerBook::new());
        let notifier = PoolNotifier::new(config.notifications.channel_capacity);
        let lifecycle = Arc::new(MarketLifecycle::new(
            directory.clone(),
            ledger.clone(),
            clock.clone(),
        ));

        let admission = WagerAdmission::new(
            ledger.clone(),
            lifecycle.clone(),
            balances.clone(),
            wagers.clone(),
            notifier.clone(),
            clock,
            config.admission.clone(),
        );
        let settlement = SettlementEngine::new(
            ledger.clone(),
            lifecycle.clone(),
            balances,
            wagers.clone(),
            notifier.clone(),
            config.settlement.clone(),
        );

        Self {
            directory,
            ledger,
            lifecycle,
            wagers,
            admission,
            settlement,
            notifier,
        }
    }

    /// Start accepting wagers on a market defined in the directory
    pub fn open_market(&self, market_id: &MarketId) -> Result<Pool, LifecycleError> {
        let market = self
            .directory
            .market(market_id)
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.clone()))?;
        MarketLifecycle::validate(&market)?;

        let pool = self.ledger.open_pool(&market.id, &market.outcomes)?;
        let takeout_rate = market.takeout_rate;
        let outcomes = market.outcomes.len();
        self.lifecycle.register(market)?;

        info!(
            market_id = %market_id,
            takeout_rate = takeout_rate,
            outcomes = outcomes,
            "🟢 [ENGINE] Market opened"
        );
        Ok(pool)
    }

    pub async fn place_wager(
        &self,
        market_id: &MarketId,
        outcome_id: &OutcomeId,
        bettor_id: &BettorId,
        stake: Amount,
    ) -> Result<Wager, WagerError> {
        self.admission
            .place_wager(market_id, outcome_id, bettor_id, stake)
            .await
    }

    pub fn get_pool_snapshot(&self, market_id: &MarketId) -> Result<Pool, WagerError> {
        Ok(self.ledger.snapshot(market_id)?)
    }

    /// Preview a stake without committing anything.
    ///
    /// The figures may be one commit stale by the time a wager is placed.
    pub fn get_quote(
        &self,
        market_id: &MarketId,
        outcome_id: &OutcomeId,
        stake: Amount,
    ) -> Result<Quote, WagerError> {
        if !(stake.is_finite() && stake >= 0.0) {
            return Err(WagerError::InvalidStake(stake));
        }
        let market = self.lifecycle.market(market_id)?;
        if !market.has_outcome(outcome_id) {
            return Err(WagerError::UnknownOutcome {
                market_id: market_id.clone(),
                outcome_id: outcome_id.clone(),
            });
        }
        let pool = self.ledger.snapshot(market_id)?;
        Ok(quote_pool(&pool, outcome_id, market.takeout_rate, stake))
    }

    /// Zero-stake odds for every outcome, in market order
    pub fn get_odds_board(&self, market_id: &MarketId) -> Result<Vec<OddsLine>, WagerError> {
        let market = self.lifecycle.market(market_id)?;
        let pool = self.ledger.snapshot(market_id)?;
        Ok(market
            .outcomes
            .iter()
            .map(|outcome_id| OddsLine {
                outcome_id: outcome_id.clone(),
                runner_stake: pool.stake_on(outcome_id),
                quote: quote_pool(&pool, outcome_id, market.takeout_rate, 0.0),
            })
            .collect())
    }

    /// Operator close; returns the status after the call
    pub fn close_market(&self, market_id: &MarketId) -> Result<MarketStatus, LifecycleError> {
        self.lifecycle.begin_close(market_id)
    }

    pub fn market_status(&self, market_id: &MarketId) -> Result<MarketStatus, LifecycleError> {
        self.lifecycle.status(market_id)
    }

    /// Apply close times to every market; returns the ones that moved
    pub fn refresh_markets(&self) -> Vec<(MarketId, MarketStatus)> {
        self.lifecycle.refresh_all()
    }

    pub async fn settle(
        &self,
        market_id: &MarketId,
        winners: &[OutcomeId],
    ) -> Result<SettlementReport, SettlementError> {
        self.settlement.settle(market_id, winners).await
    }

    pub fn market_summary(&self, market_id: &MarketId) -> Result<MarketSummary, LifecycleError> {
        let market = self.lifecycle.market(market_id)?;
        let pool = self.ledger.snapshot(market_id)?;
        Ok(MarketSummary {
            market,
            pool,
            wager_count: self.wagers.count_for_market(market_id),
            in_flight: self.lifecycle.in_flight(market_id)?,
        })
    }

    pub fn wagers_for(&self, market_id: &MarketId) -> Vec<Wager> {
        self.wagers.for_market(market_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolUpdate> {
        self.notifier.subscribe()
    }

    pub fn updates(&self) -> impl Stream<Item = PoolUpdate> {
        self.notifier.stream()
    }

    /// Capture markets, pools and wagers for persistence
    pub fn export_state(&self) -> Result<EngineSnapshot, LifecycleError> {
        let markets = self.lifecycle.markets();
        let mut pools = Vec::with_capacity(markets.len());
        let mut wagers = Vec::new();
        for market in &markets {
            pools.push(self.ledger.snapshot(&market.id)?);
            wagers.extend(self.wagers.for_market(&market.id));
        }
        Ok(EngineSnapshot::new(markets, pools, wagers))
    }

    /// Load a persisted snapshot into an engine that has not opened those markets
    pub fn restore(&self, snapshot: EngineSnapshot) -> Result<(), LifecycleError> {
        for pool in snapshot.pools {
            self.ledger.restore_pool(pool)?;
        }
        for market in snapshot.markets {
            let status = market.status;
            self.lifecycle.restore(market, status)?;
        }
        for wager in snapshot.wagers {
            self.wagers.insert(wager)?;
        }
        info!(
            markets = self.lifecycle.markets().len(),
            wagers = self.wagers.all().len(),
            "💾 [ENGINE] State restored"
        );
        Ok(())
    }
}

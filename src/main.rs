//! Tote demo runner
//!
//! Opens one market, lets simulated bettors wager on it concurrently, closes
//! it and settles against a declared winner.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use rand::Rng;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::EnvFilter;

use tote::balance::InMemoryBalanceStore;
use tote::config::{AppConfig, LoggingConfig, SimulationConfig};
use tote::directory::InMemoryMarketDirectory;
use tote::notify::PoolView;
use tote::persistence::StateStore;
use tote::{BettorId, Market, MarketId, MarketStatus, OutcomeId, ToteEngine};

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.with_ansi(cfg!(debug_assertions)).init();
    }
}

/// Pre-drawn wagers for one bettor; drawn up front so no RNG is held across awaits
fn draw_wagers(sim: &SimulationConfig) -> Vec<(OutcomeId, f64)> {
    let mut rng = rand::thread_rng();
    (0..sim.wagers_per_bettor)
        .map(|_| {
            let outcome = &sim.outcomes[rng.gen_range(0..sim.outcomes.len())];
            let stake = rng.gen_range(sim.min_stake..=sim.max_stake);
            (OutcomeId::from(outcome.as_str()), (stake * 100.0).round() / 100.0)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);
    info!(config = %config, "🚀 [TOTE] Starting");

    let directory = Arc::new(InMemoryMarketDirectory::new());
    let balances = Arc::new(InMemoryBalanceStore::new());
    let engine = Arc::new(ToteEngine::new(
        directory.clone(),
        balances.clone(),
        &config.engine,
    ));
    let store = StateStore::new(&config.persistence.state_file);
    let sim = &config.simulation;
    let market_id = MarketId::from(sim.market_id.as_str());

    if config.persistence.enabled {
        if let Some(snapshot) = store.load_state()? {
            for market in &snapshot.markets {
                directory.upsert(market.clone());
            }
            engine.restore(snapshot)?;
        }
    }

    let resumed = engine.market_status(&market_id).is_ok();
    if !resumed {
        let outcomes: Vec<&str> = sim.outcomes.iter().map(String::as_str).collect();
        let mut market = Market::new(sim.market_id.clone(), sim.takeout_rate, &outcomes);
        if sim.close_after_secs > 0 {
            market = market.with_close_time(
                chrono::Utc::now() + chrono::Duration::seconds(sim.close_after_secs as i64),
            );
        }
        directory.upsert(market);
        engine.open_market(&market_id)?;
    }

    let mut updates = Box::pin(engine.updates());
    let watcher = tokio::spawn(async move {
        let mut view = PoolView::new();
        while let Some(update) = updates.next().await {
            let market_id = update.market_id.clone();
            let settled = update.status == MarketStatus::Settled;
            if view.apply(update) {
                debug!(
                    market_id = %market_id,
                    version = ?view.version(&market_id),
                    "📡 [VIEW] Pool update applied"
                );
            }
            if settled {
                break;
            }
        }
    });

    if engine.market_status(&market_id)? == MarketStatus::Open {
        run_bettors(&engine, &balances, sim, &market_id).await;
    }

    if sim.close_after_secs > 0 {
        let market = engine.market_summary(&market_id)?.market;
        if let Some(closes_at) = market.closes_at {
            let wait = (closes_at - chrono::Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
        for (id, status) in engine.refresh_markets() {
            info!(market_id = %id, status = %status, "⏰ [TOTE] Close time reached");
        }
    }
    if !engine.market_status(&market_id)?.is_terminal() {
        engine.close_market(&market_id)?;
    }

    for line in engine.get_odds_board(&market_id)? {
        info!(
            outcome = %line.outcome_id,
            runner_stake = %format!("{:.2}", line.runner_stake),
            multiplier = ?line.quote.baseline_multiplier,
            implied_prob = %format!("{:.3}", line.quote.implied_prob),
            "📊 [TOTE] Final odds"
        );
    }

    if engine.market_status(&market_id)? == MarketStatus::Closed {
        let winner = if sim.winner.is_empty() {
            let idx = rand::thread_rng().gen_range(0..sim.outcomes.len());
            sim.outcomes[idx].clone()
        } else {
            sim.winner.clone()
        };
        let report = engine
            .settle(&market_id, &[OutcomeId::from(winner.as_str())])
            .await
            .context("Settlement failed")?;
        info!(
            report = %serde_json::to_string(&report)?,
            "🏁 [TOTE] Settlement report"
        );
    } else {
        info!(market_id = %market_id, "[TOTE] Market already settled");
    }

    if config.persistence.enabled {
        store.save_state(&engine.export_state()?)?;
    }

    // The watcher stops on the settlement update; a resumed run may never send one
    match tokio::time::timeout(std::time::Duration::from_secs(1), watcher).await {
        Ok(Err(e)) => warn!(error = %e, "[VIEW] Watcher task failed"),
        Err(_) => debug!("[VIEW] Watcher saw no settlement update"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn run_bettors(
    engine: &Arc<ToteEngine>,
    balances: &Arc<InMemoryBalanceStore>,
    sim: &SimulationConfig,
    market_id: &MarketId,
) {
    let tasks = (0..sim.bettors).map(|i| {
        let engine = engine.clone();
        let market_id = market_id.clone();
        let bettor = BettorId::new(format!("bettor-{:03}", i));
        balances.deposit(&bettor, sim.initial_balance);
        let plan = draw_wagers(sim);
        tokio::spawn(async move {
            let mut placed = 0usize;
            for (outcome, stake) in plan {
                match engine.place_wager(&market_id, &outcome, &bettor, stake).await {
                    Ok(_) => placed += 1,
                    Err(e) => {
                        debug!(bettor_id = %bettor, class = %e.class(), error = %e, "[TOTE] Wager rejected");
                    }
                }
            }
            placed
        })
    });

    tokio::select! {
        results = join_all(tasks) => {
            let placed: usize = results.into_iter().filter_map(|r| r.ok()).sum();
            info!(market_id = %market_id, placed = placed, "✅ [TOTE] Bettors finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 [TOTE] Interrupted, closing the market early");
        }
    }
}

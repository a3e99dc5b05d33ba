//! Market lifecycle: open → closing → closed → settled
//!
//! Gates admission and settlement. Admissions hold an [`AdmissionPermit`] for
//! the whole commit; a closing market becomes closed when the last permit is
//! dropped, and its pool is frozen at that moment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::directory::MarketDirectory;
use crate::error::LifecycleError;
use crate::pool::PoolLedger;
use crate::types::{Market, MarketId, MarketStatus, OutcomeId};

struct LifecycleEntry {
    market: Market,
    in_flight: usize,
}

/// Side effects every status change performs
struct Transitions {
    directory: Arc<dyn MarketDirectory>,
    ledger: Arc<PoolLedger>,
}

impl Transitions {
    fn advance(&self, entry: &mut LifecycleEntry, to: MarketStatus) -> Result<(), LifecycleError> {
        let from = entry.market.status;
        if from.next() != Some(to) {
            return Err(LifecycleError::InvalidTransition {
                market_id: entry.market.id.clone(),
                from,
                to,
            });
        }
        // A closed market always has a frozen pool
        if to == MarketStatus::Closed {
            self.ledger.freeze(&entry.market.id)?;
        }
        entry.market.status = to;
        self.directory.set_status(&entry.market.id, to);

        info!(
            market_id = %entry.market.id,
            from = %from,
            to = %to,
            "[LIFECYCLE] Market status changed"
        );
        Ok(())
    }

    /// closing → closed once nothing is in flight
    fn drain_if_idle(&self, entry: &mut LifecycleEntry) -> Result<(), LifecycleError> {
        if entry.market.status == MarketStatus::Closing && entry.in_flight == 0 {
            self.advance(entry, MarketStatus::Closed)?;
        }
        Ok(())
    }

    /// open → closing when the close time has been reached
    fn observe_close_time(
        &self,
        entry: &mut LifecycleEntry,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), LifecycleError> {
        if entry.market.status == MarketStatus::Open && entry.market.is_past_close(now) {
            self.advance(entry, MarketStatus::Closing)?;
            self.drain_if_idle(entry)?;
        }
        Ok(())
    }
}

/// Proof that an admission may commit into an open market.
///
/// Dropping the last permit of a closing market completes the drain.
pub struct AdmissionPermit {
    entry: Arc<Mutex<LifecycleEntry>>,
    transitions: Arc<Transitions>,
    market: Market,
}

impl AdmissionPermit {
    /// Market definition as of admission
    pub fn market(&self) -> &Market {
        &self.market
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Ok(mut entry) = self.entry.lock() {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if let Err(e) = self.transitions.drain_if_idle(&mut entry) {
                warn!(market_id = %self.market.id, error = %e, "[LIFECYCLE] Drain failed");
            }
        }
    }
}

pub struct MarketLifecycle {
    entries: RwLock<HashMap<MarketId, Arc<Mutex<LifecycleEntry>>>>,
    transitions: Arc<Transitions>,
    clock: Arc<dyn Clock>,
}

impl MarketLifecycle {
    pub fn new(
        directory: Arc<dyn MarketDirectory>,
        ledger: Arc<PoolLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            transitions: Arc::new(Transitions { directory, ledger }),
            clock,
        }
    }

    /// Validate a market definition before it may open.
    ///
    /// Out-of-range take-out rates are rejected here rather than clamped later.
    pub fn validate(market: &Market) -> Result<(), LifecycleError> {
        let rate = market.takeout_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(LifecycleError::InvalidTakeoutRate {
                market_id: market.id.clone(),
                rate,
            });
        }
        if market.outcomes.is_empty() {
            return Err(LifecycleError::NoOutcomes {
                market_id: market.id.clone(),
            });
        }
        Ok(())
    }

    /// Start tracking a market in the open state
    pub fn register(&self, mut market: Market) -> Result<(), LifecycleError> {
        Self::validate(&market)?;
        market.status = MarketStatus::Open;
        self.insert(market, MarketStatus::Open)
    }

    /// Start tracking a market recovered from persisted state
    ///
    /// Nothing can be in flight after a restart, so a closing market drains at once.
    pub fn restore(&self, mut market: Market, status: MarketStatus) -> Result<(), LifecycleError> {
        let market_id = market.id.clone();
        self.transitions.ledger.snapshot(&market_id)?;
        market.status = status;
        self.insert(market, status)?;
        let transitions = self.transitions.clone();
        self.with_entry(&market_id, move |entry| transitions.drain_if_idle(entry))
    }

    fn insert(&self, market: Market, status: MarketStatus) -> Result<(), LifecycleError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LifecycleError::Poisoned("lifecycle index"))?;
        if entries.contains_key(&market.id) {
            return Err(LifecycleError::AlreadyRegistered(market.id.clone()));
        }
        self.transitions.directory.set_status(&market.id, status);
        entries.insert(
            market.id.clone(),
            Arc::new(Mutex::new(LifecycleEntry {
                market,
                in_flight: 0,
            })),
        );
        Ok(())
    }

    fn entry(&self, market_id: &MarketId) -> Result<Arc<Mutex<LifecycleEntry>>, LifecycleError> {
        self.entries
            .read()
            .map_err(|_| LifecycleError::Poisoned("lifecycle index"))?
            .get(market_id)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownMarket(market_id.clone()))
    }

    fn with_entry<T>(
        &self,
        market_id: &MarketId,
        f: impl FnOnce(&mut LifecycleEntry) -> Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        let entry = self.entry(market_id)?;
        let mut guard = entry
            .lock()
            .map_err(|_| LifecycleError::Poisoned("lifecycle entry"))?;
        let now = self.clock.now();
        self.transitions.observe_close_time(&mut guard, now)?;
        f(&mut guard)
    }

    /// Market definition with its current status
    pub fn market(&self, market_id: &MarketId) -> Result<Market, LifecycleError> {
        self.with_entry(market_id, |entry| Ok(entry.market.clone()))
    }

    pub fn status(&self, market_id: &MarketId) -> Result<MarketStatus, LifecycleError> {
        self.with_entry(market_id, |entry| Ok(entry.market.status))
    }

    /// Admissions currently between permit and commit
    pub fn in_flight(&self, market_id: &MarketId) -> Result<usize, LifecycleError> {
        self.with_entry(market_id, |entry| Ok(entry.in_flight))
    }

    /// Admit one wager into an open market, or reject with `MarketNotOpen`
    pub fn admit(&self, market_id: &MarketId) -> Result<AdmissionPermit, LifecycleError> {
        let entry = self.entry(market_id)?;
        let market = {
            let mut guard = entry
                .lock()
                .map_err(|_| LifecycleError::Poisoned("lifecycle entry"))?;
            let now = self.clock.now();
            self.transitions.observe_close_time(&mut guard, now)?;
            if guard.market.status != MarketStatus::Open {
                return Err(LifecycleError::MarketNotOpen {
                    market_id: market_id.clone(),
                    status: guard.market.status,
                });
            }
            guard.in_flight += 1;
            guard.market.clone()
        };
        Ok(AdmissionPermit {
            entry,
            transitions: self.transitions.clone(),
            market,
        })
    }

    /// Operator close signal. Repeated signals are no-ops until settlement.
    pub fn begin_close(&self, market_id: &MarketId) -> Result<MarketStatus, LifecycleError> {
        let transitions = self.transitions.clone();
        self.with_entry(market_id, move |entry| {
            match entry.market.status {
                MarketStatus::Open => {
                    transitions.advance(entry, MarketStatus::Closing)?;
                    transitions.drain_if_idle(entry)?;
                }
                MarketStatus::Closing | MarketStatus::Closed => {}
                MarketStatus::Settled => {
                    return Err(LifecycleError::InvalidTransition {
                        market_id: entry.market.id.clone(),
                        from: MarketStatus::Settled,
                        to: MarketStatus::Closing,
                    })
                }
            }
            Ok(entry.market.status)
        })
    }

    /// Observe close times on every tracked market; returns markets that changed status
    pub fn refresh_all(&self) -> Vec<(MarketId, MarketStatus)> {
        let entries: Vec<_> = match self.entries.read() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let now = self.clock.now();
        let mut changed = Vec::new();
        for entry in entries {
            if let Ok(mut guard) = entry.lock() {
                let before = guard.market.status;
                if let Err(e) = self.transitions.observe_close_time(&mut guard, now) {
                    warn!(market_id = %guard.market.id, error = %e, "[LIFECYCLE] Refresh failed");
                }
                if guard.market.status != before {
                    changed.push((guard.market.id.clone(), guard.market.status));
                }
            }
        }
        changed
    }

    /// closed → settled; only the settlement engine calls this
    pub fn mark_settled(&self, market_id: &MarketId) -> Result<(), LifecycleError> {
        let transitions = self.transitions.clone();
        self.with_entry(market_id, move |entry| {
            transitions.advance(entry, MarketStatus::Settled)
        })
    }

    /// Pin the winning outcomes of a closed market.
    ///
    /// The first call records `winners`; later calls get the recorded set back
    /// unchanged, whatever they pass.
    pub fn declare_winners(
        &self,
        market_id: &MarketId,
        winners: &[OutcomeId],
    ) -> Result<Vec<OutcomeId>, LifecycleError> {
        self.with_entry(market_id, |entry| {
            if entry.market.declared_winners.is_empty() {
                entry.market.declared_winners = winners.to_vec();
                info!(
                    market_id = %entry.market.id,
                    winners = ?winners,
                    "[LIFECYCLE] Winners declared"
                );
            }
            Ok(entry.market.declared_winners.clone())
        })
    }

    /// Every tracked market with its current status
    pub fn markets(&self) -> Vec<Market> {
        match self.entries.read() {
            Ok(entries) => entries
                .values()
                .filter_map(|e| e.lock().ok().map(|g| g.market.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryMarketDirectory;
    use chrono::{Duration, Utc};

    struct Fixture {
        lifecycle: MarketLifecycle,
        directory: Arc<InMemoryMarketDirectory>,
        ledger: Arc<PoolLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture(market: Market) -> Fixture {
        let directory = Arc::new(InMemoryMarketDirectory::new());
        directory.upsert(market.clone());
        let ledger = Arc::new(PoolLedger::new());
        ledger.open_pool(&market.id, &market.outcomes).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let lifecycle = MarketLifecycle::new(directory.clone(), ledger.clone(), clock.clone());
        lifecycle.register(market).unwrap();
        Fixture {
            lifecycle,
            directory,
            ledger,
            clock,
        }
    }

    #[test]
    fn rejects_out_of_range_takeout() {
        for rate in [-0.01, 1.01, f64::NAN] {
            let market = Market::new("m", rate, &["a"]);
            assert!(matches!(
                MarketLifecycle::validate(&market),
                Err(LifecycleError::InvalidTakeoutRate { .. })
            ));
        }
        assert!(MarketLifecycle::validate(&Market::new("m", 1.0, &["a"])).is_ok());
        assert!(matches!(
            MarketLifecycle::validate(&Market::new("m", 0.1, &[])),
            Err(LifecycleError::NoOutcomes { .. })
        ));
    }

    #[test]
    fn close_time_moves_market_to_closed_when_idle() {
        let now = Utc::now();
        let market = Market::new("m", 0.1, &["a", "b"]).with_close_time(now + Duration::minutes(5));
        let f = fixture(market);
        f.clock.set(now);
        let id = MarketId::from("m");

        assert_eq!(f.lifecycle.status(&id).unwrap(), MarketStatus::Open);
        f.clock.advance(Duration::minutes(10));
        assert!(matches!(
            f.lifecycle.admit(&id),
            Err(LifecycleError::MarketNotOpen { .. })
        ));
        assert_eq!(f.lifecycle.status(&id).unwrap(), MarketStatus::Closed);
        assert_eq!(f.directory.market(&id).unwrap().status, MarketStatus::Closed);
        assert!(f.ledger.snapshot(&id).unwrap().frozen);
    }

    #[test]
    fn closing_waits_for_in_flight_admissions() {
        let f = fixture(Market::new("m", 0.1, &["a", "b"]));
        let id = MarketId::from("m");

        let permit = f.lifecycle.admit(&id).unwrap();
        assert_eq!(f.lifecycle.begin_close(&id).unwrap(), MarketStatus::Closing);
        assert!(f.lifecycle.admit(&id).is_err());
        assert!(!f.ledger.snapshot(&id).unwrap().frozen);

        drop(permit);
        assert_eq!(f.lifecycle.status(&id).unwrap(), MarketStatus::Closed);
        assert!(f.ledger.snapshot(&id).unwrap().frozen);
    }

    #[test]
    fn settlement_requires_closed_and_is_terminal() {
        let f = fixture(Market::new("m", 0.1, &["a"]));
        let id = MarketId::from("m");

        assert!(matches!(
            f.lifecycle.mark_settled(&id),
            Err(LifecycleError::InvalidTransition { .. })
        ));
        f.lifecycle.begin_close(&id).unwrap();
        // Repeated close is a no-op.
        assert_eq!(f.lifecycle.begin_close(&id).unwrap(), MarketStatus::Closed);
        f.lifecycle.mark_settled(&id).unwrap();
        assert_eq!(f.lifecycle.status(&id).unwrap(), MarketStatus::Settled);
        assert!(f.lifecycle.begin_close(&id).is_err());
        assert!(f.lifecycle.mark_settled(&id).is_err());
    }

    #[test]
    fn restored_closing_market_drains_immediately() {
        let market = Market::new("r", 0.1, &["a"]);
        let directory = Arc::new(InMemoryMarketDirectory::new());
        directory.upsert(market.clone());
        let ledger = Arc::new(PoolLedger::new());
        ledger.open_pool(&market.id, &market.outcomes).unwrap();
        let lifecycle = MarketLifecycle::new(
            directory,
            ledger.clone(),
            Arc::new(ManualClock::new(Utc::now())),
        );

        lifecycle.restore(market.clone(), MarketStatus::Closing).unwrap();
        assert_eq!(lifecycle.status(&market.id).unwrap(), MarketStatus::Closed);
        assert!(ledger.snapshot(&market.id).unwrap().frozen);
        assert!(lifecycle.restore(market, MarketStatus::Open).is_err());
    }

    #[test]
    fn refresh_reports_changed_markets() {
        let now = Utc::now();
        let f = fixture(Market::new("m", 0.1, &["a"]).with_close_time(now + Duration::seconds(1)));
        f.clock.set(now);
        assert!(f.lifecycle.refresh_all().is_empty());
        f.clock.advance(Duration::seconds(2));
        assert_eq!(
            f.lifecycle.refresh_all(),
            vec![(MarketId::from("m"), MarketStatus::Closed)]
        );
    }

    #[test]
    fn close_fails_without_a_pool_to_freeze() {
        let market = Market::new("orphan", 0.1, &["a"]);
        let directory = Arc::new(InMemoryMarketDirectory::new());
        directory.upsert(market.clone());
        let lifecycle = MarketLifecycle::new(
            directory,
            Arc::new(PoolLedger::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        lifecycle.register(market.clone()).unwrap();

        assert!(matches!(
            lifecycle.begin_close(&market.id),
            Err(LifecycleError::Ledger(_))
        ));
        assert_eq!(lifecycle.status(&market.id).unwrap(), MarketStatus::Closing);
    }

    #[test]
    fn restore_requires_the_pool() {
        let market = Market::new("lost", 0.1, &["a"]);
        let lifecycle = MarketLifecycle::new(
            Arc::new(InMemoryMarketDirectory::new()),
            Arc::new(PoolLedger::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );

        assert!(matches!(
            lifecycle.restore(market.clone(), MarketStatus::Closing),
            Err(LifecycleError::Ledger(_))
        ));
        assert!(matches!(
            lifecycle.status(&market.id),
            Err(LifecycleError::UnknownMarket(_))
        ));
    }

    #[test]
    fn first_declared_winners_stick() {
        let f = fixture(Market::new("m", 0.1, &["a", "b"]));
        let id = MarketId::from("m");

        let first = f.lifecycle.declare_winners(&id, &[OutcomeId::from("a")]).unwrap();
        let again = f.lifecycle.declare_winners(&id, &[OutcomeId::from("b")]).unwrap();
        assert_eq!(first, vec![OutcomeId::from("a")]);
        assert_eq!(again, first);
        assert_eq!(f.lifecycle.market(&id).unwrap().declared_winners, first);
    }
}

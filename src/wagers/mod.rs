//! Wager records
//!
//! Append-only book of committed wagers, indexed by market. A wager is
//! written once at admission and settled exactly once.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::WagerBookError;
use crate::types::{Amount, MarketId, Wager, WagerId};

#[derive(Default)]
struct BookInner {
    wagers: HashMap<WagerId, Wager>,
    by_market: HashMap<MarketId, Vec<WagerId>>,
}

/// Both indexes live behind one lock so a wager is never half recorded
#[derive(Default)]
pub struct WagerBook {
    inner: RwLock<BookInner>,
}

impl WagerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, wager: Wager) -> Result<(), WagerBookError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| WagerBookError::Poisoned("wager book"))?;
        if inner.wagers.contains_key(&wager.id) {
            return Err(WagerBookError::Duplicate(wager.id));
        }
        inner
            .by_market
            .entry(wager.market_id.clone())
            .or_default()
            .push(wager.id);
        inner.wagers.insert(wager.id, wager);
        Ok(())
    }

    pub fn get(&self, wager_id: &WagerId) -> Option<Wager> {
        self.inner.read().ok()?.wagers.get(wager_id).cloned()
    }

    /// All wagers of a market, in placement order
    pub fn for_market(&self, market_id: &MarketId) -> Vec<Wager> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        inner
            .by_market
            .get(market_id)
            .map(|ids| ids.iter().filter_map(|id| inner.wagers.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn count_for_market(&self, market_id: &MarketId) -> usize {
        self.inner
            .read()
            .map(|inner| inner.by_market.get(market_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Record the final payout. Returns false if the wager was already settled
    /// or does not exist.
    pub fn mark_settled(&self, wager_id: &WagerId, payout: Amount) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        match inner.wagers.get_mut(wager_id) {
            Some(wager) if !wager.settled => {
                wager.settled = true;
                wager.payout = Some(payout);
                true
            }
            _ => false,
        }
    }

    pub fn all(&self) -> Vec<Wager> {
        self.inner
            .read()
            .map(|inner| inner.wagers.values().cloned().collect())
            .unwrap_or_default()
    }
}

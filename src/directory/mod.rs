//! Market directory
//!
//! Markets are created and edited by admin tooling outside the engine. The
//! engine reads definitions from here and writes back lifecycle status.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{Market, MarketId, MarketStatus};

pub trait MarketDirectory: Send + Sync {
    fn market(&self, market_id: &MarketId) -> Option<Market>;

    fn markets(&self) -> Vec<Market>;

    /// Status write-back; only the lifecycle calls this
    fn set_status(&self, market_id: &MarketId, status: MarketStatus);
}

#[derive(Default)]
pub struct InMemoryMarketDirectory {
    markets: RwLock<HashMap<MarketId, Market>>,
}

impl InMemoryMarketDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, market: Market) {
        if let Ok(mut markets) = self.markets.write() {
            markets.insert(market.id.clone(), market);
        }
    }
}

impl MarketDirectory for InMemoryMarketDirectory {
    fn market(&self, market_id: &MarketId) -> Option<Market> {
        self.markets.read().ok()?.get(market_id).cloned()
    }

    fn markets(&self) -> Vec<Market> {
        self.markets
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn set_status(&self, market_id: &MarketId, status: MarketStatus) {
        if let Ok(mut markets) = self.markets.write() {
            if let Some(market) = markets.get_mut(market_id) {
                market.status = status;
            }
        }
    }
}

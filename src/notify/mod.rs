//! Pool update notifications
//!
//! Broadcasts a [`PoolUpdate`] after every committed admission and every
//! completed settlement. Delivery may repeat or reorder; [`PoolView`] keeps a
//! subscriber-side copy that only moves forward.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::types::{Amount, MarketId, MarketStatus, OutcomeId, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    Admission,
    Settlement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub market_id: MarketId,
    pub version: u64,
    pub status: MarketStatus,
    pub kind: UpdateKind,
    pub total_stake: Amount,
    pub per_outcome_stake: BTreeMap<OutcomeId, Amount>,
    /// Milliseconds since epoch
    pub emitted_at: i64,
}

impl PoolUpdate {
    pub fn from_pool(pool: &Pool, status: MarketStatus, kind: UpdateKind) -> Self {
        Self {
            market_id: pool.market_id.clone(),
            version: pool.version,
            status,
            kind,
            total_stake: pool.total_stake,
            per_outcome_stake: pool.per_outcome_stake.clone(),
            emitted_at: Utc::now().timestamp_millis(),
        }
    }

    /// Ordering key: pool version first, lifecycle stage second.
    /// Settlement leaves the version unchanged but must still supersede.
    pub fn sequence(&self) -> (u64, u8) {
        let stage = match self.status {
            MarketStatus::Open => 0,
            MarketStatus::Closing => 1,
            MarketStatus::Closed => 2,
            MarketStatus::Settled => 3,
        };
        (self.version, stage)
    }
}

/// Publisher side of the notification channel
#[derive(Debug, Clone)]
pub struct PoolNotifier {
    tx: broadcast::Sender<PoolUpdate>,
}

impl PoolNotifier {
    /// Create a notifier with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolUpdate> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream; lagged gaps are skipped, callers resync from a snapshot
    pub fn stream(&self) -> impl Stream<Item = PoolUpdate> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|r| r.ok())
    }

    pub fn publish(&self, update: PoolUpdate) {
        // No receivers is fine
        let _ = self.tx.send(update);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PoolNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Subscriber-side read model, idempotent on update sequence
#[derive(Debug, Default)]
pub struct PoolView {
    markets: HashMap<MarketId, PoolUpdate>,
}

impl PoolView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update; returns false for duplicates and stale deliveries
    pub fn apply(&mut self, update: PoolUpdate) -> bool {
        match self.markets.get(&update.market_id) {
            Some(current) if current.sequence() >= update.sequence() => false,
            _ => {
                self.markets.insert(update.market_id.clone(), update);
                true
            }
        }
    }

    pub fn get(&self, market_id: &MarketId) -> Option<&PoolUpdate> {
        self.markets.get(market_id)
    }

    pub fn version(&self, market_id: &MarketId) -> Option<u64> {
        self.markets.get(market_id).map(|u| u.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(version: u64, status: MarketStatus, total: f64) -> PoolUpdate {
        PoolUpdate {
            market_id: MarketId::from("m"),
            version,
            status,
            kind: UpdateKind::Admission,
            total_stake: total,
            per_outcome_stake: BTreeMap::new(),
            emitted_at: 0,
        }
    }

    #[test]
    fn view_ignores_duplicates_and_stale_updates() {
        let mut view = PoolView::new();
        assert!(view.apply(update(2, MarketStatus::Open, 200.0)));
        assert!(!view.apply(update(2, MarketStatus::Open, 200.0)));
        assert!(!view.apply(update(1, MarketStatus::Open, 100.0)));
        assert_eq!(view.get(&MarketId::from("m")).unwrap().total_stake, 200.0);

        assert!(view.apply(update(2, MarketStatus::Settled, 200.0)));
        assert!(!view.apply(update(2, MarketStatus::Open, 200.0)));
        assert_eq!(view.version(&MarketId::from("m")), Some(2));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let notifier = PoolNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.publish(update(1, MarketStatus::Open, 10.0));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.version, 1);
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn stream_yields_updates() {
        let notifier = PoolNotifier::new(8);
        let mut stream = Box::pin(notifier.stream());
        notifier.publish(update(3, MarketStatus::Open, 30.0));
        let received = stream.next().await.unwrap();
        assert_eq!(received.version, 3);
    }
}

//! Core types used throughout the tote engine
//!
//! Defines identifiers, markets, pools and wagers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::pool::Quote;

/// Amount of internal currency (stakes, balances, payouts)
pub type Amount = f64;

/// Market identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(pub String);

/// Outcome identifier, unique within its market
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeId(pub String);

/// Bettor identifier (balances live in the external balance store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BettorId(pub String);

/// Wager identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WagerId(pub uuid::Uuid);

impl WagerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for WagerId {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(MarketId);
string_id!(OutcomeId);
string_id!(BettorId);

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Closing,
    Closed,
    Settled,
}

impl Default for MarketStatus {
    fn default() -> Self {
        MarketStatus::Open
    }
}

impl MarketStatus {
    /// The only status reachable from this one, if any
    pub fn next(&self) -> Option<Self> {
        match self {
            MarketStatus::Open => Some(MarketStatus::Closing),
            MarketStatus::Closing => Some(MarketStatus::Closed),
            MarketStatus::Closed => Some(MarketStatus::Settled),
            MarketStatus::Settled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Settled)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "OPEN"),
            MarketStatus::Closing => write!(f, "CLOSING"),
            MarketStatus::Closed => write!(f, "CLOSED"),
            MarketStatus::Settled => write!(f, "SETTLED"),
        }
    }
}

/// A single question with mutually exclusive outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Fraction of the pool retained by the operator (0.0 - 1.0)
    pub takeout_rate: f64,
    /// No wagers accepted at or after this instant
    pub closes_at: Option<DateTime<Utc>>,
    pub status: MarketStatus,
    pub outcomes: Vec<OutcomeId>,
    /// Pinned by the first settlement pass; every later pass must match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_winners: Vec<OutcomeId>,
}

impl Market {
    pub fn new(id: impl Into<String>, takeout_rate: f64, outcomes: &[&str]) -> Self {
        Self {
            id: MarketId::new(id),
            takeout_rate,
            closes_at: None,
            status: MarketStatus::Open,
            outcomes: outcomes.iter().map(|o| OutcomeId::from(*o)).collect(),
            declared_winners: Vec::new(),
        }
    }

    pub fn with_close_time(mut self, closes_at: DateTime<Utc>) -> Self {
        self.closes_at = Some(closes_at);
        self
    }

    pub fn has_outcome(&self, outcome_id: &OutcomeId) -> bool {
        self.outcomes.iter().any(|o| o == outcome_id)
    }

    /// True once `now` has reached the configured close time
    pub fn is_past_close(&self, now: DateTime<Utc>) -> bool {
        self.closes_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// Aggregated stakes of one market, partitioned by outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub market_id: MarketId,
    /// Incremented on every committed mutation
    pub version: u64,
    pub total_stake: Amount,
    pub per_outcome_stake: BTreeMap<OutcomeId, Amount>,
    /// Set at close; a frozen pool rejects every mutation
    pub frozen: bool,
}

impl Pool {
    pub fn empty(market_id: MarketId, outcomes: &[OutcomeId]) -> Self {
        Self {
            market_id,
            version: 0,
            total_stake: 0.0,
            per_outcome_stake: outcomes.iter().map(|o| (o.clone(), 0.0)).collect(),
            frozen: false,
        }
    }

    /// Stake currently sitting on `outcome_id` (0 for unknown outcomes)
    pub fn stake_on(&self, outcome_id: &OutcomeId) -> Amount {
        self.per_outcome_stake.get(outcome_id).copied().unwrap_or(0.0)
    }

    /// Combined stake on a set of outcomes
    pub fn stake_on_all<'a>(&self, outcomes: impl IntoIterator<Item = &'a OutcomeId>) -> Amount {
        outcomes.into_iter().map(|o| self.stake_on(o)).sum()
    }

    /// Sum of per-outcome stakes, in outcome order
    pub fn outcome_sum(&self) -> Amount {
        self.per_outcome_stake.values().sum()
    }

    /// `sum(per_outcome_stake) == total_stake`
    pub fn is_consistent(&self) -> bool {
        self.outcome_sum() == self.total_stake
    }

    pub fn is_empty(&self) -> bool {
        self.total_stake <= 0.0
    }
}

/// One committed stake on one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub market_id: MarketId,
    pub outcome_id: OutcomeId,
    pub bettor_id: BettorId,
    pub stake: Amount,
    /// Quote computed against the pool the wager was committed into
    pub quote_at_placement: Quote,
    /// Pool version produced by this wager's commit
    pub pool_version: u64,
    pub placed_at: DateTime<Utc>,
    pub settled: bool,
    pub payout: Option<Amount>,
}

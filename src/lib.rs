//! Tote Library
//!
//! Parimutuel pool accounting, odds quoting and settlement

pub mod admission;
pub mod balance;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod persistence;
pub mod pool;
pub mod settlement;
pub mod types;
pub mod wagers;

pub use engine::{MarketSummary, OddsLine, ToteEngine};
pub use error::{ErrorClass, SettlementError, WagerError};
pub use pool::{quote, Quote};
pub use types::{Amount, BettorId, Market, MarketId, MarketStatus, OutcomeId, Pool, Wager, WagerId};

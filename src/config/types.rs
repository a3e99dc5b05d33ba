//! Configuration section types

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub admission: AdmissionConfig,
    pub settlement: SettlementConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Commit attempts before a contended wager fails as transient
    pub max_attempts: u32,
    /// First retry delay in milliseconds
    pub backoff_base_ms: u64,
    /// Retry delay ceiling in milliseconds
    pub backoff_max_ms: u64,
    /// Random extra delay as a fraction of the base delay (0.0 - 1.0)
    pub jitter_pct: f64,
    /// Attempts per balance-store call before surfacing Unavailable
    pub dependency_attempts: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            backoff_base_ms: 1,
            backoff_max_ms: 50,
            jitter_pct: 0.5,
            dependency_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Attempts per wager credit before the pass stops (resumable)
    pub credit_attempts: u32,
    /// Retry delay between credit attempts in milliseconds
    pub backoff_base_ms: u64,
    /// Refund every stake when no money sits on a winning outcome
    pub refund_when_no_winning_stake: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            credit_attempts: 3,
            backoff_base_ms: 10,
            refund_when_no_winning_stake: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Save engine state after settlement
    pub enabled: bool,
    /// JSON state file path
    pub state_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    pub format: String,
    /// EnvFilter directive, overridden by RUST_LOG
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub market_id: String,
    pub outcomes: Vec<String>,
    pub takeout_rate: f64,
    /// Market closes this many seconds after start (0 = explicit close only)
    pub close_after_secs: u64,
    pub bettors: usize,
    pub wagers_per_bettor: usize,
    pub initial_balance: f64,
    pub min_stake: f64,
    pub max_stake: f64,
    /// Winning outcome; empty picks one at random
    pub winner: String,
}

//! Configuration management for tote
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (TOTE__*)
            .add_source(Environment::with_prefix("TOTE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        let config = Self::builder()?
            .build()
            .context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            // Admission defaults
            .set_default("engine.admission.max_attempts", 64)?
            .set_default("engine.admission.backoff_base_ms", 1)?
            .set_default("engine.admission.backoff_max_ms", 50)?
            .set_default("engine.admission.jitter_pct", 0.5)?
            .set_default("engine.admission.dependency_attempts", 3)?
            // Settlement defaults
            .set_default("engine.settlement.credit_attempts", 3)?
            .set_default("engine.settlement.backoff_base_ms", 10)?
            .set_default("engine.settlement.refund_when_no_winning_stake", false)?
            // Notification defaults
            .set_default("engine.notifications.channel_capacity", 1024)?
            // Persistence defaults
            .set_default("persistence.enabled", false)?
            .set_default("persistence.state_file", "./data/tote_state.json")?
            // Logging defaults
            .set_default("logging.format", "pretty")?
            .set_default("logging.filter", "info")?
            // Simulation defaults
            .set_default("simulation.market_id", "demo-race")?
            .set_default("simulation.outcomes", vec!["red", "blue", "green"])?
            .set_default("simulation.takeout_rate", 0.1)?
            .set_default("simulation.close_after_secs", 0)?
            .set_default("simulation.bettors", 20)?
            .set_default("simulation.wagers_per_bettor", 5)?
            .set_default("simulation.initial_balance", 1000.0)?
            .set_default("simulation.min_stake", 5.0)?
            .set_default("simulation.max_stake", 100.0)?
            .set_default("simulation.winner", "")?;
        Ok(builder)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let admission = &self.engine.admission;
        if admission.max_attempts == 0 {
            bail!("engine.admission.max_attempts must be at least 1");
        }
        if admission.dependency_attempts == 0 {
            bail!("engine.admission.dependency_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&admission.jitter_pct) {
            bail!("engine.admission.jitter_pct must be within 0.0 - 1.0");
        }
        if admission.backoff_max_ms < admission.backoff_base_ms {
            bail!("engine.admission.backoff_max_ms must not be below backoff_base_ms");
        }
        if self.engine.settlement.credit_attempts == 0 {
            bail!("engine.settlement.credit_attempts must be at least 1");
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            bail!("logging.format must be \"pretty\" or \"json\"");
        }

        let sim = &self.simulation;
        if sim.outcomes.is_empty() {
            bail!("simulation.outcomes must not be empty");
        }
        if !(0.0..=1.0).contains(&sim.takeout_rate) {
            bail!("simulation.takeout_rate must be within 0.0 - 1.0");
        }
        if sim.min_stake <= 0.0 || sim.max_stake < sim.min_stake {
            bail!("simulation stake range must satisfy 0 < min_stake <= max_stake");
        }
        if !sim.winner.is_empty() && !sim.outcomes.contains(&sim.winner) {
            bail!("simulation.winner {} is not one of the outcomes", sim.winner);
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "max_attempts={} dependency_attempts={} credit_attempts={} refund_no_winner={} persistence={} log={}",
            self.engine.admission.max_attempts,
            self.engine.admission.dependency_attempts,
            self.engine.settlement.credit_attempts,
            self.engine.settlement.refund_when_no_winning_stake,
            self.persistence.enabled,
            self.logging.format,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_and_validate() {
        let cfg = AppConfig::defaults().unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.engine.admission.max_attempts, 64);
        assert_eq!(cfg.simulation.outcomes.len(), 3);
        assert!(cfg.digest().contains("max_attempts=64"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.engine.admission.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::defaults().unwrap();
        cfg.simulation.winner = "purple".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::defaults().unwrap();
        cfg.logging.format = "xml".to_string();
        assert!(cfg.validate().is_err());
    }
}

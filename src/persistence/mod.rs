//! JSON state persistence
//!
//! Saves markets, pools and wagers so a restarted engine can resume,
//! including a settlement pass that stopped half way.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::types::{Market, Pool, Wager};

/// Everything the engine needs to come back after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Milliseconds since epoch
    pub saved_at: i64,
    /// Market definitions, each carrying its lifecycle status
    pub markets: Vec<Market>,
    pub pools: Vec<Pool>,
    pub wagers: Vec<Wager>,
}

impl EngineSnapshot {
    pub fn new(markets: Vec<Market>, pools: Vec<Pool>, wagers: Vec<Wager>) -> Self {
        Self {
            saved_at: Utc::now().timestamp_millis(),
            markets,
            pools,
            wagers,
        }
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save_state(&self, snapshot: &EngineSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        // Write-then-rename so a crash never leaves a torn file behind
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            markets = snapshot.markets.len(),
            wagers = snapshot.wagers.len(),
            "💾 [STATE] State saved"
        );
        Ok(())
    }

    /// `None` when no state file exists yet
    pub fn load_state(&self) -> Result<Option<EngineSnapshot>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "💾 [STATE] No state file found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let snapshot: EngineSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt state file {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            markets = snapshot.markets.len(),
            pools = snapshot.pools.len(),
            wagers = snapshot.wagers.len(),
            "💾 [STATE] State loaded"
        );
        Ok(Some(snapshot))
    }
}

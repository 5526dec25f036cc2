//! CLI configuration file.
//!
//! ```toml
//! [engine]
//! flags = 1
//! batch_attempts = 2
//! single_fallback = true
//!
//! [watch]
//! interval_ms = 500
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use memstream_core::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between refreshes in milliseconds
    pub interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }
}

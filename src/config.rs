use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adb::locate_adb;
use crate::bridge::{BridgeOptions, DEFAULT_WIRELESS_PORT};
use crate::resolve::{DEFAULT_ROUTE_ANCHOR, ResolverMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit adb location. Searched on PATH when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adb_path: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub wireless_port: u16,
    pub route_anchor: String,
    pub ready_attempts: u32,
    pub ready_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub resolve_retry_delay_ms: u64,
    pub resolver: ResolverMode,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adb_path: None,
            command_timeout_secs: 6,
            wireless_port: DEFAULT_WIRELESS_PORT,
            route_anchor: DEFAULT_ROUTE_ANCHOR.to_string(),
            ready_attempts: 3,
            ready_delay_ms: 2000,
            settle_delay_ms: 1000,
            resolve_retry_delay_ms: 1000,
            resolver: ResolverMode::Full,
            poll_interval_ms: 2000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// The adb executable to use: the configured one, else the one on PATH.
    pub fn adb(&self) -> PathBuf {
        self.adb_path.clone().unwrap_or_else(locate_adb)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            port: self.wireless_port,
            ready_attempts: self.ready_attempts,
            ready_delay: Duration::from_millis(self.ready_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            resolve_retry_delay: Duration::from_millis(self.resolve_retry_delay_ms),
            route_anchor: self.route_anchor.clone(),
            resolver: self.resolver,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("castlink").join("config.toml"))
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::commands::ConsoleOptions;
use crate::monitor::{MonitorSettings, TcpChannelConfig};
use crate::path::PathResolver;

pub const DEFAULT_MONITOR_ADDR: &str = "127.0.0.1:17410";

/// Console and monitor settings, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monitor_addr: String,
    pub poll_interval_ms: u64,
    pub throttle_ms: u64,
    pub reconnect_delay_ms: u64,
    pub allow_path_writes: bool,
    /// Extra root aliases: alias name -> path below the host root.
    pub aliases: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let monitor = MonitorSettings::default();
        Self {
            monitor_addr: DEFAULT_MONITOR_ADDR.to_string(),
            poll_interval_ms: monitor.poll_interval.as_millis() as u64,
            throttle_ms: monitor.throttle.as_millis() as u64,
            reconnect_delay_ms: 3_000,
            allow_path_writes: false,
            aliases: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing settings JSON from {}", path.display()))
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            throttle: Duration::from_millis(self.throttle_ms),
        }
    }

    pub fn console_options(&self) -> ConsoleOptions {
        ConsoleOptions {
            allow_path_writes: self.allow_path_writes,
        }
    }

    /// Resolver with the default `Root` alias plus the configured ones.
    pub fn resolver(&self) -> Result<PathResolver> {
        let mut resolver = PathResolver::new();
        for (name, target) in &self.aliases {
            resolver
                .add_alias(name, target)
                .with_context(|| format!("registering alias {name} -> {target}"))?;
        }
        Ok(resolver)
    }

    pub fn channel_config(&self) -> Result<TcpChannelConfig> {
        let mut config = TcpChannelConfig::resolve(self.monitor_addr.as_str())?;
        config.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.build = Some(env!("CARGO_PKG_VERSION").to_string());
        Ok(config)
    }
}

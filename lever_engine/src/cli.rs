use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    about = "Live console for inspecting and patching a host object graph",
    version
)]
pub struct Args {
    /// JSON settings file; flags below override its values
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Address of the monitor listener (host:port)
    #[arg(long)]
    pub monitor_addr: Option<String>,

    /// Interval between monitor polls, in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Minimum interval between two pushes for one watch, in milliseconds
    #[arg(long)]
    pub throttle_ms: Option<u64>,

    /// Delay before reconnecting to the listener, in milliseconds
    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,

    /// Enable commands that assign arbitrary host paths (chng, restore-snapshot)
    #[arg(long)]
    pub allow_path_writes: bool,

    /// Command to run before reading stdin (repeatable)
    #[arg(long = "exec", value_name = "LINE")]
    pub exec: Vec<String>,

    /// Exit after running the --exec commands
    #[arg(long)]
    pub batch: bool,
}

impl Args {
    /// File settings (or defaults) with command-line overrides applied.
    pub fn resolve_settings(&self) -> Result<Settings> {
        let mut settings = match self.settings.as_deref() {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(addr) = self.monitor_addr.as_ref() {
            settings.monitor_addr = addr.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.poll_interval_ms = ms;
        }
        if let Some(ms) = self.throttle_ms {
            settings.throttle_ms = ms;
        }
        if let Some(ms) = self.reconnect_delay_ms {
            settings.reconnect_delay_ms = ms;
        }
        if self.allow_path_writes {
            settings.allow_path_writes = true;
        }
        Ok(settings)
    }
}

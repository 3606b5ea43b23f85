//! Preferences and Settings
//!
//! Both read from the same layered configuration: an optional TOML file
//! followed by `BUS_BRIDGE_*` environment variables.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, Level};

use crate::error::BridgeError;

/// Device address key
pub const KEY_DEVICE_ADDRESS: &str = "bluetooth_mac";
/// `;`-separated startup command list key
pub const KEY_STARTUP_COMMANDS: &str = "elm_commands";
/// Number of `elm_monitorN` signal slots
pub const MONITOR_SLOTS: usize = 10;

/// Key for signal slot `n` (1-based)
pub fn monitor_key(n: usize) -> String {
    format!("elm_monitor{}", n)
}

/// Key/value preferences provider
pub trait Preferences: Send + Sync {
    fn get_string(&self, key: &str, default: &str) -> String;
}

/// Preferences answered from layered configuration
#[derive(Debug, Clone)]
pub struct ConfigPreferences {
    config: Config,
}

impl ConfigPreferences {
    /// Load the optional file at `path`, then the environment
    pub fn load(path: &str) -> Result<Self, BridgeError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("BUS_BRIDGE"))
            .build()?;
        debug!("Loaded configuration from {}", path);
        Ok(Self { config })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Typed ambient settings from the same sources
    pub fn settings(&self) -> Result<Settings, BridgeError> {
        Ok(self.config.clone().try_deserialize()?)
    }
}

impl Preferences for ConfigPreferences {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.config
            .get_string(key)
            .unwrap_or_else(|_| default.to_string())
    }
}

/// Ambient runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Max log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Serial link baud rate
    pub baud_rate: u32,
    /// Delay before every connect attempt
    pub connect_retry_wait_ms: u64,
    /// Command queue poll period while the link is busy
    pub queue_busy_wait_ms: u64,
    /// Pause after a break before the next write
    pub break_settle_ms: u64,
    /// Line silence before a held separator is resolved
    pub separator_settle_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            baud_rate: elm_protocol::DEFAULT_BAUD_RATE,
            connect_retry_wait_ms: 2000,
            queue_busy_wait_ms: 100,
            break_settle_ms: 250,
            separator_settle_ms: 30,
        }
    }
}

impl Settings {
    pub fn level(&self) -> Result<Level, BridgeError> {
        self.log_level
            .parse()
            .map_err(|_| BridgeError::InvalidSetting {
                key: "log_level".to_string(),
                reason: format!("unknown level '{}'", self.log_level),
            })
    }

    pub fn connect_retry_wait(&self) -> Duration {
        Duration::from_millis(self.connect_retry_wait_ms)
    }

    pub fn queue_busy_wait(&self) -> Duration {
        Duration::from_millis(self.queue_busy_wait_ms)
    }

    pub fn break_settle(&self) -> Duration {
        Duration::from_millis(self.break_settle_ms)
    }

    pub fn separator_settle(&self) -> Duration {
        Duration::from_millis(self.separator_settle_ms)
    }
}

//! Configuration types for Browser Warden
//!
//! Defines `Settings` and its sections. Every field has a serde default so a
//! partial config file (or none at all) always yields a usable value.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bwarden_driver::DriverConfig;

/// Application settings (.bwarden/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub cleanup: CleanupSettings,
}

/// Service lifecycle settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSettings {
    /// Start the proxy service as soon as the panel opens
    #[serde(default)]
    pub auto_start: bool,

    /// Bound on waiting for the driver session to come up
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Bound on waiting for a stopping worker before forcing teardown
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Process-name/cmdline regex used when orphaned driver processes must
    /// be killed directly
    #[serde(default = "default_reap_pattern")]
    pub reap_pattern: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            reap_pattern: default_reap_pattern(),
        }
    }
}

impl ServiceSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn default_start_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_reap_pattern() -> String {
    "(chromedriver|chromium|chrome)".to_string()
}

/// Console panel settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleSettings {
    /// Route console traffic into the in-memory panel buffer
    #[serde(default = "default_true")]
    pub show_console: bool,

    /// Lines retained by the panel buffer
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,

    /// Also mirror console traffic to the daily log file
    #[serde(default)]
    pub log_to_file: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            show_console: default_true(),
            buffer_lines: default_buffer_lines(),
            log_to_file: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_buffer_lines() -> usize {
    500
}

/// Temp-artifact cleanup settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CleanupSettings {
    /// Directory scanned for session artifacts. Empty means the system temp
    /// directory's `bwarden` subfolder.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl CleanupSettings {
    /// Effective artifact directory.
    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bwarden"))
    }
}

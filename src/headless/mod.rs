//! Headless panel mode - JSON event output for scripting and E2E testing
//!
//! The panel emits structured NDJSON events to stdout, one per line, so test
//! scripts can follow the service lifecycle without scraping log text.
//!
//! # Example Output
//!
//! ```json
//! {"event":"service_started","pid":12345,"timestamp":1704700001000}
//! {"event":"log","level":"info","message":"Please wait...","timestamp":1704700001500}
//! {"event":"service_stopped","timestamp":1704700002000}
//! ```

pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

/// Events emitted on stdout in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PanelEvent {
    /// The driver session is live and serving
    ServiceStarted { pid: Option<u32>, timestamp: i64 },

    /// The service wound down after an explicit stop
    ServiceStopped { timestamp: i64 },

    /// The service hit an unrecoverable error
    ServiceFailed { timestamp: i64 },

    /// Console line routed to stdout
    Log {
        level: String,
        message: String,
        timestamp: i64,
    },

    /// Panel-level error
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },

    /// Response to a status query: current state plus recent console lines
    Status {
        state: String,
        recent_logs: Vec<String>,
        timestamp: i64,
    },
}

impl PanelEvent {
    /// Emit this event to stdout as one NDJSON line.
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize panel event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write panel event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush panel stdout: {}", e);
        }
    }

    /// Current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn service_started(pid: Option<u32>) -> Self {
        Self::ServiceStarted {
            pid,
            timestamp: Self::now(),
        }
    }

    pub fn service_stopped() -> Self {
        Self::ServiceStopped {
            timestamp: Self::now(),
        }
    }

    pub fn service_failed() -> Self {
        Self::ServiceFailed {
            timestamp: Self::now(),
        }
    }

    pub fn log(level: &str, message: String) -> Self {
        Self::Log {
            level: level.to_string(),
            message,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }

    pub fn status(state: &str, recent_logs: Vec<String>) -> Self {
        Self::Status {
            state: state.to_string(),
            recent_logs,
            timestamp: Self::now(),
        }
    }
}

//! Lifecycle event definitions

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Kind of a published lifecycle-boundary transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEventKind {
    /// The driver session is live (entered `Running`)
    BrowserStarted,
    /// The service wound down to `Idle`
    BrowserStopped,
    /// The worker hit an unrecoverable error (entered `Failed`)
    BrowserFailed,
}

impl StateEventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::BrowserStarted => "BROWSER_STARTED",
            Self::BrowserStopped => "BROWSER_STOPPED",
            Self::BrowserFailed => "BROWSER_FAILED",
        }
    }
}

/// Immutable notification published to subscribers on a lifecycle boundary.
///
/// Produced exactly once per published transition; subscribers registered
/// after an event was published never receive it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateEvent {
    pub kind: StateEventKind,
    pub timestamp: DateTime<Local>,
}

impl StateEvent {
    /// Create an event stamped with the current time
    pub fn now(kind: StateEventKind) -> Self {
        Self {
            kind,
            timestamp: Local::now(),
        }
    }

    pub fn started() -> Self {
        Self::now(StateEventKind::BrowserStarted)
    }

    pub fn stopped() -> Self {
        Self::now(StateEventKind::BrowserStopped)
    }

    pub fn failed() -> Self {
        Self::now(StateEventKind::BrowserFailed)
    }
}

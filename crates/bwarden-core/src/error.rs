//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ServiceState;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    /// Attempted state transition not in the allowed table.
    ///
    /// This is a programming-contract violation, never a runtime condition
    /// to recover from silently.
    #[error("invalid service transition: {from} -> {to}")]
    InvalidTransition {
        from: ServiceState,
        to: ServiceState,
    },

    #[error("driver session could not be acquired: {reason}")]
    WorkerAcquireFailed { reason: String },

    #[error("worker did not acknowledge cancellation within {timeout_ms}ms")]
    WorkerStopTimeout { timeout_ms: u64 },

    #[error("subscriber failed during publish: {message}")]
    Subscriber { message: String },

    // ─────────────────────────────────────────────────────────────
    // Driver/Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("driver executable not found: {command}")]
    DriverNotFound { command: String },

    #[error("failed to spawn driver process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("failed to reap process {pid}: {reason}")]
    Reap { pid: u32, reason: String },

    #[error("failed to delete artifact {}: {reason}", .path.display())]
    Cleanup { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("channel send error: {message}")]
    ChannelSend { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn invalid_transition(from: ServiceState, to: ServiceState) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn worker_acquire(reason: impl Into<String>) -> Self {
        Self::WorkerAcquireFailed {
            reason: reason.into(),
        }
    }

    pub fn subscriber(message: impl Into<String>) -> Self {
        Self::Subscriber {
            message: message.into(),
        }
    }

    pub fn reap(pid: u32, reason: impl Into<String>) -> Self {
        Self::Reap {
            pid,
            reason: reason.into(),
        }
    }

    pub fn cleanup(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Cleanup {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error.
    ///
    /// Recoverable errors are reported through the console bridge and
    /// resolved locally (state falls back to `Idle`, batches continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::WorkerAcquireFailed { .. }
                | Error::WorkerStopTimeout { .. }
                | Error::Subscriber { .. }
                | Error::Reap { .. }
                | Error::Cleanup { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DriverNotFound { .. }
                | Error::ProcessSpawn { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::invalid_transition(ServiceState::Idle, ServiceState::Running);
        assert_eq!(err.to_string(), "invalid service transition: idle -> running");

        let err = Error::worker_acquire("driver refused connection");
        assert!(err.to_string().contains("driver refused connection"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_invalid_transition_is_neither_recoverable_nor_fatal() {
        // Surfaced loudly to the caller instead of being swallowed or
        // taking the process down.
        let err = Error::invalid_transition(ServiceState::Idle, ServiceState::Idle);
        assert!(!err.is_recoverable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::worker_acquire("test").is_recoverable());
        assert!(Error::WorkerStopTimeout { timeout_ms: 5000 }.is_recoverable());
        assert!(Error::reap(42, "access denied").is_recoverable());
        assert!(Error::cleanup("/tmp/x", "busy").is_recoverable());
        assert!(Error::subscriber("callback failed").is_recoverable());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::DriverNotFound {
            command: "chromedriver".into()
        }
        .is_fatal());
        assert!(Error::ProcessSpawn {
            reason: "permission denied".into()
        }
        .is_fatal());
        assert!(!Error::worker_acquire("test").is_fatal());
    }

    #[test]
    fn test_cleanup_error_carries_path() {
        let err = Error::cleanup("/tmp/run/artifact.png", "held by another process");
        assert!(err.to_string().contains("/tmp/run/artifact.png"));
    }
}

//! Core domain type definitions

/// Lifecycle state of the supervised automation service.
///
/// Exactly one value exists at any instant; all mutation goes through the
/// state store's `transition`, which enforces the allowed-transition table
/// below. There are no terminal states -- every path cycles back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// No worker exists; the service may be started
    #[default]
    Idle,
    /// A worker was spawned and is acquiring the driver session
    Starting,
    /// The driver session is live and serving
    Running,
    /// Cancellation was signalled; waiting for the worker to wind down
    Stopping,
    /// The worker hit an unrecoverable error; cleanup pending
    Failed,
}

impl ServiceState {
    /// Whether a `self -> to` transition is allowed.
    ///
    /// Anything not listed here is a programming error and is rejected by
    /// the state store with [`crate::Error::InvalidTransition`].
    pub fn can_transition_to(self, to: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Idle)
                | (Stopping, Failed)
                | (Failed, Idle)
        )
    }

    /// A worker (and therefore a handle) exists in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Short display name, used in console messages and status output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Console message severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Get display prefix for log level
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warning => "WRN",
            LogLevel::Error => "ERR",
        }
    }

    /// Get numeric severity value for comparison.
    /// Higher values indicate more severe levels.
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceState::*;

    #[test]
    fn test_cycle_is_allowed() {
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Idle));
    }

    #[test]
    fn test_failure_paths() {
        assert!(Starting.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(Stopping.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Idle));
    }

    #[test]
    fn test_disallowed_transitions() {
        assert!(!Idle.can_transition_to(Running));
        assert!(!Idle.can_transition_to(Idle));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Idle.can_transition_to(Failed));
    }

    #[test]
    fn test_is_active() {
        assert!(!Idle.is_active());
        assert!(Starting.is_active());
        assert!(Running.is_active());
        assert!(Stopping.is_active());
        assert!(!Failed.is_active());
    }

    #[test]
    fn test_level_severity_ordering() {
        assert!(LogLevel::Error.severity() > LogLevel::Warning.severity());
        assert!(LogLevel::Warning.severity() > LogLevel::Info.severity());
        assert!(LogLevel::Info.severity() > LogLevel::Debug.severity());
    }
}

//! Automation driver interface
//!
//! The orchestrator never talks to a browser directly; it acquires and
//! releases sessions through [`AutomationDriver`]. The production
//! implementation ([`ProcessDriver`]) launches the driver as a child process;
//! tests substitute their own implementations.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bwarden_core::prelude::*;
use bwarden_core::ConsoleBridge;

use crate::process::DriverProcess;

/// Opaque configuration bundle handed to the driver on acquire.
///
/// `command`/`args`/`env` describe how to launch the driver process;
/// `extras` carries driver-specific key/value options the panel does not
/// interpret.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DriverConfig {
    /// Driver executable (e.g. a chromedriver wrapper script)
    #[serde(default)]
    pub command: String,

    /// Arguments passed to the driver executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the driver process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Opaque driver options (profile dir, headless flags, ...)
    #[serde(default)]
    pub extras: HashMap<String, String>,

    /// How long `release_session` waits for a natural exit before killing
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
}

fn default_release_grace_ms() -> u64 {
    2_000
}

impl DriverConfig {
    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    /// Opaque option lookup with a default, mirroring the config store's
    /// `get(key, default)` surface.
    pub fn extra<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.extras.get(key).map(String::as_str).unwrap_or(default)
    }
}

/// A live driver session.
///
/// Wraps the underlying driver process when one exists; detached sessions
/// (no process) are used by in-memory driver implementations in tests.
pub struct DriverSession {
    process: Option<DriverProcess>,
    release_grace: Duration,
}

impl DriverSession {
    /// Session backed by a real driver process.
    pub fn with_process(process: DriverProcess, release_grace: Duration) -> Self {
        Self {
            process: Some(process),
            release_grace,
        }
    }

    /// Session with no underlying process (test drivers).
    pub fn detached() -> Self {
        Self {
            process: None,
            release_grace: Duration::ZERO,
        }
    }

    /// PID of the underlying driver process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// True once the underlying process has exited. Detached sessions never
    /// exit on their own.
    pub fn has_exited(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.has_exited())
    }

    /// Exit code of the underlying process, once exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.process.as_ref().and_then(|p| p.exit_code())
    }

    /// Resolve when the underlying process exits unexpectedly.
    /// Pends forever for detached sessions.
    pub async fn wait_exited(&self) {
        match &self.process {
            Some(process) => process.wait_exited().await,
            None => std::future::pending().await,
        }
    }

    /// Wind the session down: bounded wait for natural exit, then kill.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        match &mut self.process {
            Some(process) => process.shutdown(grace).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSession")
            .field("has_process", &self.process.is_some())
            .field("pid", &self.pid())
            .finish()
    }
}

/// The automation-driver seam.
///
/// `acquire_session` must either return a live session or an error; it must
/// not leak a half-started process on failure. `release_session` is
/// best-effort and bounded.
#[trait_variant::make(AutomationDriver: Send)]
pub trait LocalAutomationDriver {
    /// Start a driver session using the supplied configuration.
    async fn acquire_session(&self, config: &DriverConfig) -> Result<DriverSession>;

    /// Release a previously acquired session.
    async fn release_session(&self, session: DriverSession) -> Result<()>;
}

/// Production driver: launches the configured driver command as a child
/// process and treats "process is up" as "session acquired".
pub struct ProcessDriver {
    console: ConsoleBridge,
}

impl ProcessDriver {
    pub fn new(console: ConsoleBridge) -> Self {
        Self { console }
    }
}

impl AutomationDriver for ProcessDriver {
    async fn acquire_session(&self, config: &DriverConfig) -> Result<DriverSession> {
        if config.command.is_empty() {
            return Err(Error::worker_acquire("no driver command configured"));
        }

        // Spawn errors keep their own variants: a missing executable stays
        // fatal instead of degrading into a retryable acquire failure.
        let process = DriverProcess::spawn(config, self.console.clone())?;

        // A driver that dies within its first moments never had a session.
        // Give the wait task a beat to observe an immediate spawn-and-crash.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if process.has_exited() {
            return Err(Error::worker_acquire(format!(
                "driver exited immediately with code {:?}",
                process.exit_code()
            )));
        }

        info!("Driver session acquired (PID: {:?})", process.id());
        Ok(DriverSession::with_process(process, config.release_grace()))
    }

    async fn release_session(&self, mut session: DriverSession) -> Result<()> {
        let grace = session.release_grace;
        session.shutdown(grace).await?;
        info!("Driver session released");
        Ok(())
    }
}

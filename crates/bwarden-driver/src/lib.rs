//! bwarden-driver - The automation-driver seam for Browser Warden
//!
//! Provides:
//! - [`AutomationDriver`] - the trait the orchestrator drives a session through
//! - [`DriverProcess`] - child-process harness for a driver-controlled browser
//! - [`ProcessReaper`] - pattern-based termination of orphaned driver processes
//! - [`ResourceJanitor`] - failure-tolerant temp-artifact cleanup

pub mod driver;
pub mod janitor;
pub mod process;
pub mod reaper;

pub use driver::{AutomationDriver, DriverConfig, DriverSession, ProcessDriver};
pub use janitor::{PurgeReport, ResourceJanitor, TempArtifact};
pub use process::DriverProcess;
pub use reaper::{ProcessReaper, ReapFailure, ReapReport};

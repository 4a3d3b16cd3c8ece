//! bwarden-app - Service lifecycle and state broadcast for Browser Warden
//!
//! The control plane of the panel: the single [`StateStore`] instance, the
//! [`ServiceOrchestrator`] that turns start/stop/toggle commands into a
//! supervised worker lifecycle, and the [`ShutdownSequencer`] that tears
//! everything down in order at exit.

pub mod config;
pub mod handle;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

// Re-export primary types
pub use config::{load_settings, CleanupSettings, ConsoleSettings, ServiceSettings, Settings};
pub use handle::{ServiceHandle, StartOutcome};
pub use orchestrator::{OrchestratorConfig, ServiceOrchestrator};
pub use shutdown::{ShutdownReport, ShutdownSequencer, StepOutcome};
pub use state::{StateStore, SubscriberToken};

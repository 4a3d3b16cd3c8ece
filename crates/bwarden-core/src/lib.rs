//! # bwarden-core - Core Domain Types
//!
//! Foundation crate for Browser Warden. Provides the service lifecycle
//! vocabulary (states, events), error handling, the console bridge, and the
//! logging bootstrap.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, chrono, thiserror, tokio, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`ServiceState`] - Lifecycle state of the supervised service
//! - [`LogLevel`] - Console message severity
//!
//! ### Events (`events`)
//! - [`StateEvent`] - Published notification of a lifecycle-boundary change
//! - [`StateEventKind`] - Started / Stopped / Failed
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Console (`console`)
//! - [`ConsoleBridge`] - Thread-safe leveled message fan-in with a swappable sink
//! - [`ConsoleSink`] - Destination for console traffic
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use bwarden_core::prelude::*;
//! ```

pub mod console;
pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Browser Warden crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use console::{BufferSink, ConsoleBridge, ConsoleSink, TracingSink};
pub use error::{Error, Result, ResultExt};
pub use events::{StateEvent, StateEventKind};
pub use types::{LogLevel, ServiceState};

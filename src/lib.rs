//! Browser Warden - control panel for a driver-controlled browser session
//!
//! The session acts as a proxy backend: the panel's job is to start it,
//! supervise it, broadcast its lifecycle, and tear it down cleanly. The
//! library wires the workspace crates together; `main.rs` only parses
//! arguments.

pub mod headless;

pub use headless::runner::run_panel;

//! Configuration file parsing for Browser Warden
//!
//! Settings live in `.bwarden/config.toml` under the project directory.

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, parse_settings};
pub use types::*;

//! Settings parser for .bwarden/config.toml

use std::path::Path;

use bwarden_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const BWARDEN_DIR: &str = ".bwarden";

/// Load settings from .bwarden/config.toml
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(BWARDEN_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match parse_settings(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Parse a TOML settings document.
pub fn parse_settings(content: &str) -> Result<Settings> {
    toml::from_str(content).map_err(|e| Error::ConfigInvalid {
        message: e.to_string(),
    })
}

/// Create `.bwarden/config.toml` with commented defaults if missing.
///
/// Idempotent: an existing file is never touched.
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let bwarden_dir = project_path.join(BWARDEN_DIR);

    if !bwarden_dir.exists() {
        std::fs::create_dir_all(&bwarden_dir).context("Failed to create .bwarden dir")?;
    }

    let config_path = bwarden_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, default_config_content())
            .context("Failed to write config.toml")?;
        info!("Created default config.toml");
    }

    Ok(())
}

fn default_config_content() -> String {
    r#"# Browser Warden Configuration

[service]
auto_start = false            # Start the proxy service when the panel opens
start_timeout_ms = 10000      # Bound on driver session startup
stop_timeout_ms = 5000        # Bound on graceful stop before forced teardown
reap_pattern = "(chromedriver|chromium|chrome)"

[driver]
command = ""                  # Driver launcher; empty disables starting
args = []
release_grace_ms = 2000       # Grace period between SIGTERM-style release and kill

[console]
show_console = true
buffer_lines = 500
log_to_file = false

[cleanup]
# temp_dir = "/tmp/bwarden"   # Defaults to the system temp dir's bwarden folder
"#
    .to_string()
}

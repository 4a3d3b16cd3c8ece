//! Browser Warden - control panel for a driver-backed proxy session
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;

/// Browser Warden - supervise a driver-controlled browser session
#[derive(Parser, Debug)]
#[command(name = "bwarden")]
#[command(about = "Supervise a driver-controlled browser session acting as a proxy backend", long_about = None)]
struct Args {
    /// Project directory holding .bwarden/config.toml
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Start the service immediately, regardless of config
    #[arg(long)]
    start: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    bwarden_core::logging::init()?;

    let args = Args::parse();
    let project_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    browser_warden::run_panel(&project_path, args.start).await?;
    Ok(())
}

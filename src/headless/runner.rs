//! Headless panel runner - the control loop without a UI
//!
//! Wires the state store, console bridge, orchestrator, and shutdown
//! sequencer together, then drives them from stdin commands and Ctrl-C.
//! Lifecycle boundaries and console traffic are surfaced as NDJSON on
//! stdout.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use bwarden_app::{
    config, load_settings, OrchestratorConfig, ServiceOrchestrator, ShutdownSequencer, StateStore,
};
use bwarden_core::console::{BufferHandle, BufferSink, ConsoleSink, TracingSink};
use bwarden_core::prelude::*;
use bwarden_core::{ConsoleBridge, LogLevel, StateEventKind};
use bwarden_driver::{ProcessDriver, ProcessReaper, ResourceJanitor};

use super::PanelEvent;

/// Commands accepted on stdin, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Start,
    Stop,
    Toggle,
    Status,
    Quit,
}

/// Parse a stdin line into a command. Empty lines yield `None`.
pub fn parse_command(line: &str) -> Option<PanelCommand> {
    match line.trim() {
        "s" | "start" => Some(PanelCommand::Start),
        "x" | "stop" => Some(PanelCommand::Stop),
        "t" | "toggle" => Some(PanelCommand::Toggle),
        "?" | "status" => Some(PanelCommand::Status),
        "q" | "quit" => Some(PanelCommand::Quit),
        _ => None,
    }
}

/// Console sink for headless mode: every line goes to stdout as an NDJSON
/// log event, the last `buffer_lines` are retained for status queries, and
/// with `log_to_file` enabled the line also reaches the tracing log file.
struct PanelSink {
    buffer: BufferSink,
    file: Option<TracingSink>,
}

impl PanelSink {
    fn new(buffer: BufferSink, log_to_file: bool) -> Self {
        Self {
            buffer,
            file: log_to_file.then_some(TracingSink),
        }
    }
}

impl ConsoleSink for PanelSink {
    fn emit(&mut self, level: LogLevel, text: &str) {
        let level_str = match level {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        PanelEvent::log(level_str, text.to_string()).emit();
        self.buffer.emit(level, text);
        if let Some(file) = &mut self.file {
            file.emit(level, text);
        }
    }
}

/// Run the panel until quit is requested.
pub async fn run_panel(project_path: &Path, force_start: bool) -> Result<()> {
    info!("Project: {}", project_path.display());

    if let Err(e) = config::init_config_dir(project_path) {
        warn!("could not initialize config directory: {}", e);
    }
    let settings = load_settings(project_path);

    // Console first: everything below reports through it.
    let console = ConsoleBridge::new();
    let (buffer_sink, buffer) = BufferSink::new(settings.console.buffer_lines);
    if settings.console.show_console {
        console.set_sink(Box::new(PanelSink::new(
            buffer_sink,
            settings.console.log_to_file,
        )));
    }

    let reaper = match ProcessReaper::new(&settings.service.reap_pattern) {
        Ok(reaper) => Some(Arc::new(reaper)),
        Err(e) => {
            warn!("invalid reap_pattern, process reaping disabled: {}", e);
            console.warn(format!("Invalid reap_pattern in config: {}", e));
            None
        }
    };
    let janitor = Arc::new(
        ResourceJanitor::new().with_category("temp", settings.cleanup.effective_temp_dir()),
    );

    let store = Arc::new(StateStore::new(console.clone()));
    let driver = Arc::new(ProcessDriver::new(console.clone()));

    let mut orchestrator = ServiceOrchestrator::new(
        Arc::clone(&store),
        driver,
        console.clone(),
        OrchestratorConfig {
            driver: settings.driver.clone(),
            start_timeout: settings.service.start_timeout(),
            stop_timeout: settings.service.stop_timeout(),
        },
    )
    .with_janitor(Arc::clone(&janitor));
    if let Some(reaper) = &reaper {
        orchestrator = orchestrator.with_reaper(Arc::clone(reaper));
    }
    let orchestrator = Arc::new(orchestrator);

    // Surface lifecycle boundaries as NDJSON.
    {
        let store_in_cb = Arc::clone(&store);
        orchestrator.subscribe(move |event| {
            match event.kind {
                StateEventKind::BrowserStarted => {
                    let pid = store_in_cb.snapshot().1.and_then(|handle| handle.pid());
                    PanelEvent::service_started(pid).emit();
                }
                StateEventKind::BrowserStopped => PanelEvent::service_stopped().emit(),
                StateEventKind::BrowserFailed => PanelEvent::service_failed().emit(),
            }
            Ok(())
        });
    }

    let mut sequencer = ShutdownSequencer::new(Arc::clone(&orchestrator), console.clone())
        .with_janitor(Arc::clone(&janitor));
    if let Some(reaper) = &reaper {
        sequencer = sequencer.with_reaper(Arc::clone(reaper));
    }

    // Stdin reader thread: blocking reads, commands over a channel.
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PanelCommand>(16);
    std::thread::spawn(move || read_stdin_commands(cmd_tx));

    if settings.service.auto_start || force_start {
        info!("auto-starting service");
        if let Err(e) = orchestrator.start().await {
            PanelEvent::error(e.to_string(), e.is_fatal()).emit();
        }
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Ctrl-C handler failed: {}", e);
                }
                info!("interrupt received");
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    info!("stdin closed");
                    break;
                };
                if handle_command(cmd, &orchestrator, &buffer).await {
                    break;
                }
            }
        }
    }

    if let Some(report) = sequencer.run().await {
        if !report.is_clean() {
            warn!("shutdown finished with failed steps");
        }
    }

    info!("Browser Warden exiting");
    Ok(())
}

/// Apply one command. Returns `true` when the panel should exit.
async fn handle_command<D>(
    cmd: PanelCommand,
    orchestrator: &ServiceOrchestrator<D>,
    buffer: &BufferHandle,
) -> bool
where
    D: bwarden_driver::AutomationDriver + Send + Sync + 'static,
{
    match cmd {
        PanelCommand::Start => {
            if let Err(e) = orchestrator.start().await {
                PanelEvent::error(e.to_string(), e.is_fatal()).emit();
            }
        }
        PanelCommand::Stop => {
            if let Err(e) = orchestrator.stop().await {
                PanelEvent::error(e.to_string(), e.is_fatal()).emit();
            }
        }
        PanelCommand::Toggle => {
            if let Err(e) = orchestrator.toggle().await {
                PanelEvent::error(e.to_string(), e.is_fatal()).emit();
            }
        }
        PanelCommand::Status => {
            let recent: Vec<String> = buffer
                .lines()
                .into_iter()
                .rev()
                .take(5)
                .map(|(level, text)| format!("{} {}", level.prefix(), text))
                .rev()
                .collect();
            PanelEvent::status(orchestrator.current_state().name(), recent).emit();
        }
        PanelCommand::Quit => return true,
    }
    false
}

/// Blocking stdin loop; exits when stdin closes or quit is read.
fn read_stdin_commands(cmd_tx: mpsc::Sender<PanelCommand>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Some(cmd) = parse_command(trimmed) else {
                    warn!("Unknown command: {}", trimmed);
                    continue;
                };
                let quit = cmd == PanelCommand::Quit;
                if cmd_tx.blocking_send(cmd).is_err() || quit {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
    info!("stdin reader exiting");
}

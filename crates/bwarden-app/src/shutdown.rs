//! Ordered teardown at exit.
//!
//! The sequencer runs each step in a fixed order and keeps going when a step
//! fails: a stuck service must never prevent process reaping or temp
//! cleanup. `run()` is idempotent; only the first caller executes the steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bwarden_core::prelude::*;
use bwarden_core::ConsoleBridge;
use bwarden_driver::{AutomationDriver, ProcessReaper, ResourceJanitor};

use crate::orchestrator::ServiceOrchestrator;

const CONSOLE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a single teardown step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// Aggregate of the whole teardown run.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|step| step.ok)
    }

    fn record(&mut self, name: &'static str, result: Result<String>) {
        match result {
            Ok(detail) => self.steps.push(StepOutcome {
                name,
                ok: true,
                detail,
            }),
            Err(e) => {
                warn!("shutdown step {} failed: {}", name, e);
                self.steps.push(StepOutcome {
                    name,
                    ok: false,
                    detail: e.to_string(),
                });
            }
        }
    }
}

/// Runs the exit sequence exactly once:
///
/// 1. restore the console to its default sink and flush pending output,
/// 2. stop the service through the orchestrator,
/// 3. reap any orphaned driver processes,
/// 4. purge temp artifacts.
pub struct ShutdownSequencer<D> {
    orchestrator: Arc<ServiceOrchestrator<D>>,
    console: ConsoleBridge,
    reaper: Option<Arc<ProcessReaper>>,
    janitor: Option<Arc<ResourceJanitor>>,
    done: AtomicBool,
}

impl<D> ShutdownSequencer<D>
where
    D: AutomationDriver + Send + Sync + 'static,
{
    pub fn new(orchestrator: Arc<ServiceOrchestrator<D>>, console: ConsoleBridge) -> Self {
        Self {
            orchestrator,
            console,
            reaper: None,
            janitor: None,
            done: AtomicBool::new(false),
        }
    }

    pub fn with_reaper(mut self, reaper: Arc<ProcessReaper>) -> Self {
        self.reaper = Some(reaper);
        self
    }

    pub fn with_janitor(mut self, janitor: Arc<ResourceJanitor>) -> Self {
        self.janitor = Some(janitor);
        self
    }

    /// Execute the teardown sequence, or return `None` if it already ran.
    pub async fn run(&self) -> Option<ShutdownReport> {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed; skipping");
            return None;
        }

        info!("beginning shutdown sequence");
        let mut report = ShutdownReport::default();

        // Console first, so everything below is visible on the default sink
        // even after custom panel sinks are torn down.
        self.console.restore();
        let flushed = self.console.flush(CONSOLE_FLUSH_TIMEOUT).await;
        report.record(
            "restore_console",
            if flushed {
                Ok("console restored and flushed".to_string())
            } else {
                Err(Error::channel_send("console flush timed out"))
            },
        );

        let stop = self
            .orchestrator
            .stop()
            .await
            .map(|state| format!("service settled in {}", state));
        report.record("stop_service", stop);

        if let Some(reaper) = &self.reaper {
            let reap = reaper.reap_all().await;
            let detail = format!(
                "killed {} process(es), {} failure(s)",
                reap.killed,
                reap.failures.len()
            );
            report.record(
                "reap_processes",
                if reap.failures.is_empty() {
                    Ok(detail)
                } else {
                    Err(Error::reap(0, detail))
                },
            );
        }

        if let Some(janitor) = &self.janitor {
            let purge = janitor.purge("temp");
            let detail = format!(
                "deleted {} artifact(s), {} failure(s)",
                purge.deleted,
                purge.failures.len()
            );
            report.record(
                "purge_artifacts",
                if purge.is_clean() {
                    Ok(detail)
                } else {
                    Err(Error::cleanup("temp", detail))
                },
            );
        }

        for step in &report.steps {
            if step.ok {
                info!("shutdown: {} ok ({})", step.name, step.detail);
            } else {
                warn!("shutdown: {} failed ({})", step.name, step.detail);
            }
        }

        Some(report)
    }
}

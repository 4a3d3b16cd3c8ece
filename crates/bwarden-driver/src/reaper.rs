//! Orphaned driver-process reaping
//!
//! The one module that touches the OS process table. All platform branching
//! lives behind `sysinfo`; callers get counts back instead of errors, so
//! "nothing to kill" needs no special-casing.

use std::time::Duration;

use regex::Regex;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

use bwarden_core::prelude::*;

/// How long to wait after a terminate signal before escalating to kill.
const DEFAULT_TERM_WAIT: Duration = Duration::from_millis(1_500);

/// Outcome of one reap pass.
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Processes confirmed gone (terminated or force-killed)
    pub killed: usize,
    /// Processes that survived both signals, or could not be signalled
    pub failures: Vec<ReapFailure>,
}

impl ReapReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A process that could not be reaped.
#[derive(Debug)]
pub struct ReapFailure {
    pub pid: u32,
    pub reason: String,
}

/// Finds and terminates processes whose name or command line matches the
/// configured pattern. Never touches its own process.
pub struct ProcessReaper {
    pattern: Regex,
    term_wait: Duration,
}

impl ProcessReaper {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid reap pattern: {}", e)))?;
        Ok(Self {
            pattern,
            term_wait: DEFAULT_TERM_WAIT,
        })
    }

    pub fn with_term_wait(mut self, term_wait: Duration) -> Self {
        self.term_wait = term_wait;
        self
    }

    /// Terminate every live process matching the pattern.
    ///
    /// Sends a terminate signal to all matches, waits `term_wait`, then
    /// force-kills survivors. An empty match set is success (`killed == 0`).
    pub async fn reap_all(&self) -> ReapReport {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let own_pid = Pid::from_u32(std::process::id());
        let matches: Vec<Pid> = sys
            .processes()
            .iter()
            .filter(|(pid, process)| **pid != own_pid && self.matches(process))
            .map(|(pid, _)| *pid)
            .collect();

        if matches.is_empty() {
            debug!("reap pass found no matching processes");
            return ReapReport::default();
        }

        info!("Reaping {} matching process(es)", matches.len());

        let mut report = ReapReport::default();

        // First pass: polite terminate. Platforms without Term support fall
        // back to kill immediately.
        for pid in &matches {
            if let Some(process) = sys.process(*pid) {
                let sent = process
                    .kill_with(Signal::Term)
                    .unwrap_or_else(|| process.kill());
                if !sent {
                    warn!("Failed to signal process {}", pid);
                }
            }
        }

        tokio::time::sleep(self.term_wait).await;

        // Second pass: force-kill whatever is still alive.
        sys.refresh_processes(ProcessesToUpdate::Some(&matches), true);
        for pid in &matches {
            match sys.process(*pid) {
                None => report.killed += 1,
                Some(process) => {
                    warn!("Process {} survived terminate, escalating to kill", pid);
                    if process.kill() {
                        report.killed += 1;
                    } else {
                        report.failures.push(ReapFailure {
                            pid: pid.as_u32(),
                            reason: "kill signal could not be delivered".to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "Reap pass complete: {} killed, {} failed",
            report.killed,
            report.failures.len()
        );
        report
    }

    fn matches(&self, process: &sysinfo::Process) -> bool {
        if self.pattern.is_match(&process.name().to_string_lossy()) {
            return true;
        }
        process
            .cmd()
            .iter()
            .any(|arg| self.pattern.is_match(&arg.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        assert!(ProcessReaper::new("[unclosed").is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_reap_with_no_matches_is_clean() {
        let reaper = ProcessReaper::new("bwarden-no-such-process-zz9")
            .unwrap()
            .with_term_wait(Duration::from_millis(50));

        let report = reaper.reap_all().await;
        assert_eq!(report.killed, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    #[serial]
    async fn test_reap_kills_matching_process() {
        // Unique marker in the command line so the pattern cannot match
        // anything else on the host.
        let marker = format!("bwarden-reap-test-{}", std::process::id());
        let mut child = Command::new("sh")
            .args(["-c", &format!("sleep 60 # {}", marker)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("sh must be available in test environment");

        // Give the process table a moment to show the child
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reaper = ProcessReaper::new(&marker)
            .unwrap()
            .with_term_wait(Duration::from_millis(200));
        let report = reaper.reap_all().await;

        assert!(report.killed >= 1, "expected at least one kill: {:?}", report);
        assert!(report.is_clean());

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should be gone after reap")
            .unwrap();
        assert!(!status.success());
    }
}

//! Driver child-process management

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Notify};

use bwarden_core::prelude::*;
use bwarden_core::ConsoleBridge;

use crate::driver::DriverConfig;

/// Manages the driver-controlled browser child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background
/// task that calls `child.wait()`, so the real exit code is always captured.
/// `DriverProcess` retains a kill channel to request a force-kill, an atomic
/// flag for synchronous `has_exited()` checks, and a [`Notify`] handle so
/// `shutdown()` can await exit without holding a lock across `.await`.
pub struct DriverProcess {
    /// Process ID for logging and reap-fallback targeting
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
    /// Exit code captured by the wait task, `None` until exit (or if killed
    /// by signal).
    exit_code: Arc<Mutex<Option<i32>>>,
}

impl DriverProcess {
    /// Spawn the configured driver command, wiring stdout/stderr into the
    /// console bridge.
    pub fn spawn(config: &DriverConfig, console: ConsoleBridge) -> Result<Self> {
        info!(
            "Spawning driver: {} {}",
            config.command,
            config.args.join(" ")
        );

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Critical: cleanup on drop
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::DriverNotFound {
                        command: config.command.clone(),
                    }
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        let pid = child.id();
        info!("Driver process started with PID: {:?}", pid);

        // Mirror driver output into the console so the panel shows it live.
        let stdout = child.stdout.take().expect("stdout was configured");
        tokio::spawn(Self::stdout_reader(stdout, console.clone()));

        let stderr = child.stderr.take().expect("stderr was configured");
        tokio::spawn(Self::stderr_reader(stderr, console));

        // Shared exit-state primitives
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let exit_code = Arc::new(Mutex::new(None));

        // Kill channel: DriverProcess holds the sender, wait task the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
            Arc::clone(&exit_code),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
            exit_code,
        })
    }

    /// Background task: owns `child`, waits for it to exit, records the code.
    ///
    /// Two ways the task can end:
    /// 1. The driver process exits naturally -- `child.wait()` resolves.
    /// 2. `kill_rx` fires -- we kill the child first, then wait for it.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
        exit_code: Arc<Mutex<Option<i32>>>,
    ) {
        let code: Option<i32> = tokio::select! {
            // Natural exit path
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Driver process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for driver process: {}", e);
                        None
                    }
                }
            }
            // Force-kill path: kill_tx was sent (by shutdown or drop)
            _ = kill_rx => {
                info!("Kill signal received, force-killing driver process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill driver process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("Driver process killed, exit status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Record the code and mark exited before waking waiters, so
        // `has_exited()` and `exit_code()` are consistent for any observer
        // released by the notify.
        *exit_code.lock().expect("exit code lock poisoned") = code;
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();
    }

    /// Mirror stdout lines into the console at debug level.
    async fn stdout_reader(stdout: tokio::process::ChildStdout, console: ConsoleBridge) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("driver stdout: {}", line);
            console.debug(format!("[driver] {}", line));
        }

        // EOF just means the pipe closed; the wait task captures the exit.
        debug!("driver stdout reader finished");
    }

    /// Mirror stderr lines into the console at warning level.
    async fn stderr_reader(stderr: tokio::process::ChildStderr, console: ConsoleBridge) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("driver stderr: {}", line);
            console.warn(format!("[driver] {}", line));
        }

        debug!("driver stderr reader finished");
    }

    /// Shut the driver process down.
    ///
    /// Waits up to `grace` for a natural exit (the driver winds down once its
    /// session is released), then signals the wait task to force-kill.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        // Fast path: already dead
        if self.has_exited() {
            info!("Driver process already exited, skipping shutdown");
            return Ok(());
        }

        info!("Initiating driver process shutdown");

        // Race-free pattern: create the `notified()` future BEFORE the final
        // `has_exited()` check, so we cannot miss a notification that fires
        // between the check and the await.
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            info!("Driver process exited gracefully");
            return Ok(());
        }

        match tokio::time::timeout(grace, notified).await {
            Ok(()) => {
                info!("Driver process exited gracefully");
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill()
            }
        }
    }

    /// Force kill the process by signalling the wait task.
    ///
    /// The wait task calls `child.kill()` and then `child.wait()`, ensuring
    /// the OS reaps the process before waiters are woken.
    fn force_kill(&mut self) -> Result<()> {
        warn!("Force killing driver process via kill channel");
        if let Some(tx) = self.kill_tx.take() {
            // Ignore send error -- the wait task may have already exited.
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Non-blocking, synchronous exit check backed by the wait task's flag.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Logical complement of `has_exited()`.
    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Wait until the process has exited.
    pub async fn wait_exited(&self) {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return;
        }
        notified.await;
    }

    /// Exit code captured by the wait task, if the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().expect("exit code lock poisoned")
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("DriverProcess dropped while process may still be running");
            // Send kill signal so the wait task tears down the child cleanly.
            // If kill_tx was already consumed by shutdown(), this is a no-op.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        // kill_on_drop(true) on the Child is the final safety net if the
        // wait task hasn't had a chance to handle the kill yet.
        debug!("DriverProcess dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bwarden_core::console::BufferSink;

    fn sh_config(script: &str) -> DriverConfig {
        DriverConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_spawn_unknown_command() {
        let console = ConsoleBridge::new();
        let config = DriverConfig {
            command: "definitely-no-such-driver-binary".to_string(),
            ..Default::default()
        };

        let result = DriverProcess::spawn(&config, console);
        assert!(matches!(result, Err(Error::DriverNotFound { .. })));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_normal_exit() {
        let console = ConsoleBridge::new();
        let process = DriverProcess::spawn(&sh_config("exit 0"), console).unwrap();

        tokio::time::timeout(Duration::from_secs(5), process.wait_exited())
            .await
            .expect("process should exit");
        assert!(process.has_exited());
        assert_eq!(process.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_error_exit() {
        let console = ConsoleBridge::new();
        let process = DriverProcess::spawn(&sh_config("exit 42"), console).unwrap();

        tokio::time::timeout(Duration::from_secs(5), process.wait_exited())
            .await
            .expect("process should exit");
        assert_eq!(process.exit_code(), Some(42));
    }

    #[tokio::test]
    async fn test_stdout_reaches_console() {
        let (sink, handle) = BufferSink::new(64);
        let console = ConsoleBridge::with_sink(Box::new(sink));
        let process = DriverProcess::spawn(&sh_config("echo ready"), console.clone()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), process.wait_exited())
            .await
            .expect("process should exit");
        // Reader task may still be draining the pipe after exit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(console.flush(Duration::from_secs(1)).await);

        let lines = handle.lines();
        assert!(
            lines.iter().any(|(_, text)| text.contains("ready")),
            "driver stdout should be mirrored to the console: {:?}",
            lines
        );
    }

    #[tokio::test]
    async fn test_shutdown_kills_long_running_process() {
        let console = ConsoleBridge::new();
        let mut process = DriverProcess::spawn(&sh_config("sleep 60"), console).unwrap();

        assert!(process.is_running());
        process
            .shutdown(Duration::from_millis(200))
            .await
            .expect("shutdown should not error");

        tokio::time::timeout(Duration::from_secs(5), process.wait_exited())
            .await
            .expect("process should be killed");
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_shutdown_is_noop_after_exit() {
        let console = ConsoleBridge::new();
        let mut process = DriverProcess::spawn(&sh_config("exit 0"), console).unwrap();

        tokio::time::timeout(Duration::from_secs(5), process.wait_exited())
            .await
            .expect("process should exit");
        process
            .shutdown(Duration::from_millis(50))
            .await
            .expect("shutdown after exit should be a no-op");
    }
}

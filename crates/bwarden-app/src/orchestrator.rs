//! Service orchestration -- start/stop/toggle and worker supervision.
//!
//! Commands race against each other and against the worker only at the
//! state store: whoever wins the `Idle -> Starting` (or `-> Stopping`)
//! transition owns that phase of the lifecycle, everyone else observes and
//! short-circuits. The worker itself is one spawned task per run, cancelled
//! cooperatively through the handle's watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use bwarden_core::prelude::*;
use bwarden_core::{ConsoleBridge, ServiceState, StateEvent};

use bwarden_driver::{AutomationDriver, DriverConfig, ProcessReaper, ResourceJanitor};

use crate::handle::{ServiceHandle, StartOutcome};
use crate::state::{StateStore, SubscriberToken};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub driver: DriverConfig,
    /// Bound on waiting for a spawned worker to reach `Running`
    pub start_timeout: Duration,
    /// Bound on waiting for a cancelled worker to wind down
    pub stop_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Turns start/stop/toggle commands into a supervised worker lifecycle.
///
/// Holds the one [`StateStore`] by `Arc`; never mutates state except through
/// `transition`.
pub struct ServiceOrchestrator<D> {
    store: Arc<StateStore>,
    driver: Arc<D>,
    console: ConsoleBridge,
    config: OrchestratorConfig,
    /// Fallback for workers that ignore cancellation
    reaper: Option<Arc<ProcessReaper>>,
    /// Best-effort temp cleanup on failed runs
    janitor: Option<Arc<ResourceJanitor>>,
}

impl<D> ServiceOrchestrator<D>
where
    D: AutomationDriver + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<StateStore>,
        driver: Arc<D>,
        console: ConsoleBridge,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            driver,
            console,
            config,
            reaper: None,
            janitor: None,
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

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Non-blocking state snapshot.
    pub fn current_state(&self) -> ServiceState {
        self.store.current_state()
    }

    /// Register an observer for lifecycle events.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberToken
    where
        F: Fn(&StateEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.store.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriberToken) -> bool {
        self.store.unsubscribe(token)
    }

    /// Start the service.
    ///
    /// Idempotent: if a worker already exists, returns its handle after
    /// waiting (bounded) for it to be ready -- concurrent callers all
    /// observe `Running` with the identical handle, and no second worker is
    /// ever spawned. On acquire failure the state falls back to `Idle` and
    /// an error is returned; the user-visible message has already been
    /// emitted by the worker.
    pub async fn start(&self) -> Result<ServiceHandle> {
        let (handle, cancel_rx) = ServiceHandle::new();

        if self
            .store
            .transition(ServiceState::Starting, Some(handle.clone()))
            .is_err()
        {
            // Lost the claim: a worker already exists (or cleanup is still
            // settling). Return the live handle as a no-op.
            let (state, existing) = self.store.snapshot();
            if let Some(existing) = existing {
                debug!("start() while {}: deferring to existing worker", state);
                return match existing.wait_started(self.config.start_timeout).await {
                    StartOutcome::Ready => Ok(existing),
                    StartOutcome::Exited => Err(Error::worker_acquire(
                        "driver session could not be started",
                    )),
                    StartOutcome::TimedOut => Err(Error::worker_acquire(
                        "timed out acquiring driver session",
                    )),
                };
            }
            return Err(Error::worker_acquire(format!(
                "service is {}; cannot start now",
                state
            )));
        }

        self.console.info("Please wait...");

        tokio::spawn(run_worker(
            Arc::clone(&self.store),
            Arc::clone(&self.driver),
            self.console.clone(),
            self.config.driver.clone(),
            self.janitor.clone(),
            handle.clone(),
            cancel_rx,
        ));

        match handle.wait_started(self.config.start_timeout).await {
            StartOutcome::Ready => Ok(handle),
            StartOutcome::Exited => Err(Error::worker_acquire(
                "driver session could not be started",
            )),
            StartOutcome::TimedOut => {
                // Abandon the attempt: move to Stopping so the worker winds
                // down as soon as its acquire call returns.
                self.console
                    .error("Timed out waiting for the driver session to start.");
                let _ = self
                    .store
                    .transition(ServiceState::Stopping, Some(handle.clone()));
                handle.cancel();
                Err(Error::worker_acquire("timed out acquiring driver session"))
            }
        }
    }

    /// Stop the service.
    ///
    /// No-op on `Idle` (no event). Otherwise signals cancellation and waits
    /// (bounded) for the worker; on timeout, falls back to process reaping
    /// and forces the store to `Idle` with a warning. If even the forced
    /// teardown leaves the store unsettled, reports `WorkerStopTimeout`.
    pub async fn stop(&self) -> Result<ServiceState> {
        let (state, handle) = self.store.snapshot();

        match state {
            ServiceState::Idle => return Ok(ServiceState::Idle),
            ServiceState::Failed => {
                // The failing worker owns its own cleanup; settle a stale
                // record only if it is already gone.
                if handle.is_none() {
                    let _ = self.store.transition(ServiceState::Idle, None);
                }
                return Ok(self.store.current_state());
            }
            _ => {}
        }

        // Active states always carry a handle (enforced by the store).
        let Some(handle) = handle else {
            return Ok(state);
        };

        self.console.warn("Stopping services...");

        if state != ServiceState::Stopping {
            if let Err(e) = self
                .store
                .transition(ServiceState::Stopping, Some(handle.clone()))
            {
                debug!("stop() raced another transition: {}", e);
            }
        }
        handle.cancel();

        if handle.wait_exited(self.config.stop_timeout).await {
            return Ok(self.store.current_state());
        }

        // Escalation: the worker ignored cancellation within the bound.
        self.console.warn(format!(
            "Worker did not stop within {}ms; forcing teardown.",
            self.config.stop_timeout.as_millis()
        ));

        if let Some(reaper) = &self.reaper {
            let report = reaper.reap_all().await;
            self.console.warn(format!(
                "Reaped {} orphaned driver process(es).",
                report.killed
            ));
            for failure in &report.failures {
                self.console.error(format!(
                    "Could not kill process {}: {}",
                    failure.pid, failure.reason
                ));
            }
        }

        if self.store.current_state() == ServiceState::Stopping {
            let _ = self.store.transition(ServiceState::Idle, None);
        }
        match self.store.current_state() {
            ServiceState::Idle => Ok(ServiceState::Idle),
            _ => Err(Error::WorkerStopTimeout {
                timeout_ms: self.config.stop_timeout.as_millis() as u64,
            }),
        }
    }

    /// Dispatch to `stop()` if a worker exists, else `start()`.
    pub async fn toggle(&self) -> Result<ServiceState> {
        if self.store.current_state() == ServiceState::Idle {
            self.start().await?;
            Ok(self.store.current_state())
        } else {
            self.stop().await
        }
    }
}

/// The worker task: one per service run.
///
/// Acquires the driver session, reports readiness, then parks until either
/// cancellation or the session dying underneath it. Every exit path settles
/// the store (`Idle`) and marks the handle exited as its final action.
async fn run_worker<D>(
    store: Arc<StateStore>,
    driver: Arc<D>,
    console: ConsoleBridge,
    driver_config: DriverConfig,
    janitor: Option<Arc<ResourceJanitor>>,
    handle: ServiceHandle,
    mut cancel_rx: watch::Receiver<bool>,
) where
    D: AutomationDriver + Send + Sync + 'static,
{
    let session = match driver.acquire_session(&driver_config).await {
        Ok(session) => session,
        Err(e) => {
            console.error(format!("Driver failed to start: {}", e));
            if let Err(err) = store.transition(ServiceState::Failed, None) {
                warn!("failure transition rejected: {}", err);
            }
            run_failure_cleanup(janitor.as_deref(), &console);
            let _ = store.transition(ServiceState::Idle, None);
            handle.mark_exited();
            return;
        }
    };

    handle.set_pid(session.pid());

    if store
        .transition(ServiceState::Running, Some(handle.clone()))
        .is_err()
    {
        // stop() (or a start timeout) moved the store to Stopping while we
        // were acquiring; wind down immediately.
        info!("session acquired after stop was requested; releasing");
        if let Err(e) = driver.release_session(session).await {
            console.error(format!("Error releasing driver session: {}", e));
        }
        if store.current_state() == ServiceState::Stopping {
            let _ = store.transition(ServiceState::Idle, None);
        }
        handle.mark_exited();
        return;
    }

    handle.mark_ready();
    console.info("Services started; the session is live.");

    // Park until told to stop or until the driver dies underneath us.
    let died = tokio::select! {
        changed = cancel_rx.changed() => {
            // A closed channel means every handle clone is gone; treat it
            // as cancellation and wind down.
            let _ = changed;
            false
        }
        _ = session.wait_exited() => true,
    };

    if died {
        console.error(format!(
            "Driver session ended unexpectedly (exit code {:?}).",
            session.exit_code()
        ));
        if let Err(e) = store.transition(ServiceState::Failed, None) {
            warn!("failure transition rejected: {}", e);
        }
        run_failure_cleanup(janitor.as_deref(), &console);
        let _ = store.transition(ServiceState::Idle, None);
    } else {
        if let Err(e) = driver.release_session(session).await {
            console.error(format!("Error releasing driver session: {}", e));
        }
        match store.transition(ServiceState::Idle, None) {
            Ok(_) => console.info("Services stopped successfully."),
            Err(_) => debug!("state already settled during stop"),
        }
    }

    handle.mark_exited();
}

/// Best-effort temp purge after a failed run.
fn run_failure_cleanup(janitor: Option<&ResourceJanitor>, console: &ConsoleBridge) {
    let Some(janitor) = janitor else { return };
    let report = janitor.purge("temp");
    if report.attempted() > 0 {
        console.info(format!(
            "Cleaned {} temp artifact(s) after failure ({} could not be removed).",
            report.deleted,
            report.failures.len()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bwarden_core::console::BufferSink;
    use bwarden_core::{LogLevel, StateEventKind};
    use bwarden_driver::DriverSession;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory driver with scripted behavior.
    struct FakeDriver {
        fail_acquire: bool,
        acquire_delay: Duration,
        /// Simulates a worker that ignores cancellation: release never
        /// finishes within any test bound.
        block_release: bool,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl FakeDriver {
        fn ok() -> Self {
            Self {
                fail_acquire: false,
                acquire_delay: Duration::ZERO,
                block_release: false,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail_acquire: true,
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                acquire_delay: delay,
                ..Self::ok()
            }
        }

        fn unresponsive() -> Self {
            Self {
                block_release: true,
                ..Self::ok()
            }
        }
    }

    impl AutomationDriver for FakeDriver {
        async fn acquire_session(&self, _config: &DriverConfig) -> Result<DriverSession> {
            if !self.acquire_delay.is_zero() {
                tokio::time::sleep(self.acquire_delay).await;
            }
            if self.fail_acquire {
                return Err(Error::worker_acquire("scripted acquire failure"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(DriverSession::detached())
        }

        async fn release_session(&self, _session: DriverSession) -> Result<()> {
            if self.block_release {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rig {
        orchestrator: Arc<ServiceOrchestrator<FakeDriver>>,
        driver: Arc<FakeDriver>,
        events: Arc<Mutex<Vec<StateEventKind>>>,
        console: bwarden_core::console::BufferHandle,
    }

    fn rig(driver: FakeDriver) -> Rig {
        rig_with_config(driver, OrchestratorConfig::default())
    }

    fn rig_with_config(driver: FakeDriver, config: OrchestratorConfig) -> Rig {
        let (sink, console_handle) = BufferSink::new(256);
        let console = ConsoleBridge::with_sink(Box::new(sink));
        let store = Arc::new(StateStore::new(console.clone()));
        let driver = Arc::new(driver);
        let orchestrator = Arc::new(ServiceOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&driver),
            console,
            config,
        ));

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_in_cb = Arc::clone(&events);
        orchestrator.subscribe(move |event| {
            events_in_cb.lock().unwrap().push(event.kind);
            Ok(())
        });

        Rig {
            orchestrator,
            driver,
            events,
            console: console_handle,
        }
    }

    #[tokio::test]
    async fn test_start_then_stop_full_cycle() {
        let rig = rig(FakeDriver::ok());

        let handle = rig.orchestrator.start().await.unwrap();
        assert_eq!(rig.orchestrator.current_state(), ServiceState::Running);
        assert!(handle.is_ready());
        assert!(rig.orchestrator.store().snapshot().1.is_some());

        let state = rig.orchestrator.stop().await.unwrap();
        assert_eq!(state, ServiceState::Idle);
        assert!(rig.orchestrator.store().snapshot().1.is_none());

        assert_eq!(rig.driver.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(rig.driver.released.load(Ordering::SeqCst), 1);
        assert_eq!(
            *rig.events.lock().unwrap(),
            vec![StateEventKind::BrowserStarted, StateEventKind::BrowserStopped]
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let rig = rig(FakeDriver::ok());

        let first = rig.orchestrator.start().await.unwrap();
        let second = rig.orchestrator.start().await.unwrap();

        assert_eq!(first, second, "both callers must hold the same handle");
        assert_eq!(rig.driver.acquired.load(Ordering::SeqCst), 1);
        // One Started event, not two.
        assert_eq!(
            *rig.events.lock().unwrap(),
            vec![StateEventKind::BrowserStarted]
        );
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_exactly_one_worker() {
        let rig = rig(FakeDriver::slow(Duration::from_millis(100)));

        let a = {
            let orchestrator = Arc::clone(&rig.orchestrator);
            tokio::spawn(async move { orchestrator.start().await })
        };
        let b = {
            let orchestrator = Arc::clone(&rig.orchestrator);
            tokio::spawn(async move { orchestrator.start().await })
        };

        let handle_a = a.await.unwrap().unwrap();
        let handle_b = b.await.unwrap().unwrap();

        assert_eq!(handle_a, handle_b);
        assert_eq!(rig.orchestrator.current_state(), ServiceState::Running);
        assert_eq!(rig.driver.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(
            *rig.events.lock().unwrap(),
            vec![StateEventKind::BrowserStarted]
        );
    }

    #[tokio::test]
    async fn test_concurrent_start_losers_see_the_acquire_failure() {
        let driver = FakeDriver {
            fail_acquire: true,
            ..FakeDriver::slow(Duration::from_millis(150))
        };
        let rig = rig(driver);

        let a = {
            let orchestrator = Arc::clone(&rig.orchestrator);
            tokio::spawn(async move { orchestrator.start().await })
        };
        let b = {
            let orchestrator = Arc::clone(&rig.orchestrator);
            tokio::spawn(async move { orchestrator.start().await })
        };

        // Both the claimant and the deferring caller must report the
        // failure; neither may hand out a handle with no worker behind it.
        let result_a = a.await.unwrap();
        let result_b = b.await.unwrap();
        assert!(matches!(result_a, Err(Error::WorkerAcquireFailed { .. })));
        assert!(matches!(result_b, Err(Error::WorkerAcquireFailed { .. })));

        let (state, handle) = rig.orchestrator.store().snapshot();
        assert_eq!(state, ServiceState::Idle);
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_failed_acquire_falls_back_to_idle() {
        let rig = rig(FakeDriver::failing());

        let result = rig.orchestrator.start().await;
        assert!(matches!(result, Err(Error::WorkerAcquireFailed { .. })));

        let (state, handle) = rig.orchestrator.store().snapshot();
        assert_eq!(state, ServiceState::Idle);
        assert!(handle.is_none());

        // Failed was announced, Started never happened.
        assert_eq!(
            *rig.events.lock().unwrap(),
            vec![StateEventKind::BrowserFailed]
        );

        // Exactly one user-visible error line about the failure.
        assert!(
            rig.orchestrator
                .console
                .flush(Duration::from_secs(1))
                .await
        );
        let errors: Vec<_> = rig
            .console
            .lines()
            .into_iter()
            .filter(|(level, text)| {
                *level == LogLevel::Error && text.contains("Driver failed to start")
            })
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_on_idle_is_a_noop() {
        let rig = rig(FakeDriver::ok());

        let state = rig.orchestrator.stop().await.unwrap();
        assert_eq!(state, ServiceState::Idle);
        assert!(rig.events.lock().unwrap().is_empty());
        assert_eq!(rig.driver.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_toggle_dispatches_on_current_state() {
        let rig = rig(FakeDriver::ok());

        let state = rig.orchestrator.toggle().await.unwrap();
        assert_eq!(state, ServiceState::Running);

        let state = rig.orchestrator.toggle().await.unwrap();
        assert_eq!(state, ServiceState::Idle);

        assert_eq!(
            *rig.events.lock().unwrap(),
            vec![StateEventKind::BrowserStarted, StateEventKind::BrowserStopped]
        );
    }

    #[tokio::test]
    async fn test_unresponsive_worker_is_forced_to_idle() {
        let config = OrchestratorConfig {
            stop_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let rig = rig_with_config(FakeDriver::unresponsive(), config);

        rig.orchestrator.start().await.unwrap();
        let state = rig.orchestrator.stop().await.unwrap();

        // Still reaches Idle, with a warning, despite the stuck release.
        assert_eq!(state, ServiceState::Idle);
        assert!(rig.orchestrator.console.flush(Duration::from_secs(1)).await);
        assert!(rig
            .console
            .lines()
            .iter()
            .any(|(level, text)| *level == LogLevel::Warning
                && text.contains("forcing teardown")));
        assert!(rig
            .events
            .lock()
            .unwrap()
            .ends_with(&[StateEventKind::BrowserStopped]));
    }

    #[tokio::test]
    #[serial]
    async fn test_stop_escalation_reaps_orphaned_driver_processes() {
        // Unique marker in the command line so the pattern cannot match
        // anything else on the host.
        let marker = format!("bwarden-escalate-test-{}", std::process::id());
        let mut orphan = tokio::process::Command::new("sh")
            .args(["-c", &format!("sleep 60 # {}", marker)])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .expect("sh must be available in test environment");

        // Give the process table a moment to show the orphan
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (sink, console_handle) = BufferSink::new(256);
        let console = ConsoleBridge::with_sink(Box::new(sink));
        let store = Arc::new(StateStore::new(console.clone()));
        let reaper = ProcessReaper::new(&marker)
            .unwrap()
            .with_term_wait(Duration::from_millis(200));
        let orchestrator = ServiceOrchestrator::new(
            store,
            Arc::new(FakeDriver::unresponsive()),
            console.clone(),
            OrchestratorConfig {
                stop_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .with_reaper(Arc::new(reaper));

        orchestrator.start().await.unwrap();
        let state = orchestrator.stop().await.unwrap();
        assert_eq!(state, ServiceState::Idle);

        // The stuck teardown fell back to reaping: the orphan is gone and
        // the kill was reported through the console.
        let status = tokio::time::timeout(Duration::from_secs(5), orphan.wait())
            .await
            .expect("orphan should be gone after the forced teardown")
            .unwrap();
        assert!(!status.success());

        assert!(console.flush(Duration::from_secs(1)).await);
        assert!(console_handle
            .lines()
            .iter()
            .any(|(level, text)| *level == LogLevel::Warning
                && text.contains("Reaped 1 orphaned")));
    }

    #[tokio::test]
    async fn test_handle_presence_tracks_state_through_sequences() {
        let rig = rig(FakeDriver::ok());

        for _ in 0..3 {
            assert!(rig.orchestrator.store().snapshot().1.is_none());
            rig.orchestrator.start().await.unwrap();
            let (state, handle) = rig.orchestrator.store().snapshot();
            assert!(state.is_active());
            assert!(handle.is_some());
            rig.orchestrator.stop().await.unwrap();
            let (state, handle) = rig.orchestrator.store().snapshot();
            assert_eq!(state, ServiceState::Idle);
            assert!(handle.is_none());
        }

        assert_eq!(rig.driver.acquired.load(Ordering::SeqCst), 3);
        assert_eq!(rig.driver.released.load(Ordering::SeqCst), 3);
    }
}

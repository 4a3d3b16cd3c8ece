//! Service handle -- worker identity and control signals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};

/// Counter for generating unique handle IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What a bounded wait for startup observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The worker reached `Running`
    Ready,
    /// The worker exited before becoming ready (acquire failed)
    Exited,
    /// Neither happened within the bound
    TimedOut,
}

/// Opaque reference to the active worker.
///
/// Exists only while the service is `Starting`, `Running`, or `Stopping`.
/// Cheap to clone; all clones refer to the same worker, and identity is the
/// numeric id (two concurrent `start()` callers receive equal handles).
///
/// The cancellation sender is wrapped in `Arc` so the handle stays `Clone`
/// (the same pattern the session handles use for their shutdown senders).
#[derive(Clone)]
pub struct ServiceHandle {
    id: u64,
    cancel_tx: Arc<watch::Sender<bool>>,
    ready: Arc<AtomicBool>,
    ready_notify: Arc<Notify>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
    pid: Arc<Mutex<Option<u32>>>,
}

impl ServiceHandle {
    /// Create a fresh handle plus the cancellation receiver the worker polls.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = Self {
            id: HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed),
            cancel_tx: Arc::new(cancel_tx),
            ready: Arc::new(AtomicBool::new(false)),
            ready_notify: Arc::new(Notify::new()),
            exited: Arc::new(AtomicBool::new(false)),
            exit_notify: Arc::new(Notify::new()),
            pid: Arc::new(Mutex::new(None)),
        };
        (handle, cancel_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Signal cooperative cancellation to the worker.
    pub fn cancel(&self) {
        // Receiver gone means the worker already finished; nothing to signal.
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Record the driver-process PID once the session is acquired.
    pub fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock().expect("pid lock poisoned") = pid;
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().expect("pid lock poisoned")
    }

    /// Called by the worker when the session is live and `Running` was
    /// published.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        self.ready_notify.notify_waiters();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Called by the worker as its very last action, whatever the outcome.
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
        self.exit_notify.notify_waiters();
        // Wake startup waiters too, so a failed start is observed promptly.
        self.ready_notify.notify_waiters();
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Bounded wait for the worker to become ready (or give up).
    ///
    /// The `notified()` futures are created before the flag checks so a
    /// notification firing in between cannot be missed.
    pub async fn wait_started(&self, timeout: Duration) -> StartOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.ready_notify.notified();
            if self.is_ready() {
                return StartOutcome::Ready;
            }
            if self.has_exited() {
                return StartOutcome::Exited;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return StartOutcome::TimedOut;
            }
        }
    }

    /// Bounded wait for the worker to finish. Returns `false` on timeout.
    pub async fn wait_exited(&self, timeout: Duration) -> bool {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }
}

impl PartialEq for ServiceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceHandle {}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .field("cancelled", &self.is_cancelled())
            .field("exited", &self.has_exited())
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_identity_and_signals() {
        let (handle, _cancel_rx) = ServiceHandle::new();
        let clone = handle.clone();

        assert_eq!(handle, clone);
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_distinct_handles_are_unequal() {
        let (a, _rx_a) = ServiceHandle::new();
        let (b, _rx_b) = ServiceHandle::new();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_cancel_wakes_worker_receiver() {
        let (handle, mut cancel_rx) = ServiceHandle::new();

        let waiter = tokio::spawn(async move {
            cancel_rx.changed().await.unwrap();
            *cancel_rx.borrow()
        });

        handle.cancel();
        let cancelled = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(cancelled);
    }

    #[tokio::test]
    async fn test_wait_started_observes_ready() {
        let (handle, _rx) = ServiceHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.wait_started(Duration::from_secs(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.mark_ready();

        assert_eq!(task.await.unwrap(), StartOutcome::Ready);
    }

    #[tokio::test]
    async fn test_wait_started_observes_failed_start() {
        let (handle, _rx) = ServiceHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.wait_started(Duration::from_secs(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.mark_exited();

        assert_eq!(task.await.unwrap(), StartOutcome::Exited);
    }

    #[tokio::test]
    async fn test_wait_started_times_out() {
        let (handle, _rx) = ServiceHandle::new();
        let outcome = handle.wait_started(Duration::from_millis(50)).await;
        assert_eq!(outcome, StartOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_exited_after_the_fact() {
        let (handle, _rx) = ServiceHandle::new();
        handle.mark_exited();
        assert!(handle.wait_exited(Duration::from_millis(10)).await);
    }
}

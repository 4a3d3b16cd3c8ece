//! Shared service state and lifecycle-event broadcast.
//!
//! One `StateStore` instance exists per application, created during startup
//! and passed by `Arc` to everything that needs it. All state mutation goes
//! through [`StateStore::transition`]; there is no other writer entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bwarden_core::prelude::*;
use bwarden_core::{ConsoleBridge, ServiceState, StateEvent, StateEventKind};

use crate::handle::ServiceHandle;

/// Callback invoked synchronously on published lifecycle boundaries.
///
/// A returned error is reported through the console bridge and never aborts
/// the remaining notifications or the transition itself.
pub type Subscriber = Arc<dyn Fn(&StateEvent) -> Result<()> + Send + Sync>;

/// Opaque registration token for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberToken(u64);

struct Record {
    state: ServiceState,
    handle: Option<ServiceHandle>,
}

/// The single owned record of "is the service running, what is its handle,
/// who is subscribed".
pub struct StateStore {
    record: Mutex<Record>,
    subscribers: Mutex<Vec<(SubscriberToken, Subscriber)>>,
    /// Serializes transition + publish pairs so notifications for distinct
    /// transitions can never interleave. The record lock itself is released
    /// before callbacks run, so a callback may read state or edit the
    /// subscriber list without deadlocking.
    publish_lock: Mutex<()>,
    next_token: AtomicU64,
    console: ConsoleBridge,
}

impl StateStore {
    pub fn new(console: ConsoleBridge) -> Self {
        Self {
            record: Mutex::new(Record {
                state: ServiceState::Idle,
                handle: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            publish_lock: Mutex::new(()),
            next_token: AtomicU64::new(0),
            console,
        }
    }

    /// Consistent snapshot of state and handle, taken under one critical
    /// section.
    pub fn snapshot(&self) -> (ServiceState, Option<ServiceHandle>) {
        let record = self.record.lock().expect("state record poisoned");
        (record.state, record.handle.clone())
    }

    /// Non-blocking state read.
    pub fn current_state(&self) -> ServiceState {
        self.record.lock().expect("state record poisoned").state
    }

    /// Atomically swap state and handle.
    ///
    /// Rejects transitions outside the allowed table, and transitions whose
    /// handle does not match the target state (a handle must accompany
    /// exactly the active states). On success, returns the previous state
    /// and -- if the transition crosses a published boundary -- synchronously
    /// notifies every subscriber registered at call time, in registration
    /// order, before returning.
    pub fn transition(
        &self,
        new_state: ServiceState,
        new_handle: Option<ServiceHandle>,
    ) -> Result<ServiceState> {
        let _publish_guard = self.publish_lock.lock().expect("publish lock poisoned");

        let (previous, event) = {
            let mut record = self.record.lock().expect("state record poisoned");

            // A handle must accompany exactly the active states. `Failed`
            // may carry one until cleanup completes, never after.
            let handle_ok = match new_state {
                s if s.is_active() => new_handle.is_some(),
                ServiceState::Failed => true,
                _ => new_handle.is_none(),
            };
            if !record.state.can_transition_to(new_state) || !handle_ok {
                return Err(Error::invalid_transition(record.state, new_state));
            }

            let previous = record.state;
            record.state = new_state;
            record.handle = new_handle;
            (previous, published_event(previous, new_state))
        };

        debug!("service state: {} -> {}", previous, new_state);

        if let Some(event) = event {
            self.publish(&event);
        }

        Ok(previous)
    }

    /// Register a callback. O(1); takes effect for the next publish.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberToken
    where
        F: Fn(&StateEvent) -> Result<()> + Send + Sync + 'static,
    {
        let token = SubscriberToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push((token, Arc::new(callback)));
        token
    }

    /// Remove a callback. Removal during an in-flight publish takes effect
    /// only for subsequent publishes. Returns whether the token was known.
    pub fn unsubscribe(&self, token: SubscriberToken) -> bool {
        let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        let before = subscribers.len();
        subscribers.retain(|(t, _)| *t != token);
        subscribers.len() != before
    }

    /// Notify a stable snapshot of the subscriber list, in registration
    /// order. Caller holds the publish lock.
    fn publish(&self, event: &StateEvent) {
        let snapshot: Vec<(SubscriberToken, Subscriber)> = self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .clone();

        for (token, subscriber) in snapshot {
            if let Err(e) = subscriber(event) {
                warn!("subscriber {:?} failed on {}: {}", token, event.kind.name(), e);
                self.console
                    .error(format!("Observer error on {}: {}", event.kind.name(), e));
            }
        }
    }
}

/// Which event, if any, a `from -> to` transition publishes.
///
/// Entering `Running` announces a start; entering `Failed` announces the
/// failure; winding down from `Stopping` announces the stop. `Failed ->
/// Idle` is silent -- the failure was already announced and no session ever
/// stopped.
fn published_event(from: ServiceState, to: ServiceState) -> Option<StateEvent> {
    match (from, to) {
        (_, ServiceState::Running) => Some(StateEvent::now(StateEventKind::BrowserStarted)),
        (_, ServiceState::Failed) => Some(StateEvent::now(StateEventKind::BrowserFailed)),
        (ServiceState::Stopping, ServiceState::Idle) => {
            Some(StateEvent::now(StateEventKind::BrowserStopped))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn active_handle() -> ServiceHandle {
        ServiceHandle::new().0
    }

    fn store() -> Arc<StateStore> {
        Arc::new(StateStore::new(ConsoleBridge::new()))
    }

    fn walk_to_running(store: &StateStore) -> ServiceHandle {
        let handle = active_handle();
        store
            .transition(ServiceState::Starting, Some(handle.clone()))
            .unwrap();
        store
            .transition(ServiceState::Running, Some(handle.clone()))
            .unwrap();
        handle
    }

    #[tokio::test]
    async fn test_snapshot_is_consistent() {
        let store = store();
        assert_eq!(store.snapshot().0, ServiceState::Idle);
        assert!(store.snapshot().1.is_none());

        let handle = walk_to_running(&store);
        let (state, snap_handle) = store.snapshot();
        assert_eq!(state, ServiceState::Running);
        assert_eq!(snap_handle.unwrap(), handle);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected_and_state_unchanged() {
        let store = store();
        let err = store
            .transition(ServiceState::Running, Some(active_handle()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(store.current_state(), ServiceState::Idle);
    }

    #[tokio::test]
    async fn test_handle_must_match_state() {
        let store = store();
        // Starting without a handle is a contract violation.
        let err = store.transition(ServiceState::Starting, None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        // Idle with a handle is as well.
        let handle = walk_to_running(&store);
        store
            .transition(ServiceState::Stopping, Some(handle.clone()))
            .unwrap();
        let err = store
            .transition(ServiceState::Idle, Some(handle))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_started_event_published_once_in_registration_order() {
        let store = store();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            store.subscribe(move |event| {
                assert_eq!(event.kind, StateEventKind::BrowserStarted);
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        walk_to_running(&store);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let store = store();
        let handle = walk_to_running(&store);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        store.subscribe(move |_| {
            seen_in_cb.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Nothing so far: the Started event predates the registration.
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        store
            .transition(ServiceState::Stopping, Some(handle))
            .unwrap();
        store.transition(ServiceState::Idle, None).unwrap();

        // Exactly the Stopped event.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_abort_publish() {
        let store = store();
        let reached = Arc::new(AtomicUsize::new(0));

        store.subscribe(|_| Err(Error::subscriber("deliberate failure")));
        let reached_in_cb = Arc::clone(&reached);
        store.subscribe(move |_| {
            reached_in_cb.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        walk_to_running(&store);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_publish_affects_next_publish_only() {
        let store = store();
        let counted = Arc::new(AtomicUsize::new(0));
        let token_cell: Arc<Mutex<Option<SubscriberToken>>> = Arc::new(Mutex::new(None));

        let store_in_cb = Arc::clone(&store);
        let token_in_cb = Arc::clone(&token_cell);
        let counted_in_cb = Arc::clone(&counted);
        let token = store.subscribe(move |_| {
            counted_in_cb.fetch_add(1, Ordering::SeqCst);
            // Self-removal mid-notification must not destabilize the list.
            if let Some(token) = *token_in_cb.lock().unwrap() {
                store_in_cb.unsubscribe(token);
            }
            Ok(())
        });
        *token_cell.lock().unwrap() = Some(token);

        let handle = walk_to_running(&store); // Started: seen once, then self-removed
        store
            .transition(ServiceState::Stopping, Some(handle))
            .unwrap();
        store.transition(ServiceState::Idle, None).unwrap(); // Stopped: not seen

        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_to_idle_is_silent() {
        let store = store();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_in_cb = Arc::clone(&events);
        store.subscribe(move |event| {
            events_in_cb.lock().unwrap().push(event.kind);
            Ok(())
        });

        let handle = active_handle();
        store
            .transition(ServiceState::Starting, Some(handle.clone()))
            .unwrap();
        store
            .transition(ServiceState::Failed, Some(handle))
            .unwrap();
        store.transition(ServiceState::Idle, None).unwrap();

        assert_eq!(*events.lock().unwrap(), vec![StateEventKind::BrowserFailed]);
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_exactly_one() {
        let store = store();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let handle = active_handle();
                store
                    .transition(ServiceState::Starting, Some(handle))
                    .is_ok()
            }));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.current_state(), ServiceState::Starting);
    }
}

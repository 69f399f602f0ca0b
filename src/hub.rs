//! In-process publish/subscribe hub.
//!
//! The hub holds the latest published state and a registry of subscriber
//! callbacks. It exposes two ways to listen:
//!
//! - [`PublishSubscribeHub::subscribe`] registers under a caller-chosen id
//!   and replays the current state to the callback immediately.
//! - [`PublishSubscribeHub::on_change`] registers anonymously and only
//!   hears about later changes; pair it with
//!   [`PublishSubscribeHub::current`] to read the state at join time.
//!
//! Notification is synchronous and happens on the publishing thread. A
//! callback that panics is caught, logged and reported as a
//! [`SubscriberError`]; delivery to the remaining subscribers continues.
//! Such panics are not recorded as entries by the panic hook. Notification
//! order is unspecified.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use territory_telemetry::hub::PublishSubscribeHub;
//!
//! let hub = PublishSubscribeHub::new(0_u32);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let subscription = hub.subscribe("panel", move |value: &u32| {
//!     sink.lock().unwrap().push(*value);
//! });
//!
//! hub.publish(7);
//! subscription.unsubscribe();
//! hub.publish(8);
//!
//! assert_eq!(*seen.lock().unwrap(), vec![0, 7]);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::error::{catch_contained, panic_message, SubscriberError};

/// Subscriber callback.
pub type Callback<S> = Arc<dyn Fn(&S) + Send + Sync>;

thread_local! {
    /// Hubs currently delivering on this thread, by address.
    static NOTIFYING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct Registration<S> {
    token: u64,
    callback: Callback<S>,
}

struct Stored<S> {
    revision: u64,
    value: S,
}

struct HubInner<S> {
    state: RwLock<Stored<S>>,
    subscribers: Mutex<HashMap<String, Registration<S>>>,
    next_token: AtomicU64,
}

impl<S> HubInner<S> {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Registration<S>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Subscriber registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn remove(&self, id: &str, token: u64) -> bool {
        let mut subscribers = self.subscribers();
        if subscribers.get(id).is_some_and(|r| r.token == token) {
            subscribers.remove(id);
            true
        } else {
            false
        }
    }
}

/// Observer registry over a state value of type `S`.
pub struct PublishSubscribeHub<S> {
    inner: Arc<HubInner<S>>,
}

impl<S> Clone for PublishSubscribeHub<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for PublishSubscribeHub<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishSubscribeHub")
            .field("subscribers", &self.inner.subscribers().len())
            .finish_non_exhaustive()
    }
}

impl<S: Clone + Send + Sync + 'static> PublishSubscribeHub<S> {
    /// Create a hub holding `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: RwLock::new(Stored {
                    revision: 0,
                    value: initial,
                }),
                subscribers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Latest published state.
    #[must_use]
    pub fn current(&self) -> S {
        match self.inner.state.read() {
            Ok(state) => state.value.clone(),
            Err(poisoned) => poisoned.into_inner().value.clone(),
        }
    }

    /// Register `callback` under `id` and replay the current state to it.
    ///
    /// Registering an id that is already present replaces its callback, so
    /// an id is never registered twice.
    pub fn subscribe<F>(&self, id: impl Into<String>, callback: F) -> Subscription<S>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = id.into();
        let callback: Callback<S> = Arc::new(callback);
        let subscription = self.register(Some(id.clone()), Arc::clone(&callback));

        let state = self.current();
        if let Err(err) = self.notifying(|| deliver(&id, &callback, &state)) {
            tracing::error!(subscriber = %id, error = %err, "Subscriber failed during replay");
        }
        subscription
    }

    /// Register `handler` for future changes only.
    pub fn on_change<F>(&self, handler: F) -> Subscription<S>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Replace the state and notify every subscriber.
    ///
    /// Returns the failures observed during this delivery. A publish issued
    /// from inside one of this hub's callbacks updates the state but does
    /// not notify again; the next top-level publish delivers it.
    pub fn publish(&self, state: S) -> Vec<SubscriberError> {
        self.write_state().value = state;
        self.notify()
    }

    /// Replace the state only if `revision` is newer than the stored one,
    /// then notify.
    ///
    /// A stale revision is discarded without notifying, so a slow publisher
    /// cannot roll [`current`](Self::current) back to an older state.
    pub fn publish_revision(&self, revision: u64, state: S) -> Vec<SubscriberError> {
        {
            let mut stored = self.write_state();
            if revision <= stored.revision {
                tracing::trace!(revision, latest = stored.revision, "Discarding stale state");
                return Vec::new();
            }
            *stored = Stored {
                revision,
                value: state,
            };
        }
        self.notify()
    }

    /// Deliver the current state to every subscriber again.
    ///
    /// Skipped when this hub is already delivering on the current thread.
    /// Other hubs are unaffected.
    pub fn notify(&self) -> Vec<SubscriberError> {
        if self.is_notifying() {
            tracing::debug!("Skipping re-entrant notification");
            return Vec::new();
        }

        let state = self.current();
        let targets: Vec<(String, Callback<S>)> = self
            .inner
            .subscribers()
            .iter()
            .map(|(id, r)| (id.clone(), Arc::clone(&r.callback)))
            .collect();

        let failures: Vec<SubscriberError> = self.notifying(|| {
            targets
                .iter()
                .filter_map(|(id, callback)| deliver(id, callback, &state).err())
                .collect()
        });

        for failure in &failures {
            tracing::error!(error = %failure, "Subscriber failed during notification");
        }
        failures
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Drop every registration.
    pub fn clear_subscribers(&self) {
        self.inner.subscribers().clear();
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Stored<S>> {
        match self.inner.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }

    fn is_notifying(&self) -> bool {
        let key = self.key();
        NOTIFYING.with(|active| active.borrow().contains(&key))
    }

    /// Run `f` with this hub marked as delivering on the current thread.
    fn notifying<T>(&self, f: impl FnOnce() -> T) -> T {
        let key = self.key();
        NOTIFYING.with(|active| active.borrow_mut().push(key));
        let out = f();
        NOTIFYING.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|k| *k == key) {
                active.remove(pos);
            }
        });
        out
    }

    fn register(&self, id: Option<String>, callback: Callback<S>) -> Subscription<S> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let id = id.unwrap_or_else(|| format!("anonymous-{token}"));
        let replaced = self
            .inner
            .subscribers()
            .insert(id.clone(), Registration { token, callback })
            .is_some();
        if replaced {
            tracing::debug!(subscriber = %id, "Subscriber re-registered");
        }
        Subscription {
            id,
            token,
            hub: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }
}

fn deliver<S>(id: &str, callback: &Callback<S>, state: &S) -> Result<(), SubscriberError> {
    catch_contained(|| callback(state)).map_err(|payload| {
        SubscriberError::Panicked {
            id: id.to_string(),
            message: panic_message(payload.as_ref()),
        }
    })
}

/// Handle returned by registration.
///
/// Dropping the handle leaves the registration in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription<S> {
    id: String,
    token: u64,
    hub: Weak<HubInner<S>>,
    active: AtomicBool,
}

impl<S> Subscription<S> {
    /// Registration id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the registration. Calling this more than once is a no-op, and
    /// it never removes a later registration that reused the same id.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            if hub.remove(&self.id, self.token) {
                tracing::debug!(subscriber = %self.id, "Subscriber removed");
            }
        }
    }

    /// Whether `unsubscribe` has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

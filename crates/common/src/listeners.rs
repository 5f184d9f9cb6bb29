//! Listener bookkeeping shared by the tracker and the emitter
//!
//! Listeners live in an ordered arena keyed by a monotonically increasing
//! [`ListenerId`], so removal is by handle and two identical-looking closures
//! are still two listeners. Fan-out works on a snapshot of the arena taken
//! under the lock; the lock is released before any callback runs, which lets
//! callbacks subscribe, unsubscribe or trigger further notifications.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A registered callback plus its liveness flag
///
/// The flag is cleared on unsubscribe so a snapshot taken before the
/// unsubscribe never calls the listener afterwards.
pub struct ListenerEntry<F: ?Sized> {
    active: AtomicBool,
    callback: Box<F>,
}

impl<F: ?Sized> ListenerEntry<F> {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn callback(&self) -> &F {
        &self.callback
    }
}

/// Ordered set of listeners, registration order preserved
pub struct ListenerRegistry<F: ?Sized> {
    next_id: u64,
    entries: BTreeMap<ListenerId, Arc<ListenerEntry<F>>>,
}

impl<F: ?Sized> Default for ListenerRegistry<F> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl<F: ?Sized> ListenerRegistry<F> {
    pub fn insert(&mut self, callback: Box<F>) -> (ListenerId, Arc<ListenerEntry<F>>) {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let entry = Arc::new(ListenerEntry {
            active: AtomicBool::new(true),
            callback,
        });
        self.entries.insert(id, entry.clone());
        (id, entry)
    }

    /// Remove a listener by handle. Returns false if it was already gone.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                entry.deactivate();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<ListenerEntry<F>>> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returned by every `subscribe` call
///
/// [`Subscription::unsubscribe`] is idempotent. Dropping the subscription
/// does not unsubscribe; the registration lives until it is removed
/// explicitly or its owner goes away.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Run one listener callback, containing any panic it raises
///
/// A failing listener is logged and skipped; the remaining listeners and the
/// code that triggered the notification carry on.
pub(crate) fn invoke_isolated(source: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            source,
            error = %panic_message(payload.as_ref()),
            "listener panicked during notification"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Callback = dyn Fn() + Send + Sync;

    #[test]
    fn test_registry_keeps_registration_order() {
        let mut registry: ListenerRegistry<dyn Fn() -> u32 + Send + Sync> =
            ListenerRegistry::default();
        registry.insert(Box::new(|| 1));
        registry.insert(Box::new(|| 2));
        registry.insert(Box::new(|| 3));

        let order: Vec<u32> = registry.snapshot().iter().map(|e| (e.callback())()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_identical_closures_are_distinct_listeners() {
        let mut registry: ListenerRegistry<Callback> = ListenerRegistry::default();
        let (first, _) = registry.insert(Box::new(|| {}));
        let (second, _) = registry.insert(Box::new(|| {}));
        assert_ne!(first, second);

        assert!(registry.remove(first));
        assert_eq!(registry.len(), 1);
        assert!(!registry.remove(first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_deactivates_snapshotted_entry() {
        let mut registry: ListenerRegistry<Callback> = ListenerRegistry::default();
        let (id, entry) = registry.insert(Box::new(|| {}));
        let snapshot = registry.snapshot();

        registry.remove(id);
        assert!(!entry.is_active());
        assert!(!snapshot[0].is_active());
    }

    #[test]
    fn test_subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_isolated_contains_panics() {
        let ran_after = AtomicBool::new(false);
        invoke_isolated("test", || panic!("boom"));
        invoke_isolated("test", || ran_after.store(true, Ordering::SeqCst));
        assert!(ran_after.load(Ordering::SeqCst));
    }
}

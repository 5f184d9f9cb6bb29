//! Registry of in-flight dish and image writes
//!
//! Mutations mark their target as syncing before the backend write starts and
//! clear it once the write settles. Views subscribe to render loading states.
//! Every membership change notifies subscribers synchronously, in
//! registration order; calls that leave membership unchanged notify nobody.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ids::{DishId, ImageId};
use crate::listeners::{invoke_isolated, ListenerRegistry, Subscription};

type SyncListener = dyn Fn() + Send + Sync;

#[derive(Default)]
struct Inner {
    dishes: HashSet<DishId>,
    images: HashSet<ImageId>,
    listeners: ListenerRegistry<SyncListener>,
}

/// Serializable view of the tracker, for status displays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub dishes: Vec<DishId>,
    pub images: Vec<ImageId>,
}

impl SyncSnapshot {
    pub fn is_idle(&self) -> bool {
        self.dishes.is_empty() && self.images.is_empty()
    }
}

/// Tracks which dishes and images have writes in flight
///
/// One instance per application context; share it behind an [`Arc`].
#[derive(Default)]
pub struct SyncStateTracker {
    inner: Arc<Mutex<Inner>>,
}

impl SyncStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_dish_sync(&self, id: &DishId) {
        let changed = self.inner.lock().dishes.insert(id.clone());
        if changed {
            tracing::trace!(dish_id = %id, "dish sync started");
            self.notify();
        }
    }

    pub fn end_dish_sync(&self, id: &DishId) {
        let changed = self.inner.lock().dishes.remove(id);
        if changed {
            tracing::trace!(dish_id = %id, "dish sync ended");
            self.notify();
        }
    }

    pub fn start_image_sync(&self, id: &ImageId) {
        let changed = self.inner.lock().images.insert(id.clone());
        if changed {
            tracing::trace!(image_id = %id, "image sync started");
            self.notify();
        }
    }

    pub fn end_image_sync(&self, id: &ImageId) {
        let changed = self.inner.lock().images.remove(id);
        if changed {
            tracing::trace!(image_id = %id, "image sync ended");
            self.notify();
        }
    }

    pub fn is_dish_syncing(&self, id: &DishId) -> bool {
        self.inner.lock().dishes.contains(id)
    }

    pub fn is_image_syncing(&self, id: &ImageId) -> bool {
        self.inner.lock().images.contains(id)
    }

    pub fn has_any_syncing(&self) -> bool {
        let inner = self.inner.lock();
        !inner.dishes.is_empty() || !inner.images.is_empty()
    }

    /// Current members in no particular order
    pub fn syncing_dish_ids(&self) -> Vec<DishId> {
        self.inner.lock().dishes.iter().cloned().collect()
    }

    /// Current members in no particular order
    pub fn syncing_image_ids(&self) -> Vec<ImageId> {
        self.inner.lock().images.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let inner = self.inner.lock();
        SyncSnapshot {
            dishes: inner.dishes.iter().cloned().collect(),
            images: inner.images.iter().cloned().collect(),
        }
    }

    /// Register a callback run after every syncing state change
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let (id, _) = self.inner.lock().listeners.insert(Box::new(listener));
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.lock().listeners.remove(id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Forget every in-flight write, e.g. on logout
    pub fn clear(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = !inner.dishes.is_empty() || !inner.images.is_empty();
            inner.dishes.clear();
            inner.images.clear();
            changed
        };
        if changed {
            tracing::debug!("sync state cleared");
            self.notify();
        }
    }

    fn notify(&self) {
        let listeners = self.inner.lock().listeners.snapshot();
        for entry in listeners {
            if !entry.is_active() {
                continue;
            }
            invoke_isolated("sync_state", || (entry.callback())());
        }
    }
}

impl std::fmt::Debug for SyncStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SyncStateTracker")
            .field("dishes", &inner.dishes.len())
            .field("images", &inner.images.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(tracker: &SyncStateTracker) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let sub = tracker.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_start_then_end_notifies_twice() {
        let tracker = SyncStateTracker::new();
        let (count, _sub) = counting_listener(&tracker);
        let d1 = DishId::new("d1");

        tracker.start_dish_sync(&d1);
        assert!(tracker.is_dish_syncing(&d1));

        tracker.end_dish_sync(&d1);
        assert!(!tracker.is_dish_syncing(&d1));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_calls_do_not_notify() {
        let tracker = SyncStateTracker::new();
        let (count, _sub) = counting_listener(&tracker);
        let d1 = DishId::new("d1");

        tracker.end_dish_sync(&d1);
        tracker.start_dish_sync(&d1);
        tracker.start_dish_sync(&d1);
        tracker.end_dish_sync(&d1);
        tracker.end_dish_sync(&d1);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.syncing_dish_ids(), Vec::<DishId>::new());
    }

    #[test]
    fn test_has_any_syncing_tracks_both_sets() {
        let tracker = SyncStateTracker::new();
        let d1 = DishId::new("d1");
        let img = ImageId::new("img-1");
        assert!(!tracker.has_any_syncing());

        tracker.start_image_sync(&img);
        assert!(tracker.has_any_syncing());
        assert!(tracker.is_image_syncing(&img));
        assert_eq!(tracker.syncing_image_ids(), vec![img.clone()]);

        tracker.start_dish_sync(&d1);
        tracker.end_image_sync(&img);
        assert!(tracker.has_any_syncing());

        tracker.end_dish_sync(&d1);
        assert!(!tracker.has_any_syncing());
        assert!(tracker.snapshot().is_idle());
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let tracker = SyncStateTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = order.clone();
                tracker.subscribe(move || order.lock().push(i))
            })
            .collect();

        tracker.start_dish_sync(&DishId::new("d1"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(subs.len(), 3);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let tracker = SyncStateTracker::new();
        let _bad = tracker.subscribe(|| panic!("listener failure"));
        let (count, _sub) = counting_listener(&tracker);

        tracker.start_image_sync(&ImageId::new("img-1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(tracker.is_image_syncing(&ImageId::new("img-1")));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let tracker = SyncStateTracker::new();
        let (count, sub) = counting_listener(&tracker);

        tracker.start_dish_sync(&DishId::new("d1"));
        sub.unsubscribe();
        sub.unsubscribe();
        tracker.end_dish_sync(&DishId::new("d1"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_fan_out() {
        let tracker = Arc::new(SyncStateTracker::new());
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_sub: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handle = second_sub.clone();
        let _first = tracker.subscribe(move || {
            if let Some(sub) = handle.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        let counter = second_calls.clone();
        *second_sub.lock() = Some(tracker.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.start_dish_sync(&DishId::new("d1"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_may_reenter_tracker() {
        let tracker = Arc::new(SyncStateTracker::new());
        let observed = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&tracker);
        let seen = observed.clone();
        let _sub = tracker.subscribe(move || {
            if let Some(tracker) = weak.upgrade() {
                seen.lock().push(tracker.has_any_syncing());
            }
        });

        tracker.start_dish_sync(&DishId::new("d1"));
        tracker.end_dish_sync(&DishId::new("d1"));
        assert_eq!(*observed.lock(), vec![true, false]);
    }

    #[test]
    fn test_clear_notifies_only_when_non_empty() {
        let tracker = SyncStateTracker::new();
        let (count, _sub) = counting_listener(&tracker);

        tracker.clear();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tracker.start_dish_sync(&DishId::new("d1"));
        tracker.start_image_sync(&ImageId::new("i1"));
        tracker.clear();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!tracker.has_any_syncing());
    }
}

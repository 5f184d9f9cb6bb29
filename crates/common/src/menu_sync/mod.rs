//! Optimistic menu updates delivered straight to live views
//!
//! Views subscribe per restaurant and receive [`MenuSyncMessage`]s
//! synchronously, in the same call that emitted them, so an optimistic edit
//! shows up before the authoritative refetch completes.
//!
//! # Delivery guarantees
//!
//! - [`MenuSyncEmitter::emit`] reaches current listeners of one restaurant
//!   and is lost if there are none.
//! - [`MenuSyncEmitter::emit_all`] reaches every current listener and is also
//!   parked in a global pending queue, so a view mounting shortly afterwards
//!   still receives it.
//! - Pending updates expire after the configured TTL and are then dropped,
//!   never applied.

mod pending;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::ids::RestaurantId;
use crate::listeners::{invoke_isolated, ListenerEntry, ListenerRegistry, Subscription};
use crate::menu::MenuUpdate;

use pending::{PendingQueue, PendingUpdate};

/// How long an undelivered update stays eligible for delivery
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_millis(5000);

/// Message pushed to menu views
#[derive(Debug, Clone)]
pub enum MenuSyncMessage {
    /// Apply this optimistic update to the view's copy of the menu
    Update(MenuUpdate),
    /// Local state can no longer be trusted; fetch the menu again
    Refetch,
}

type MenuListener = dyn Fn(&MenuSyncMessage) + Send + Sync;

#[derive(Default)]
struct Inner {
    buckets: HashMap<RestaurantId, ListenerRegistry<MenuListener>>,
    pending: HashMap<RestaurantId, PendingQueue>,
    global: PendingQueue,
}

impl Inner {
    /// Drop expired entries everywhere, and restaurant queues left empty
    fn prune_pending(&mut self, now: Instant, ttl: Duration) {
        self.pending.retain(|_, queue| {
            queue.prune(now, ttl);
            !queue.is_empty()
        });
        self.global.prune(now, ttl);
    }
}

pub struct MenuSyncEmitter {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for MenuSyncEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL, Arc::new(SystemClock))
    }
}

impl MenuSyncEmitter {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a view for one restaurant
    ///
    /// Anything queued for the restaurant, plus the global backlog, is
    /// delivered to the new listener before this returns, oldest first.
    /// Both queues are consumed by the flush.
    pub fn subscribe(
        &self,
        restaurant_id: &RestaurantId,
        listener: impl Fn(&MenuSyncMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let now = self.clock.now();
        let (id, entry, backlog) = {
            let mut inner = self.inner.lock();
            inner.prune_pending(now, self.ttl);
            let (id, entry) = inner
                .buckets
                .entry(restaurant_id.clone())
                .or_default()
                .insert(Box::new(listener));

            let mut backlog = inner
                .pending
                .remove(restaurant_id)
                .map(|mut queue| queue.drain_live(now, self.ttl))
                .unwrap_or_default();
            backlog.extend(inner.global.drain_live(now, self.ttl));
            backlog.sort_by_key(|p| p.queued_at);
            (id, entry, backlog)
        };

        if !backlog.is_empty() {
            tracing::debug!(
                restaurant_id = %restaurant_id,
                count = backlog.len(),
                "flushing pending menu updates to new subscriber"
            );
        }
        deliver_backlog(&entry, backlog);

        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let restaurant_id = restaurant_id.clone();
        Subscription::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock();
            if let Some(bucket) = inner.buckets.get_mut(&restaurant_id) {
                bucket.remove(id);
                if bucket.is_empty() {
                    inner.buckets.remove(&restaurant_id);
                }
            }
        })
    }

    /// Deliver a message to the current listeners of one restaurant
    ///
    /// Nothing is queued: with no listener the message is dropped.
    pub fn emit(&self, restaurant_id: &RestaurantId, message: MenuSyncMessage) {
        let listeners = self.listeners_of(restaurant_id);
        if listeners.is_empty() {
            tracing::trace!(restaurant_id = %restaurant_id, "no menu listeners, message dropped");
            return;
        }
        fan_out(&listeners, &message);
    }

    /// Deliver an update to one restaurant's listeners, or park it for the
    /// next subscriber of that restaurant when there are none
    pub fn emit_or_queue(&self, restaurant_id: &RestaurantId, update: MenuUpdate) {
        let now = self.clock.now();
        let listeners = {
            let mut inner = self.inner.lock();
            inner.prune_pending(now, self.ttl);
            let listeners = inner
                .buckets
                .get(restaurant_id)
                .map(|bucket| bucket.snapshot())
                .unwrap_or_default();
            if listeners.is_empty() {
                inner
                    .pending
                    .entry(restaurant_id.clone())
                    .or_default()
                    .push(update, now, self.ttl);
                tracing::trace!(restaurant_id = %restaurant_id, "menu update queued for next subscriber");
                return;
            }
            listeners
        };
        fan_out(&listeners, &MenuSyncMessage::Update(update));
    }

    /// Deliver an update to every listener of every restaurant
    ///
    /// The update is also appended to the global pending queue whether or
    /// not anybody received it.
    pub fn emit_all(&self, update: MenuUpdate) {
        let now = self.clock.now();
        let listeners: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.prune_pending(now, self.ttl);
            inner.global.push(update.clone(), now, self.ttl);
            inner
                .buckets
                .values()
                .filter(|bucket| !bucket.is_empty())
                .flat_map(|bucket| bucket.snapshot())
                .collect()
        };
        tracing::trace!(listeners = listeners.len(), "menu update emitted to all views");
        fan_out(&listeners, &MenuSyncMessage::Update(update));
    }

    /// Non-expired updates in the global queue, oldest first
    pub fn pending_updates(&self) -> Vec<MenuUpdate> {
        let now = self.clock.now();
        self.inner
            .lock()
            .global
            .live(now, self.ttl)
            .into_iter()
            .map(|p| p.update)
            .collect()
    }

    pub fn clear_pending_updates(&self) {
        self.inner.lock().global.clear();
    }

    /// Hand the global backlog to one listener and consume it
    ///
    /// Only the first caller sees the backlog; later callers get nothing
    /// from the same batch.
    pub fn flush_global_pending(
        &self,
        restaurant_id: &RestaurantId,
        mut listener: impl FnMut(&MenuSyncMessage),
    ) {
        let now = self.clock.now();
        let backlog = self.inner.lock().global.drain_live(now, self.ttl);
        if backlog.is_empty() {
            return;
        }
        tracing::debug!(
            restaurant_id = %restaurant_id,
            count = backlog.len(),
            "flushing global pending menu updates"
        );
        for pending in backlog {
            let message = MenuSyncMessage::Update(pending.update);
            invoke_isolated("menu_sync", || listener(&message));
        }
    }

    pub fn listener_count(&self, restaurant_id: &RestaurantId) -> usize {
        self.inner
            .lock()
            .buckets
            .get(restaurant_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// Whether the restaurant still has a bucket, even an empty one
    pub fn has_bucket(&self, restaurant_id: &RestaurantId) -> bool {
        self.inner.lock().buckets.contains_key(restaurant_id)
    }

    fn listeners_of(&self, restaurant_id: &RestaurantId) -> Vec<Arc<ListenerEntry<MenuListener>>> {
        self.inner
            .lock()
            .buckets
            .get(restaurant_id)
            .map(|bucket| bucket.snapshot())
            .unwrap_or_default()
    }
}

fn fan_out(listeners: &[Arc<ListenerEntry<MenuListener>>], message: &MenuSyncMessage) {
    for entry in listeners {
        if !entry.is_active() {
            continue;
        }
        invoke_isolated("menu_sync", || (entry.callback())(message));
    }
}

fn deliver_backlog(entry: &ListenerEntry<MenuListener>, backlog: Vec<PendingUpdate>) {
    for pending in backlog {
        if !entry.is_active() {
            break;
        }
        let message = MenuSyncMessage::Update(pending.update);
        invoke_isolated("menu_sync", || (entry.callback())(&message));
    }
}

impl std::fmt::Debug for MenuSyncEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MenuSyncEmitter")
            .field("restaurants", &inner.buckets.len())
            .field("global_pending_empty", &inner.global.is_empty())
            .field("ttl", &self.ttl)
            .finish()
    }
}

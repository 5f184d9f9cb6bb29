//! Receiving side of cross-context invalidation
//!
//! Each context runs one [`InvalidationHandler`] fed from the shared channel.
//! Messages are handled independently; replays and self-echoes just evict
//! the same entries again.

mod query_cache;
mod snapshot;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::broadcast::{BroadcastMessage, InvalidationKind};

pub use query_cache::{MemoryQueryCache, MemoryQueryCacheConfig, QueryCache, QueryKey};
pub use snapshot::{
    full_menu_key, FileSnapshotStore, MemorySnapshotStore, SnapshotError, SnapshotStore,
    FULL_MENU_PREFIX,
};

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("malformed invalidation payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What a single message evicted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evictions {
    pub queries: Vec<QueryKey>,
    pub snapshots: Vec<String>,
}

impl Evictions {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.snapshots.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationHandler {
    queries: Arc<dyn QueryCache>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl InvalidationHandler {
    pub fn new(queries: Arc<dyn QueryCache>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { queries, snapshots }
    }

    /// Work out which entries a message addresses
    pub fn plan(message: &BroadcastMessage) -> Evictions {
        let mut evictions = Evictions::default();
        let id = message.restaurant_id.as_ref();
        let slug = message.slug.as_deref();

        match message.kind {
            InvalidationKind::InvalidateMenu => {
                if let Some(id) = id {
                    evictions.snapshots.push(full_menu_key(id));
                    evictions.queries.push(QueryKey::full_menu(id.as_str()));
                    evictions.queries.push(QueryKey::restaurant(id.as_str()));
                }
                if let Some(slug) = slug {
                    evictions.queries.push(QueryKey::restaurant(slug));
                }
            }
            InvalidationKind::InvalidateRestaurant => {
                if let Some(id) = id {
                    evictions.queries.push(QueryKey::restaurant(id.as_str()));
                }
                if let Some(slug) = slug {
                    evictions.queries.push(QueryKey::restaurant(slug));
                }
                evictions.queries.push(QueryKey::Restaurants);
            }
        }
        evictions
    }

    pub fn handle(&self, message: &BroadcastMessage) -> Evictions {
        let evictions = Self::plan(message);

        for key in &evictions.snapshots {
            if let Err(e) = self.snapshots.remove(key) {
                tracing::warn!(key = %key, error = %e, "failed to evict menu snapshot");
            }
        }
        for key in &evictions.queries {
            self.queries.invalidate(key);
        }

        tracing::debug!(
            kind = %message.kind,
            restaurant_id = ?message.restaurant_id,
            queries = evictions.queries.len(),
            snapshots = evictions.snapshots.len(),
            "applied invalidation"
        );
        evictions
    }

    /// Parse a channel payload and handle it
    pub fn handle_raw(&self, payload: &str) -> Result<Evictions, HandleError> {
        let message = BroadcastMessage::from_json(payload)?;
        Ok(self.handle(&message))
    }

    /// Evict every query and every menu snapshot, used after messages were lost
    pub fn invalidate_everything(&self) {
        self.queries.invalidate_all();
        match self.snapshots.remove_prefix(FULL_MENU_PREFIX) {
            Ok(removed) => tracing::debug!(removed, "dropped all menu snapshots"),
            Err(e) => tracing::warn!(error = %e, "failed to drop menu snapshots"),
        }
    }
}

/// Drain the shared channel into a handler until shutdown
///
/// Runs for the lifetime of a context. Malformed payloads are skipped. If
/// the receiver falls behind, the lost messages cannot be replayed, so the
/// whole query cache and every menu snapshot are dropped instead.
pub async fn run_listener(
    handler: InvalidationHandler,
    mut rx: broadcast::Receiver<String>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    tracing::debug!("invalidation listener started");
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::debug!("invalidation listener shutting down");
                break;
            }
            received = rx.recv() => match received {
                Ok(payload) => {
                    if let Err(e) = handler.handle_raw(&payload) {
                        tracing::debug!(error = %e, "ignoring invalidation payload");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "invalidation listener lagged, dropping cached menus");
                    handler.invalidate_everything();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("invalidation channel closed");
                    break;
                }
            }
        }
    }
}

//! One application context's sync services
//!
//! A [`SyncContext`] is built once at start-up and handed by reference to
//! everything that mutates or renders menus. It owns the tracker, the
//! emitter, the broadcaster and the local caches, and runs the invalidation
//! listener for the shared channel.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::broadcast::{LocalBus, SyncBroadcaster};
use common::clock::{Clock, SystemClock};
use common::ids::RestaurantId;
use common::invalidation::{
    full_menu_key, run_listener, FileSnapshotStore, InvalidationHandler, MemoryQueryCache,
    MemorySnapshotStore, QueryKey, SnapshotError, SnapshotStore,
};
use common::menu::FullMenu;
use common::menu_sync::MenuSyncEmitter;
use common::sync_state::SyncStateTracker;

use crate::config::{Config, ConfigError, SnapshotBackend};

pub struct SyncContext {
    id: Uuid,
    tracker: Arc<SyncStateTracker>,
    emitter: Arc<MenuSyncEmitter>,
    broadcaster: SyncBroadcaster,
    queries: Arc<MemoryQueryCache>,
    snapshots: Arc<dyn SnapshotStore>,
    invalidation: InvalidationHandler,
    shutdown_tx: watch::Sender<()>,
    listener: Option<JoinHandle<()>>,
}

impl SyncContext {
    pub fn builder(config: &Config) -> SyncContextBuilder<'_> {
        SyncContextBuilder {
            config,
            bus: None,
            clock: None,
            snapshots: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracker(&self) -> &Arc<SyncStateTracker> {
        &self.tracker
    }

    pub fn emitter(&self) -> &Arc<MenuSyncEmitter> {
        &self.emitter
    }

    pub fn broadcaster(&self) -> &SyncBroadcaster {
        &self.broadcaster
    }

    pub fn queries(&self) -> &Arc<MemoryQueryCache> {
        &self.queries
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub fn invalidation(&self) -> &InvalidationHandler {
        &self.invalidation
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Record a freshly fetched menu in both local caches
    pub fn store_menu(&self, menu: &FullMenu) -> Result<(), ContextError> {
        let value = serde_json::to_value(menu)?;
        self.snapshots
            .set(&full_menu_key(&menu.restaurant_id), &value.to_string())?;
        self.queries
            .insert(QueryKey::full_menu(menu.restaurant_id.as_str()), value);
        Ok(())
    }

    /// Menu from the query cache, falling back to the persisted snapshot
    pub fn cached_menu(&self, restaurant_id: &RestaurantId) -> Option<FullMenu> {
        if let Some(value) = self
            .queries
            .get(&QueryKey::full_menu(restaurant_id.as_str()))
        {
            return serde_json::from_value(value).ok();
        }
        match self.snapshots.get(&full_menu_key(restaurant_id)) {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(restaurant_id = %restaurant_id, error = %e, "failed to read menu snapshot");
                None
            }
        }
    }

    /// Stop the invalidation listener and wait for it to exit
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                tracing::warn!(context_id = %self.id, error = %e, "invalidation listener failed");
            }
        }
        self.tracker.clear();
        tracing::debug!(context_id = %self.id, "sync context stopped");
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("id", &self.id)
            .field("tracker", &self.tracker)
            .field("emitter", &self.emitter)
            .field("broadcast", &self.broadcaster.is_available())
            .field("listening", &self.is_listening())
            .finish()
    }
}

pub struct SyncContextBuilder<'a> {
    config: &'a Config,
    bus: Option<LocalBus>,
    clock: Option<Arc<dyn Clock>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl<'a> SyncContextBuilder<'a> {
    /// Join the shared channel on this bus
    ///
    /// Without a bus the context neither sends nor receives invalidations.
    pub fn bus(mut self, bus: &LocalBus) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this snapshot store instead of the configured backend
    pub fn snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Build the context and start its invalidation listener
    ///
    /// Must run inside a tokio runtime when a bus is configured.
    pub async fn build(self) -> Result<SyncContext, ContextError> {
        let id = Uuid::new_v4();
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let snapshots: Arc<dyn SnapshotStore> = match self.snapshots {
            Some(snapshots) => snapshots,
            None => match config.snapshots.backend {
                SnapshotBackend::Memory => Arc::new(MemorySnapshotStore::new()),
                SnapshotBackend::File => {
                    let dir = config.snapshots.resolve_dir()?;
                    tracing::debug!(dir = %dir.display(), "using file snapshot store");
                    Arc::new(FileSnapshotStore::open(dir)?)
                }
            },
        };

        let queries = Arc::new(MemoryQueryCache::new((&config.cache).into()));
        let invalidation = InvalidationHandler::new(queries.clone(), snapshots.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let (broadcaster, listener) = match self.bus {
            Some(bus) if config.sync.broadcast => {
                let channel = bus.channel(&config.sync.channel_name);
                let rx = channel.subscribe();
                let listener = tokio::spawn(run_listener(invalidation.clone(), rx, shutdown_rx));
                (SyncBroadcaster::new(Arc::new(channel)), Some(listener))
            }
            _ => (SyncBroadcaster::disabled(), None),
        };

        tracing::info!(
            context_id = %id,
            channel = %config.sync.channel_name,
            broadcast = broadcaster.is_available(),
            pending_ttl_ms = config.sync.pending_ttl_ms,
            "sync context ready"
        );

        Ok(SyncContext {
            id,
            tracker: Arc::new(SyncStateTracker::new()),
            emitter: Arc::new(MenuSyncEmitter::new(config.sync.pending_ttl(), clock)),
            broadcaster,
            queries,
            snapshots,
            invalidation,
            shutdown_tx,
            listener,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to encode menu: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::DishId;
    use common::invalidation::QueryCache;
    use common::menu::Dish;

    fn menu(restaurant: &str) -> FullMenu {
        let mut menu = FullMenu::empty(RestaurantId::new(restaurant));
        menu.upsert_dish(Dish {
            id: DishId::new("d1"),
            category_id: "mains".into(),
            name: "Risotto".into(),
            description: None,
            price_cents: 1800,
            image_id: None,
            is_available: true,
            position: 0,
        });
        menu
    }

    #[tokio::test]
    async fn test_context_without_bus_is_isolated() {
        let ctx = SyncContext::builder(&Config::default()).build().await.unwrap();
        assert!(!ctx.broadcaster().is_available());
        assert!(!ctx.is_listening());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_disabled_in_config() {
        let mut config = Config::default();
        config.sync.broadcast = false;
        let bus = LocalBus::new();

        let ctx = SyncContext::builder(&config).bus(&bus).build().await.unwrap();
        assert!(!ctx.broadcaster().is_available());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_and_read_cached_menu() {
        let ctx = SyncContext::builder(&Config::default()).build().await.unwrap();
        let menu = menu("r1");
        ctx.store_menu(&menu).unwrap();

        assert_eq!(ctx.cached_menu(&RestaurantId::new("r1")), Some(menu.clone()));

        // query cache gone, snapshot still answers
        ctx.queries().invalidate_all();
        assert_eq!(ctx.cached_menu(&RestaurantId::new("r1")), Some(menu));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalidate_everything_leaves_no_stale_menu() {
        let ctx = SyncContext::builder(&Config::default()).build().await.unwrap();
        ctx.store_menu(&menu("r1")).unwrap();
        ctx.store_menu(&menu("r2")).unwrap();

        ctx.invalidation().invalidate_everything();

        assert_eq!(ctx.cached_menu(&RestaurantId::new("r1")), None);
        assert_eq!(ctx.cached_menu(&RestaurantId::new("r2")), None);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_snapshot_backend() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.snapshots.backend = SnapshotBackend::File;
        config.snapshots.dir = Some(temp.path().join("snapshots"));

        let ctx = SyncContext::builder(&config).build().await.unwrap();
        ctx.store_menu(&menu("r1")).unwrap();

        assert!(temp.path().join("snapshots").join("fullMenu%3Ar1.json").exists());
        ctx.shutdown().await;
    }
}

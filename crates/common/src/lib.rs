//! Client-side synchronization layer for menuboard editors
//!
//! Three services keep menu views consistent while writes are in flight:
//!
//! - [`sync_state::SyncStateTracker`]: which dishes and images are currently being written
//! - [`menu_sync::MenuSyncEmitter`]: optimistic menu updates pushed straight to live views
//! - [`broadcast::SyncBroadcaster`]: cache invalidation signals for other contexts
//!
//! The receiving half of the broadcaster lives in [`invalidation`], which
//! evicts entries from the query cache and the persisted menu snapshots.

pub mod broadcast;
pub mod clock;
pub mod ids;
pub mod invalidation;
pub mod listeners;
pub mod menu;
pub mod menu_sync;
pub mod sync_state;


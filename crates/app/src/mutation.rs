//! Mutation flow tying the three sync services together
//!
//! For every user-initiated write:
//!
//! 1. mark the dish or image as syncing
//! 2. push the optimistic update to the restaurant's views
//! 3. await the backend write supplied by the caller
//! 4. clear the syncing flag, whatever happened
//! 5. on success tell other contexts to invalidate; on failure ask local
//!    views to refetch
//!
//! The backend's result is returned untouched. Nothing in steps 1, 2, 4
//! or 5 can fail the mutation.

use std::fmt::Display;
use std::future::Future;

use common::ids::{DishId, ImageId, RestaurantId};
use common::menu::MenuUpdate;
use common::menu_sync::MenuSyncMessage;
use common::sync_state::SyncStateTracker;

use crate::context::SyncContext;

/// Where a write lands
#[derive(Debug, Clone)]
pub struct MenuTarget {
    pub restaurant_id: RestaurantId,
    /// Public slug, when known, so slug-keyed caches are evicted too
    pub slug: Option<String>,
}

impl MenuTarget {
    pub fn new(restaurant_id: impl Into<RestaurantId>) -> Self {
        Self {
            restaurant_id: restaurant_id.into(),
            slug: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

enum Syncing {
    Dish(DishId),
    Image(ImageId),
}

/// Clears the syncing flag on drop, so a cancelled write does not leave
/// the dish spinning forever
struct SyncingGuard<'a> {
    tracker: &'a SyncStateTracker,
    target: Syncing,
}

impl<'a> SyncingGuard<'a> {
    fn start(tracker: &'a SyncStateTracker, target: Syncing) -> Self {
        match &target {
            Syncing::Dish(id) => tracker.start_dish_sync(id),
            Syncing::Image(id) => tracker.start_image_sync(id),
        }
        Self { tracker, target }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        match &self.target {
            Syncing::Dish(id) => self.tracker.end_dish_sync(id),
            Syncing::Image(id) => self.tracker.end_image_sync(id),
        }
    }
}

impl SyncContext {
    /// Write one dish, showing `optimistic` in local views meanwhile
    pub async fn mutate_dish<T, E, F>(
        &self,
        target: &MenuTarget,
        dish_id: &DishId,
        optimistic: Option<MenuUpdate>,
        persist: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = {
            let _syncing = SyncingGuard::start(self.tracker(), Syncing::Dish(dish_id.clone()));
            if let Some(update) = optimistic {
                self.emitter().emit_or_queue(&target.restaurant_id, update);
            }
            persist.await
        };

        match &result {
            Ok(_) => {
                tracing::debug!(
                    restaurant_id = %target.restaurant_id,
                    dish_id = %dish_id,
                    "dish saved"
                );
                self.broadcaster()
                    .broadcast_menu_invalidation(&target.restaurant_id, target.slug.as_deref());
            }
            Err(e) => self.rollback(target, "dish", dish_id.as_str(), e),
        }
        result
    }

    /// Upload one image; views learn about it through the refetch
    pub async fn upload_image<T, E, F>(
        &self,
        target: &MenuTarget,
        image_id: &ImageId,
        persist: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = {
            let _syncing = SyncingGuard::start(self.tracker(), Syncing::Image(image_id.clone()));
            persist.await
        };

        match &result {
            Ok(_) => {
                tracing::debug!(
                    restaurant_id = %target.restaurant_id,
                    image_id = %image_id,
                    "image uploaded"
                );
                self.broadcaster()
                    .broadcast_menu_invalidation(&target.restaurant_id, target.slug.as_deref());
            }
            Err(e) => self.rollback(target, "image", image_id.as_str(), e),
        }
        result
    }

    /// Write restaurant-level settings (name, slug, theme)
    pub async fn update_restaurant<T, E, F>(&self, target: &MenuTarget, persist: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = persist.await;
        match &result {
            Ok(_) => self
                .broadcaster()
                .broadcast_restaurant_invalidation(&target.restaurant_id, target.slug.as_deref()),
            Err(e) => self.rollback(target, "restaurant", target.restaurant_id.as_str(), e),
        }
        result
    }

    fn rollback(&self, target: &MenuTarget, kind: &'static str, id: &str, error: &dyn Display) {
        tracing::warn!(
            restaurant_id = %target.restaurant_id,
            kind,
            id,
            error = %error,
            "write failed, asking views to refetch"
        );
        self.emitter()
            .emit(&target.restaurant_id, MenuSyncMessage::Refetch);
    }
}

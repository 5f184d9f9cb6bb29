//! Cross-context cache invalidation signals
//!
//! After a mutation settles, the sending context posts a
//! [`BroadcastMessage`] on a named channel shared by all contexts of the
//! application. Receivers evict their cached copies (see
//! [`crate::invalidation`]) so the next read refetches.
//!
//! Broadcasting is best effort. Without a transport the broadcaster does
//! nothing and every context is only consistent with itself; transport
//! failures are logged and dropped.

mod local_bus;
mod message;
mod transport;

use std::sync::Arc;

pub use local_bus::{LocalBus, LocalChannel};
pub use message::{BroadcastMessage, InvalidationKind};
pub use transport::{BroadcastTransport, TransportError};

use crate::ids::RestaurantId;

/// Channel name shared by every context of the application
pub const CHANNEL_NAME: &str = "menuboard-sync";

#[derive(Debug, Clone, Default)]
pub struct SyncBroadcaster {
    transport: Option<Arc<dyn BroadcastTransport>>,
}

impl SyncBroadcaster {
    pub fn new(transport: Arc<dyn BroadcastTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// Broadcaster for contexts with no channel support
    pub fn disabled() -> Self {
        Self { transport: None }
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_some()
    }

    pub fn broadcast_menu_invalidation(&self, restaurant_id: &RestaurantId, slug: Option<&str>) {
        self.post(BroadcastMessage::invalidate_menu(
            restaurant_id.clone(),
            slug.map(str::to_string),
        ));
    }

    pub fn broadcast_restaurant_invalidation(
        &self,
        restaurant_id: &RestaurantId,
        slug: Option<&str>,
    ) {
        self.post(BroadcastMessage::invalidate_restaurant(
            restaurant_id.clone(),
            slug.map(str::to_string),
        ));
    }

    fn post(&self, message: BroadcastMessage) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let result = message
            .to_json()
            .map_err(TransportError::from)
            .and_then(|payload| transport.post(&payload));
        match result {
            Ok(()) => tracing::debug!(
                channel = transport.channel_name(),
                kind = %message.kind,
                restaurant_id = ?message.restaurant_id,
                "posted invalidation"
            ),
            Err(e) => tracing::debug!(
                channel = transport.channel_name(),
                kind = %message.kind,
                error = %e,
                "dropping invalidation broadcast"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingTransport;

    impl BroadcastTransport for FailingTransport {
        fn channel_name(&self) -> &str {
            "broken"
        }

        fn post(&self, _payload: &str) -> Result<(), TransportError> {
            Err(TransportError::Unavailable("no channel support".into()))
        }
    }

    #[test]
    fn test_posts_serialized_message() {
        let bus = LocalBus::new();
        let channel = bus.channel(CHANNEL_NAME);
        let mut rx = channel.subscribe();
        let broadcaster = SyncBroadcaster::new(Arc::new(channel));

        broadcaster.broadcast_menu_invalidation(&RestaurantId::new("r1"), Some("chez-r1"));
        broadcaster.broadcast_restaurant_invalidation(&RestaurantId::new("r1"), None);

        let first = BroadcastMessage::from_json(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first.kind, InvalidationKind::InvalidateMenu);
        assert_eq!(first.slug.as_deref(), Some("chez-r1"));

        let second = BroadcastMessage::from_json(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second.kind, InvalidationKind::InvalidateRestaurant);
        assert_eq!(second.restaurant_id, Some(RestaurantId::new("r1")));
    }

    #[test]
    fn test_missing_or_failing_transport_is_silent() {
        let disabled = SyncBroadcaster::disabled();
        assert!(!disabled.is_available());
        disabled.broadcast_menu_invalidation(&RestaurantId::new("r1"), None);

        let failing = SyncBroadcaster::new(Arc::new(FailingTransport));
        assert!(failing.is_available());
        failing.broadcast_restaurant_invalidation(&RestaurantId::new("r1"), Some("slug"));
    }
}

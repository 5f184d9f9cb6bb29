use serde::{Deserialize, Serialize};

use crate::ids::RestaurantId;

/// Which cached data a message invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationKind {
    InvalidateMenu,
    InvalidateRestaurant,
}

impl InvalidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationKind::InvalidateMenu => "invalidate-menu",
            InvalidationKind::InvalidateRestaurant => "invalidate-restaurant",
        }
    }
}

impl std::fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload posted on the shared channel
///
/// Wire shape: `{"type": "invalidate-menu", "restaurantId": "r1", "slug": "chez-r1"}`
/// with both id and slug optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: InvalidationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant_id: Option<RestaurantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl BroadcastMessage {
    pub fn invalidate_menu(restaurant_id: RestaurantId, slug: Option<String>) -> Self {
        Self {
            kind: InvalidationKind::InvalidateMenu,
            restaurant_id: Some(restaurant_id),
            slug,
        }
    }

    pub fn invalidate_restaurant(restaurant_id: RestaurantId, slug: Option<String>) -> Self {
        Self {
            kind: InvalidationKind::InvalidateRestaurant,
            restaurant_id: Some(restaurant_id),
            slug,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

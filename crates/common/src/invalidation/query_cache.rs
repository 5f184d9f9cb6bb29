//! Structured query cache addressed by composite keys

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

/// Composite key of a cached query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKey {
    /// `["full-menu", restaurantId]`
    FullMenu(String),
    /// `["restaurant", restaurantId | slug]`
    Restaurant(String),
    /// `["restaurants"]`
    Restaurants,
}

impl QueryKey {
    pub fn full_menu(id: impl Into<String>) -> Self {
        QueryKey::FullMenu(id.into())
    }

    pub fn restaurant(id_or_slug: impl Into<String>) -> Self {
        QueryKey::Restaurant(id_or_slug.into())
    }

    pub fn parts(&self) -> Vec<&str> {
        match self {
            QueryKey::FullMenu(id) => vec!["full-menu", id.as_str()],
            QueryKey::Restaurant(id) => vec!["restaurant", id.as_str()],
            QueryKey::Restaurants => vec!["restaurants"],
        }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quoted: Vec<String> = self.parts().iter().map(|p| format!("\"{p}\"")).collect();
        write!(f, "[{}]", quoted.join(","))
    }
}

/// Cache the receiving side can evict from
///
/// This layer only ever invalidates; reads and writes belong to whoever
/// fetches the data.
pub trait QueryCache: std::fmt::Debug + Send + Sync {
    fn invalidate(&self, key: &QueryKey);

    /// Evict everything, used when invalidations may have been missed
    fn invalidate_all(&self);
}

#[derive(Debug, Clone)]
pub struct MemoryQueryCacheConfig {
    pub max_capacity: u64,
    pub ttl: Duration,
}

impl Default for MemoryQueryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// In-memory query cache holding JSON query results
#[derive(Clone)]
pub struct MemoryQueryCache {
    entries: Cache<QueryKey, serde_json::Value>,
    config: MemoryQueryCacheConfig,
}

impl MemoryQueryCache {
    pub fn new(config: MemoryQueryCacheConfig) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(config.ttl)
                .max_capacity(config.max_capacity)
                .build(),
            config,
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<serde_json::Value> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: QueryKey, value: serde_json::Value) {
        self.entries.insert(key, value);
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl Default for MemoryQueryCache {
    fn default() -> Self {
        Self::new(MemoryQueryCacheConfig::default())
    }
}

impl QueryCache for MemoryQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        self.entries.invalidate(key);
    }

    fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}

impl std::fmt::Debug for MemoryQueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueryCache")
            .field("config", &self.config)
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

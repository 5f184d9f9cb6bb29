//! Time-bounded buffer of updates waiting for a consumer

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::menu::MenuUpdate;

#[derive(Debug, Clone)]
pub(crate) struct PendingUpdate {
    pub update: MenuUpdate,
    pub queued_at: Instant,
}

impl PendingUpdate {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.queued_at) < ttl
    }
}

/// Insertion-ordered queue, oldest first
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingUpdate>,
}

impl PendingQueue {
    pub fn push(&mut self, update: MenuUpdate, now: Instant, ttl: Duration) {
        self.prune(now, ttl);
        self.entries.push_back(PendingUpdate {
            update,
            queued_at: now,
        });
    }

    /// Drop expired entries from the front
    ///
    /// Entries are pushed with a non-decreasing clock, so the first live
    /// entry means everything behind it is live too.
    pub fn prune(&mut self, now: Instant, ttl: Duration) {
        while let Some(front) = self.entries.front() {
            if front.is_live(now, ttl) {
                break;
            }
            self.entries.pop_front();
        }
    }

    pub fn live(&self, now: Instant, ttl: Duration) -> Vec<PendingUpdate> {
        self.entries
            .iter()
            .filter(|entry| entry.is_live(now, ttl))
            .cloned()
            .collect()
    }

    /// Take every live entry and empty the queue
    pub fn drain_live(&mut self, now: Instant, ttl: Duration) -> Vec<PendingUpdate> {
        let live = self.live(now, ttl);
        self.entries.clear();
        live
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

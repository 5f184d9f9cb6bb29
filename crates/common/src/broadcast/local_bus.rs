//! In-process named channels standing in for same-origin tabs
//!
//! Every [`LocalChannel`] opened on the same [`LocalBus`] under the same name
//! shares one `tokio::sync::broadcast` channel, so each context hears every
//! post, its own included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::transport::{BroadcastTransport, TransportError};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receivers that fall more than `capacity` messages behind skip ahead
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Open (or join) the channel with this name
    pub fn channel(&self, name: &str) -> LocalChannel {
        let tx = self
            .channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        LocalChannel {
            name: name.to_string(),
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One context's handle on a named channel
#[derive(Debug, Clone)]
pub struct LocalChannel {
    name: String,
    tx: broadcast::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl LocalChannel {
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Stop posting from this handle; other handles are unaffected
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl BroadcastTransport for LocalChannel {
    fn channel_name(&self) -> &str {
        &self.name
    }

    fn post(&self, payload: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.name.clone()));
        }
        // Posting with nobody listening is not an error for a broadcast channel
        let _ = self.tx.send(payload.to_string());
        Ok(())
    }
}

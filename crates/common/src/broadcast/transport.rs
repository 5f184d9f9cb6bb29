/// Errors a transport may report when posting
///
/// None of these ever reach the code that requested the broadcast.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broadcast channel {0} is closed")]
    Closed(String),
    #[error("broadcast transport unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode broadcast message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Platform channel reaching every other context of the same origin
pub trait BroadcastTransport: std::fmt::Debug + Send + Sync {
    /// Name of the channel messages are posted on
    fn channel_name(&self) -> &str;

    /// Post a serialized message. Fire and forget.
    fn post(&self, payload: &str) -> Result<(), TransportError>;
}

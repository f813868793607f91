use crate::error::SignalingError;
use async_trait::async_trait;
use meshroom_core::SignalMessage;

/// Outbound half of the relay connection.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Hands a message to the relay. Implementations may queue it while the
    /// underlying connection is down.
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError>;
}

/// Inbound events from the relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// A raw text frame, decoded by the orchestrator.
    Frame(String),
}

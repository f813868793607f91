use crate::error::SignalingError;
use crate::signaling::{ChannelEvent, SignalingChannel, WsSignalingChannel};
use meshroom_core::SignalMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// The process-scoped relay handle: created when the client starts, injected
/// into the orchestrator, disposed when it stops.
pub struct SignalingContext {
    outbound: Arc<dyn SignalingChannel>,
    inbound: mpsc::Receiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl SignalingContext {
    pub fn new(outbound: Arc<dyn SignalingChannel>, inbound: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            outbound,
            inbound,
            task: None,
        }
    }

    /// Opens a WebSocket relay connection that reconnects on its own.
    pub fn connect(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (channel, inbound, task) = WsSignalingChannel::spawn(url.into(), reconnect_delay);
        Self {
            outbound: Arc::new(channel),
            inbound,
            task: Some(task),
        }
    }

    pub async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        self.outbound.send(msg).await
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    /// Stops the background connection, if any. Idempotent.
    pub fn dispose(&mut self) {
        self.inbound.close();
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Signaling context disposed");
        }
    }
}

impl Drop for SignalingContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

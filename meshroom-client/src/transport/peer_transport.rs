use crate::media::LocalTrack;
use crate::transport::{PeerKey, TransportEvent};
use anyhow::Result;
use async_trait::async_trait;
use meshroom_core::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of swapping the outgoing video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSwap {
    /// Substituted in place on the existing sender; no renegotiation needed.
    Replaced,
    /// No video sender existed; a new one was added and the session must
    /// renegotiate.
    Added,
    Unchanged,
}

/// One native peer connection. Implementations must be idempotent on `close`.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn attach_track(&self, track: Arc<LocalTrack>) -> Result<()>;

    async fn replace_video_track(&self, track: Option<Arc<LocalTrack>>) -> Result<TrackSwap>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates transports for new peer sessions.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PeerTransport;

    async fn create(
        &self,
        key: PeerKey,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self::Transport>;
}

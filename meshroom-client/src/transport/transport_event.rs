use crate::media::TrackKind;
use meshroom_core::{IceCandidate, UserId};
use std::fmt;

/// Identifies one peer session instance. The epoch changes whenever the
/// session for a user is recreated, so events from a discarded transport can
/// be told apart from the live one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub user_id: UserId,
    pub epoch: u64,
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.user_id, self.epoch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Connection or ICE state as reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Checking,
    Connecting,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Events a transport emits towards the orchestrator loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered and must be relayed to the peer.
    CandidateGenerated(PeerKey, IceCandidate),

    /// The peer started sending a track.
    RemoteTrack(PeerKey, RemoteTrackInfo),

    /// Peer connection state changed.
    ConnectionState(PeerKey, TransportState),

    /// ICE connection state changed.
    IceState(PeerKey, TransportState),
}

impl TransportEvent {
    pub fn key(&self) -> &PeerKey {
        match self {
            Self::CandidateGenerated(key, _)
            | Self::RemoteTrack(key, _)
            | Self::ConnectionState(key, _)
            | Self::IceState(key, _) => key,
        }
    }
}

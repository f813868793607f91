use crate::session::NegotiationState;
use meshroom_core::ProtocolError;
use thiserror::Error;

/// Failures opening or swapping local capture devices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied for {0}")]
    PermissionDenied(&'static str),

    #[error("screen share was cancelled")]
    ScreenShareDenied,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("{op} failed: {source:#}")]
    Transport {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot {op} while in state {state}")]
    UnexpectedState {
        op: &'static str,
        state: NegotiationState,
    },

    #[error("session is closed")]
    Closed,
}

impl NegotiationError {
    pub(crate) fn transport(op: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Transport { op, source }
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced to the presentation layer through the room controller.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,

    #[error("could not acquire local media: {0}")]
    MediaAcquisition(MediaError),

    #[error("screen share was cancelled")]
    ScreenShareDenied,

    #[error("relay rejected the join: {0}")]
    Rejected(String),

    #[error("not joined to a room")]
    NotJoined,

    #[error("already joined to a room")]
    AlreadyJoined,

    #[error("timed out waiting for the relay to confirm the join")]
    JoinTimeout,

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("room orchestrator has stopped")]
    OrchestratorStopped,
}

impl From<MediaError> for RoomError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::ScreenShareDenied => Self::ScreenShareDenied,
            other => Self::MediaAcquisition(other),
        }
    }
}

impl RoomError {
    /// Fatal errors end the room and send the user back to the entry screen.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RoomFull | Self::MediaAcquisition(_) | Self::Rejected(_) | Self::OrchestratorStopped
        )
    }
}

use crate::model::chat::ChatMessage;
use crate::model::participant::Participant;
use crate::model::room::RoomId;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP blob as carried inside `offer` and `answer` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Every message that crosses the relay.
///
/// `offer`, `answer` and `ice-candidate` are directed (`to`/`from`); the rest are
/// either requests to the relay or room-wide broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignalMessage {
    Join {
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
    },
    RoomJoined {
        participants: Vec<Participant>,
    },
    UserJoined(Participant),
    UserLeft {
        user_id: UserId,
    },
    Offer {
        offer: SessionDescription,
        to: UserId,
        from: UserId,
    },
    Answer {
        answer: SessionDescription,
        to: UserId,
        from: UserId,
    },
    IceCandidate {
        candidate: IceCandidate,
        to: UserId,
        from: UserId,
    },
    ToggleVideo {
        user_id: UserId,
        enabled: bool,
    },
    ToggleAudio {
        user_id: UserId,
        enabled: bool,
    },
    StartScreenShare {
        user_id: UserId,
    },
    StopScreenShare {
        user_id: UserId,
    },
    SendMessage(ChatMessage),
    NewMessage(ChatMessage),
    RoomError {
        message: String,
    },
    LeaveRoom {
        room_id: RoomId,
        user_id: UserId,
    },
}

impl SignalMessage {
    /// Wire tag of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::RoomJoined { .. } => "room-joined",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ToggleVideo { .. } => "toggle-video",
            Self::ToggleAudio { .. } => "toggle-audio",
            Self::StartScreenShare { .. } => "start-screen-share",
            Self::StopScreenShare { .. } => "stop-screen-share",
            Self::SendMessage(_) => "send-message",
            Self::NewMessage(_) => "new-message",
            Self::RoomError { .. } => "room-error",
            Self::LeaveRoom { .. } => "leave-room",
        }
    }

    /// Recipient of a directed message.
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            _ => None,
        }
    }
}

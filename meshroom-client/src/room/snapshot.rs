use crate::media::LocalMediaState;
use crate::session::SessionSummary;
use meshroom_core::{ChatMessage, Participant, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Joining,
    Joined,
    /// Terminal: the relay refused the join because the room is at capacity.
    RoomFull,
    Left,
}

/// Externally visible room state.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub phase: RoomPhase,
    pub room_id: Option<RoomId>,
    pub local_user: UserId,
    pub participants: Vec<Participant>,
    pub local_media: LocalMediaState,
    pub chat_log: Vec<ChatMessage>,
    pub sessions: Vec<SessionSummary>,
    /// Whether the relay connection is currently up.
    pub channel_connected: bool,
}

impl RoomSnapshot {
    pub fn empty(local_user: UserId) -> Self {
        Self {
            phase: RoomPhase::Idle,
            room_id: None,
            local_user,
            participants: Vec::new(),
            local_media: LocalMediaState::default(),
            chat_log: Vec::new(),
            sessions: Vec::new(),
            channel_connected: false,
        }
    }
}

use crate::transport::RemoteTrackInfo;
use meshroom_core::{ChatMessage, Participant, RoomId, UserId};

/// Change notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Joined {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    ParticipantJoined(Participant),
    ParticipantLeft(UserId),
    ParticipantUpdated(Participant),
    RemoteStream {
        user_id: UserId,
        track: RemoteTrackInfo,
    },
    ChatAppended(ChatMessage),
    LocalMediaChanged {
        video_enabled: bool,
        audio_enabled: bool,
        screen_sharing: bool,
    },
    ChannelStatus {
        connected: bool,
    },
    /// Transient, non-blocking failure worth showing to the user.
    Notice(String),
    RoomFull,
    Left,
}

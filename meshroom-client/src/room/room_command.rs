use crate::error::RoomError;
use meshroom_core::RoomId;
use tokio::sync::oneshot;

/// Commands from the room controller to the orchestrator loop.
#[derive(Debug)]
pub enum RoomCommand {
    /// Acquire media and join; answered once the relay accepts or rejects.
    Join {
        room_id: RoomId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Answered with the new enabled flag.
    ToggleVideo {
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },

    ToggleAudio {
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },

    /// Answered with whether the screen is now being shared.
    ToggleScreenShare {
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },

    SendChat {
        text: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    Leave { reply: oneshot::Sender<()> },
}

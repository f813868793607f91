mod chat_log;
mod controller;
mod orchestrator;
mod room_command;
mod room_event;
mod roster;
mod snapshot;

pub use chat_log::ChatLog;
pub use controller::RoomController;
pub use orchestrator::{LocalIdentity, SessionOrchestrator};
pub use room_command::RoomCommand;
pub use room_event::RoomEvent;
pub use roster::Roster;
pub use snapshot::{RoomPhase, RoomSnapshot};

mod chat;
mod participant;
mod room;
mod signaling;
mod user;

pub use chat::ChatMessage;
pub use participant::Participant;
pub use room::RoomId;
pub use signaling::{IceCandidate, IceServerConfig, SdpKind, SessionDescription, SignalMessage};
pub use user::UserId;

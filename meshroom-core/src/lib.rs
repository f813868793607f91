pub mod model;
pub mod protocol;
pub mod utils;

pub use model::{
    ChatMessage, IceCandidate, IceServerConfig, Participant, RoomId, SdpKind, SessionDescription,
    SignalMessage, UserId,
};
pub use protocol::{ProtocolError, decode, encode};

pub mod config;
pub mod error;
pub mod media;
pub mod room;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::ClientConfig;
pub use error::{MediaError, NegotiationError, RoomError, SignalingError};
pub use media::{LocalMediaState, MediaConstraints, MediaDevices, SyntheticDevices, SyntheticMediaConfig};
pub use room::{LocalIdentity, RoomController, RoomEvent, RoomPhase, RoomSnapshot, SessionOrchestrator};
pub use signaling::{ChannelEvent, SignalingChannel, SignalingContext};
pub use transport::{PeerTransport, RtcTransportFactory, TransportConfig, TransportFactory};

mod signaling_channel;
mod signaling_context;
mod ws_channel;

pub use signaling_channel::{ChannelEvent, SignalingChannel};
pub use signaling_context::SignalingContext;
pub use ws_channel::WsSignalingChannel;

mod negotiation_state;
mod peer_session;
mod registry;


pub use negotiation_state::{NegotiationState, SessionRole};
pub use peer_session::{
    AnswerOutcome, CandidateOutcome, PeerSession, RemoteStream, SessionSummary,
};
pub use registry::PeerRegistry;

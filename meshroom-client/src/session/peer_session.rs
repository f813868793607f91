use crate::error::NegotiationError;
use crate::media::LocalTrack;
use crate::session::{NegotiationState, SessionRole};
use crate::transport::{PeerKey, PeerTransport, RemoteTrackInfo, TrackSwap, TransportState};
use meshroom_core::{IceCandidate, SessionDescription, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Applied,
    /// The session was already connected; the answer was stale or duplicated.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    /// Held until the remote description is set.
    Buffered,
}

/// Diagnostic view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub user_id: UserId,
    pub epoch: u64,
    pub role: SessionRole,
    pub state: NegotiationState,
    pub pending_candidates: usize,
    pub connection_state: Option<TransportState>,
    pub ice_state: Option<TransportState>,
    pub remote_tracks: usize,
}

/// One negotiated connection to a remote participant.
pub struct PeerSession<T> {
    key: PeerKey,
    role: SessionRole,
    transport: T,
    state: NegotiationState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    remote_stream: Option<RemoteStream>,
    connection_state: Option<TransportState>,
    ice_state: Option<TransportState>,
    renegotiation_pending: bool,
}

impl<T: PeerTransport> PeerSession<T> {
    pub fn new(key: PeerKey, role: SessionRole, transport: T) -> Self {
        Self {
            key,
            role,
            transport,
            state: NegotiationState::New,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            remote_stream: None,
            connection_state: None,
            ice_state: None,
            renegotiation_pending: false,
        }
    }

    pub fn key(&self) -> &PeerKey {
        &self.key
    }

    pub fn user_id(&self) -> &UserId {
        &self.key.user_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            user_id: self.key.user_id.clone(),
            epoch: self.key.epoch,
            role: self.role,
            state: self.state,
            pending_candidates: self.pending_candidates.len(),
            connection_state: self.connection_state,
            ice_state: self.ice_state,
            remote_tracks: self.remote_stream.as_ref().map_or(0, |s| s.tracks.len()),
        }
    }

    /// Attaches the shared local tracks. Called once, before the first offer or
    /// answer, so both appear in the negotiated media sections.
    pub async fn attach_local_media(
        &self,
        video: Option<Arc<LocalTrack>>,
        audio: Option<Arc<LocalTrack>>,
    ) -> Result<(), NegotiationError> {
        for track in [audio, video].into_iter().flatten() {
            self.transport
                .attach_track(track)
                .await
                .map_err(NegotiationError::transport("attach track"))?;
        }
        Ok(())
    }

    /// Starts an offer round: on a fresh session, or as a renegotiation of a
    /// connected one.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if !matches!(
            self.state,
            NegotiationState::New | NegotiationState::Connected
        ) {
            return Err(NegotiationError::UnexpectedState {
                op: "create offer",
                state: self.state,
            });
        }

        let offer = self
            .transport
            .create_offer()
            .await
            .map_err(NegotiationError::transport("create offer"))?;
        self.transport
            .set_local_description(offer.clone())
            .await
            .map_err(NegotiationError::transport("set local offer"))?;

        self.transition(NegotiationState::HaveLocalOffer);
        Ok(offer)
    }

    /// Applies a remote offer and produces the answer to send back. A connected
    /// session treats this as a renegotiation round.
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if !matches!(
            self.state,
            NegotiationState::New | NegotiationState::Connected
        ) {
            return Err(NegotiationError::UnexpectedState {
                op: "accept offer",
                state: self.state,
            });
        }

        self.transport
            .set_remote_description(offer)
            .await
            .map_err(NegotiationError::transport("set remote offer"))?;
        self.remote_description_set = true;
        self.transition(NegotiationState::HaveRemoteOffer);
        self.flush_candidates().await?;

        let answer = self
            .transport
            .create_answer()
            .await
            .map_err(NegotiationError::transport("create answer"))?;
        self.transport
            .set_local_description(answer.clone())
            .await
            .map_err(NegotiationError::transport("set local answer"))?;

        self.transition(NegotiationState::Connected);
        Ok(answer)
    }

    pub async fn accept_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<AnswerOutcome, NegotiationError> {
        self.ensure_open()?;
        match self.state {
            NegotiationState::Connected => {
                debug!("Ignoring stale answer from {}", self.key);
                Ok(AnswerOutcome::Ignored)
            }
            NegotiationState::HaveLocalOffer => {
                self.transport
                    .set_remote_description(answer)
                    .await
                    .map_err(NegotiationError::transport("set remote answer"))?;
                self.remote_description_set = true;
                self.flush_candidates().await?;
                self.transition(NegotiationState::Connected);
                Ok(AnswerOutcome::Applied)
            }
            state => Err(NegotiationError::UnexpectedState {
                op: "accept answer",
                state,
            }),
        }
    }

    /// Applies a remote candidate, or buffers it while no remote description
    /// has been set yet.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        self.ensure_open()?;
        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            debug!(
                "Buffered candidate for {} ({} pending)",
                self.key,
                self.pending_candidates.len()
            );
            return Ok(CandidateOutcome::Buffered);
        }

        self.transport
            .add_ice_candidate(candidate)
            .await
            .map_err(NegotiationError::transport("add ICE candidate"))?;
        Ok(CandidateOutcome::Applied)
    }

    async fn flush_candidates(&mut self) -> Result<(), NegotiationError> {
        if self.pending_candidates.is_empty() {
            return Ok(());
        }
        debug!(
            "Flushing {} buffered candidates for {}",
            self.pending_candidates.len(),
            self.key
        );
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.transport
                .add_ice_candidate(candidate)
                .await
                .map_err(NegotiationError::transport("add buffered ICE candidate"))?;
        }
        Ok(())
    }

    /// Substitutes the outgoing video track in place.
    pub async fn replace_video_track(
        &self,
        track: Option<Arc<LocalTrack>>,
    ) -> Result<TrackSwap, NegotiationError> {
        self.ensure_open()?;
        self.transport
            .replace_video_track(track)
            .await
            .map_err(NegotiationError::transport("replace video track"))
    }

    /// Asks for another offer round once the current one has completed.
    pub fn defer_renegotiation(&mut self) {
        debug!("Renegotiation for {} deferred until connected", self.key);
        self.renegotiation_pending = true;
    }

    /// Consumes a deferred renegotiation request if the session is ready for a
    /// new offer.
    pub fn take_renegotiation(&mut self) -> bool {
        if self.state != NegotiationState::Connected || !self.renegotiation_pending {
            return false;
        }
        self.renegotiation_pending = false;
        true
    }

    /// Records a remote track. Returns `true` the first time a track id is seen.
    pub fn add_remote_track(&mut self, info: RemoteTrackInfo) -> bool {
        let stream = self.remote_stream.get_or_insert_with(|| RemoteStream {
            stream_id: info.stream_id.clone(),
            tracks: Vec::new(),
        });
        if stream.tracks.iter().any(|t| t.track_id == info.track_id) {
            return false;
        }
        stream.tracks.push(info);
        true
    }

    pub fn observe_connection_state(&mut self, state: TransportState) {
        if matches!(state, TransportState::Failed | TransportState::Disconnected) {
            warn!("Transport for {} reports {:?}", self.key, state);
        }
        self.connection_state = Some(state);
    }

    pub fn observe_ice_state(&mut self, state: TransportState) {
        self.ice_state = Some(state);
    }

    /// Releases the transport. Safe from any state and on repeated calls; a
    /// pending offer or answer is simply abandoned.
    pub async fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.shutdown(NegotiationState::Closed).await;
    }

    /// Marks the session failed and releases the transport.
    pub async fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.shutdown(NegotiationState::Failed).await;
    }

    async fn shutdown(&mut self, terminal: NegotiationState) {
        self.transition(terminal);
        self.pending_candidates.clear();
        self.remote_stream = None;
        self.renegotiation_pending = false;
        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport for {}: {:#}", self.key, e);
        }
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.state.is_terminal() {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state != next {
            info!(peer = %self.key, from = %self.state, to = %next, "Negotiation state changed");
            self.state = next;
        }
    }
}

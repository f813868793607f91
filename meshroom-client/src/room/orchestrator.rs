use crate::config::ClientConfig;
use crate::error::{MediaError, NegotiationError, RoomError};
use crate::media::{LocalMediaManager, LocalTrack, MediaChange, MediaDevices};
use crate::room::{ChatLog, RoomCommand, RoomEvent, RoomPhase, RoomSnapshot, Roster};
use crate::session::{NegotiationState, PeerRegistry, PeerSession, SessionRole};
use crate::signaling::{ChannelEvent, SignalingContext};
use crate::transport::{PeerKey, TrackSwap, TransportEvent, TransportFactory};
use meshroom_core::utils::{ROOM_FULL_MESSAGE, now_millis};
use meshroom_core::{
    ChatMessage, IceCandidate, Participant, RoomId, SessionDescription, SignalMessage, UserId,
    decode,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

impl LocalIdentity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::random(),
            display_name: display_name.into(),
        }
    }
}

/// The local display capture ended outside our control.
#[derive(Debug)]
struct CaptureEnded(String);

/// Owns every peer session of the room and reconciles them against relay
/// messages, transport events and local media changes. Runs as a single task;
/// each event is handled to completion before the next one.
pub struct SessionOrchestrator<F: TransportFactory, D: MediaDevices> {
    identity: LocalIdentity,
    config: ClientConfig,
    factory: F,
    media: LocalMediaManager<D>,
    registry: PeerRegistry<F::Transport>,
    roster: Roster,
    /// Participants the relay reported as gone; their late offers are dropped.
    departed: HashSet<UserId>,
    chat: ChatLog,
    phase: RoomPhase,
    room_id: Option<RoomId>,
    signaling: SignalingContext,
    signaling_open: bool,
    channel_connected: bool,
    pending_join: Option<oneshot::Sender<Result<(), RoomError>>>,
    join_deadline: Option<Instant>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
    capture_rx: mpsc::Receiver<CaptureEnded>,
    capture_tx: mpsc::Sender<CaptureEnded>,
    events: broadcast::Sender<RoomEvent>,
    snapshot: watch::Sender<RoomSnapshot>,
}

impl<F: TransportFactory, D: MediaDevices> SessionOrchestrator<F, D> {
    pub fn new(
        identity: LocalIdentity,
        config: ClientConfig,
        factory: F,
        devices: D,
        signaling: SignalingContext,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (capture_tx, capture_rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(256);
        let (snapshot, _) = watch::channel(RoomSnapshot::empty(identity.user_id.clone()));

        Self {
            identity,
            config,
            factory,
            media: LocalMediaManager::new(devices),
            registry: PeerRegistry::new(),
            roster: Roster::new(),
            departed: HashSet::new(),
            chat: ChatLog::new(),
            phase: RoomPhase::Idle,
            room_id: None,
            signaling,
            signaling_open: true,
            channel_connected: false,
            pending_join: None,
            join_deadline: None,
            transport_rx,
            transport_tx,
            capture_rx,
            capture_tx,
            events,
            snapshot,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn registry(&self) -> &PeerRegistry<F::Transport> {
        &self.registry
    }

    pub fn media(&self) -> &LocalMediaManager<D> {
        &self.media
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat
    }

    pub fn event_sender(&self) -> broadcast::Sender<RoomEvent> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            room_id: self.room_id.clone(),
            local_user: self.identity.user_id.clone(),
            participants: self.roster.participants(),
            local_media: self.media.state().clone(),
            chat_log: self.chat.entries().to_vec(),
            sessions: self.registry.summaries(),
            channel_connected: self.channel_connected,
        }
    }

    /// Event loop. Ends when the command channel closes, tearing the room down.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<RoomCommand>) {
        info!(user = %self.identity.user_id, "Room orchestrator started");

        loop {
            let deadline = self.join_deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            info!("Command channel closed. Tearing down room.");
                            break;
                        }
                    }
                }

                evt = self.signaling.recv(), if self.signaling_open => {
                    match evt {
                        Some(e) => self.handle_channel_event(e).await,
                        None => {
                            warn!("Signaling context closed");
                            self.signaling_open = false;
                            self.channel_connected = false;
                        }
                    }
                }

                Some(evt) = self.transport_rx.recv() => {
                    self.handle_transport_event(evt).await;
                }

                Some(CaptureEnded(track_id)) = self.capture_rx.recv() => {
                    self.handle_capture_ended(&track_id).await;
                }

                _ = tokio::time::sleep_until(deadline), if self.join_deadline.is_some() => {
                    self.handle_join_timeout().await;
                }
            }

            self.publish();
        }

        self.leave().await;
        self.signaling.dispose();
        self.publish();
        info!("Room orchestrator finished");
    }

    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { room_id, reply } => match self.join(room_id).await {
                Ok(()) => {
                    self.pending_join = Some(reply);
                    self.join_deadline = Some(Instant::now() + self.config.join_timeout);
                }
                Err(e) => {
                    self.publish();
                    let _ = reply.send(Err(e));
                }
            },
            RoomCommand::ToggleVideo { reply } => {
                let result = self.toggle_video().await;
                self.publish();
                let _ = reply.send(result);
            }
            RoomCommand::ToggleAudio { reply } => {
                let result = self.toggle_audio().await;
                self.publish();
                let _ = reply.send(result);
            }
            RoomCommand::ToggleScreenShare { reply } => {
                let result = self.toggle_screen_share().await;
                self.publish();
                let _ = reply.send(result);
            }
            RoomCommand::SendChat { text, reply } => {
                let result = self.send_chat(&text).await;
                let _ = reply.send(result);
            }
            RoomCommand::Leave { reply } => {
                self.leave().await;
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Presentation-layer operations
    // ---------------------------------------------------------------------

    /// Acquires local media and announces the join. Completion is signalled by
    /// `room-joined` or `room-error`.
    pub async fn join(&mut self, room_id: RoomId) -> Result<(), RoomError> {
        match self.phase {
            RoomPhase::Joining | RoomPhase::Joined => return Err(RoomError::AlreadyJoined),
            RoomPhase::RoomFull => return Err(RoomError::RoomFull),
            RoomPhase::Idle | RoomPhase::Left => {}
        }

        if !self.media.is_acquired() {
            if let Err(e) = self.media.acquire(self.config.media).await {
                error!("Media acquisition failed: {}", e);
                return Err(RoomError::MediaAcquisition(e));
            }
            self.emit_local_media();
        }

        info!(room = %room_id, user = %self.identity.user_id, "Joining room");
        self.room_id = Some(room_id.clone());
        self.phase = RoomPhase::Joining;

        let msg = SignalMessage::Join {
            room_id,
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.display_name.clone(),
        };
        if let Err(e) = self.signaling.send(msg).await {
            self.teardown(RoomPhase::Idle).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn toggle_video(&mut self) -> Result<bool, RoomError> {
        self.ensure_media()?;
        let enabled = !self.media.state().video_enabled;
        let change = self.media.set_video_enabled(enabled);
        self.apply_media_change(change).await;
        Ok(enabled)
    }

    pub async fn toggle_audio(&mut self) -> Result<bool, RoomError> {
        self.ensure_media()?;
        let enabled = !self.media.state().audio_enabled;
        let change = self.media.set_audio_enabled(enabled);
        self.apply_media_change(change).await;
        Ok(enabled)
    }

    pub async fn toggle_screen_share(&mut self) -> Result<bool, RoomError> {
        self.ensure_media()?;
        if self.media.state().screen_sharing {
            self.stop_screen_share().await?;
            Ok(false)
        } else {
            self.start_screen_share().await?;
            Ok(true)
        }
    }

    /// Publishes a chat message. The local log is only appended when the relay
    /// echoes it back as `new-message`.
    pub async fn send_chat(&mut self, text: &str) -> Result<(), RoomError> {
        if self.phase != RoomPhase::Joined {
            return Err(RoomError::NotJoined);
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let msg = SignalMessage::SendMessage(ChatMessage {
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.display_name.clone(),
            message: text.to_owned(),
            timestamp: now_millis(),
        });
        self.signaling.send(msg).await?;
        Ok(())
    }

    /// Stops local media and closes every session. Safe to call repeatedly and
    /// in the middle of a negotiation.
    pub async fn leave(&mut self) {
        if matches!(self.phase, RoomPhase::Joining | RoomPhase::Joined) {
            if let Some(room_id) = self.room_id.clone() {
                let msg = SignalMessage::LeaveRoom {
                    room_id,
                    user_id: self.identity.user_id.clone(),
                };
                if let Err(e) = self.signaling.send(msg).await {
                    debug!("Could not announce leave: {}", e);
                }
            }
        }

        let next = if self.phase == RoomPhase::RoomFull {
            RoomPhase::RoomFull
        } else {
            RoomPhase::Left
        };
        let was_active = matches!(self.phase, RoomPhase::Joining | RoomPhase::Joined)
            || self.media.is_acquired()
            || !self.registry.is_empty();
        self.teardown(next).await;
        self.settle_join(Err(RoomError::NotJoined));
        if was_active {
            self.emit(RoomEvent::Left);
        }
    }

    // ---------------------------------------------------------------------
    // Inbound signaling
    // ---------------------------------------------------------------------

    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(text) => self.handle_frame(&text).await,
            ChannelEvent::Connected => {
                self.channel_connected = true;
                info!("Relay connected");
                self.emit(RoomEvent::ChannelStatus { connected: true });
                if self.phase == RoomPhase::Joined {
                    self.rejoin().await;
                }
            }
            ChannelEvent::Disconnected => {
                self.channel_connected = false;
                warn!(
                    sessions = self.registry.len(),
                    "Relay disconnected; keeping established sessions"
                );
                self.emit(RoomEvent::ChannelStatus { connected: false });
            }
        }
    }

    /// Decodes and dispatches one relay frame. Malformed frames are logged and
    /// dropped.
    pub async fn handle_frame(&mut self, text: &str) {
        match decode(text) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => warn!("Dropping signaling frame: {}", e),
        }
    }

    pub async fn dispatch(&mut self, msg: SignalMessage) {
        debug!(kind = msg.kind(), "Inbound signaling message");

        if let Some(to) = msg.recipient() {
            if to != &self.identity.user_id {
                warn!("Dropping {} addressed to {}", msg.kind(), to);
                return;
            }
        }

        match msg {
            SignalMessage::RoomJoined { participants } => self.on_room_joined(participants).await,
            SignalMessage::UserJoined(participant) => self.on_user_joined(participant).await,
            SignalMessage::UserLeft { user_id } => self.remove_participant(&user_id).await,
            SignalMessage::Offer { offer, from, .. } => self.on_offer(from, offer).await,
            SignalMessage::Answer { answer, from, .. } => self.on_answer(from, answer).await,
            SignalMessage::IceCandidate {
                candidate, from, ..
            } => self.on_remote_candidate(from, candidate).await,
            SignalMessage::ToggleVideo { user_id, enabled } => {
                self.update_participant(&user_id, |p| p.video_enabled = enabled)
            }
            SignalMessage::ToggleAudio { user_id, enabled } => {
                self.update_participant(&user_id, |p| p.audio_enabled = enabled)
            }
            SignalMessage::StartScreenShare { user_id } => {
                self.update_participant(&user_id, |p| p.screen_sharing = true)
            }
            SignalMessage::StopScreenShare { user_id } => {
                self.update_participant(&user_id, |p| p.screen_sharing = false)
            }
            SignalMessage::NewMessage(chat) => {
                if matches!(self.phase, RoomPhase::Joined | RoomPhase::Joining) {
                    self.chat.append(chat.clone());
                    self.emit(RoomEvent::ChatAppended(chat));
                }
            }
            SignalMessage::RoomError { message } => self.on_room_error(message).await,
            other @ (SignalMessage::Join { .. }
            | SignalMessage::SendMessage(_)
            | SignalMessage::LeaveRoom { .. }) => {
                warn!("Unexpected {} from relay", other.kind());
            }
        }
    }

    async fn on_room_joined(&mut self, participants: Vec<Participant>) {
        if !matches!(self.phase, RoomPhase::Joining | RoomPhase::Joined) {
            warn!("Ignoring room-joined in phase {:?}", self.phase);
            return;
        }

        let participants: Vec<Participant> = participants
            .into_iter()
            .filter(|p| p.user_id != self.identity.user_id)
            .collect();

        if participants.len() >= self.config.room_capacity {
            warn!(
                existing = participants.len(),
                capacity = self.config.room_capacity,
                "Room already at capacity"
            );
            self.enter_room_full().await;
            return;
        }

        let listed: HashSet<UserId> = participants.iter().map(|p| p.user_id.clone()).collect();
        for stale in self.roster.user_ids() {
            if !listed.contains(&stale) {
                self.remove_participant(&stale).await;
            }
        }

        for participant in &participants {
            self.departed.remove(&participant.user_id);
            self.roster.upsert(participant.clone());
        }

        let rejoin = self.phase == RoomPhase::Joined;
        self.phase = RoomPhase::Joined;
        info!(
            room = ?self.room_id,
            existing = participants.len(),
            rejoin,
            "Joined room"
        );

        // The relay re-announced us, so every listed peer expects a new offer.
        for participant in &participants {
            if rejoin || !self.registry.contains(&participant.user_id) {
                self.start_offering_session(&participant.user_id).await;
            }
        }

        if let Some(room_id) = self.room_id.clone() {
            self.emit(RoomEvent::Joined {
                room_id,
                participants,
            });
        }
        self.settle_join(Ok(()));
    }

    async fn on_user_joined(&mut self, participant: Participant) {
        if participant.user_id == self.identity.user_id {
            return;
        }
        if !matches!(self.phase, RoomPhase::Joining | RoomPhase::Joined) {
            debug!("Ignoring user-joined in phase {:?}", self.phase);
            return;
        }

        let user_id = participant.user_id.clone();
        self.departed.remove(&user_id);
        if self.roster.upsert(participant.clone()) {
            info!(user = %user_id, name = %participant.display_name, "Participant joined");
            self.emit(RoomEvent::ParticipantJoined(participant));
        } else {
            self.emit(RoomEvent::ParticipantUpdated(participant));
        }

        // A re-announced peer starts over with a new connection, so whatever
        // session we held for it is replaced.
        if self.registry.contains(&user_id) {
            info!(user = %user_id, "Participant re-announced; replacing session");
        }
        if let Err(e) = self.start_answering_session(&user_id).await {
            self.notify(format!("Could not prepare connection to {user_id}: {e}"));
        }
    }

    async fn on_offer(&mut self, from: UserId, offer: SessionDescription) {
        if from == self.identity.user_id {
            return;
        }
        if !matches!(self.phase, RoomPhase::Joining | RoomPhase::Joined) {
            debug!("Ignoring offer from {} in phase {:?}", from, self.phase);
            return;
        }
        if self.departed.contains(&from) {
            debug!("Discarding offer from departed participant {}", from);
            return;
        }

        let glare = self
            .registry
            .get(&from)
            .is_some_and(|s| s.state() == NegotiationState::HaveLocalOffer);
        if glare {
            if self.identity.user_id < from {
                info!("Offer collision with {}; keeping local offer", from);
                return;
            }
            info!("Offer collision with {}; yielding to remote offer", from);
            if let Some(mut session) = self.registry.remove(&from) {
                session.close().await;
            }
        }

        if !self.roster.contains(&from) {
            let placeholder = Participant::new(from.clone(), from.to_string());
            self.roster.upsert(placeholder.clone());
            self.emit(RoomEvent::ParticipantJoined(placeholder));
        }

        if !self.registry.contains(&from) {
            if let Err(e) = self.start_answering_session(&from).await {
                self.notify(format!("Could not answer {from}: {e}"));
                return;
            }
        }

        let Some(session) = self.registry.get_mut(&from) else {
            return;
        };
        let renegotiation = session.state() == NegotiationState::Connected;
        match session.accept_offer(offer).await {
            Ok(answer) => {
                debug!(peer = %from, renegotiation, "Sending answer");
                self.send_directed(SignalMessage::Answer {
                    answer,
                    to: from.clone(),
                    from: self.identity.user_id.clone(),
                })
                .await;
                self.renegotiate_if_pending(&from).await;
            }
            Err(e) => self.fail_session(&from, e).await,
        }
    }

    async fn on_answer(&mut self, from: UserId, answer: SessionDescription) {
        let Some(session) = self.registry.get_mut(&from) else {
            debug!("Discarding answer from {} with no session", from);
            return;
        };
        match session.accept_answer(answer).await {
            Ok(_) => self.renegotiate_if_pending(&from).await,
            Err(e) => self.fail_session(&from, e).await,
        }
    }

    async fn on_remote_candidate(&mut self, from: UserId, candidate: IceCandidate) {
        let Some(session) = self.registry.get_mut(&from) else {
            debug!("Discarding ICE candidate from {} with no session", from);
            return;
        };
        if let Err(e) = session.add_remote_candidate(candidate).await {
            self.fail_session(&from, e).await;
        }
    }

    async fn on_room_error(&mut self, message: String) {
        if message.eq_ignore_ascii_case(ROOM_FULL_MESSAGE) {
            self.enter_room_full().await;
            return;
        }

        warn!("Relay error: {}", message);
        if self.phase == RoomPhase::Joining {
            self.teardown(RoomPhase::Idle).await;
            self.settle_join(Err(RoomError::Rejected(message.clone())));
        }
        self.notify(message);
    }

    fn update_participant(&mut self, user_id: &UserId, apply: impl FnOnce(&mut Participant)) {
        if user_id == &self.identity.user_id {
            return;
        }
        let Some(participant) = self.roster.get_mut(user_id) else {
            debug!("Media update for unknown participant {}", user_id);
            return;
        };
        apply(participant);
        let updated = participant.clone();
        self.emit(RoomEvent::ParticipantUpdated(updated));
    }

    /// Drops a participant with its session. Unknown users are a no-op.
    async fn remove_participant(&mut self, user_id: &UserId) {
        if let Some(mut session) = self.registry.remove(user_id) {
            session.close().await;
        }
        if self.roster.remove(user_id).is_some() {
            info!(user = %user_id, "Participant left");
            self.departed.insert(user_id.clone());
            self.emit(RoomEvent::ParticipantLeft(user_id.clone()));
        }
    }

    async fn rejoin(&mut self) {
        let Some(room_id) = self.room_id.clone() else {
            return;
        };
        info!(room = %room_id, "Re-announcing join after reconnect");
        let msg = SignalMessage::Join {
            room_id,
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.display_name.clone(),
        };
        if let Err(e) = self.signaling.send(msg).await {
            warn!("Rejoin failed: {}", e);
        }
    }

    async fn enter_room_full(&mut self) {
        warn!(room = ?self.room_id, "Room is full; abandoning join");
        self.teardown(RoomPhase::RoomFull).await;
        self.emit(RoomEvent::RoomFull);
        self.settle_join(Err(RoomError::RoomFull));
    }

    async fn handle_join_timeout(&mut self) {
        self.join_deadline = None;
        if self.phase != RoomPhase::Joining {
            return;
        }
        warn!(room = ?self.room_id, "Join timed out");
        self.teardown(RoomPhase::Idle).await;
        self.settle_join(Err(RoomError::JoinTimeout));
    }

    // ---------------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------------

    async fn create_session(
        &mut self,
        user_id: &UserId,
        role: SessionRole,
    ) -> Result<(), NegotiationError> {
        let key = self.registry.next_key(user_id);
        let transport = self
            .factory
            .create(key.clone(), self.transport_tx.clone())
            .await
            .map_err(NegotiationError::transport("create transport"))?;

        let mut session = PeerSession::new(key, role, transport);
        if let Err(e) = session
            .attach_local_media(self.media.outgoing_video(), self.media.outgoing_audio())
            .await
        {
            session.fail().await;
            return Err(e);
        }

        if let Some(mut displaced) = self.registry.insert(session) {
            displaced.close().await;
        }
        Ok(())
    }

    async fn start_answering_session(&mut self, user_id: &UserId) -> Result<(), NegotiationError> {
        self.create_session(user_id, SessionRole::Answerer).await?;
        debug!(peer = %user_id, "Awaiting offer");
        Ok(())
    }

    async fn start_offering_session(&mut self, user_id: &UserId) {
        if let Err(e) = self.create_session(user_id, SessionRole::Offerer).await {
            self.notify(format!("Could not connect to {user_id}: {e}"));
            return;
        }
        self.send_offer(user_id).await;
    }

    async fn send_offer(&mut self, user_id: &UserId) {
        let Some(session) = self.registry.get_mut(user_id) else {
            return;
        };
        match session.create_offer().await {
            Ok(offer) => {
                self.send_directed(SignalMessage::Offer {
                    offer,
                    to: user_id.clone(),
                    from: self.identity.user_id.clone(),
                })
                .await;
            }
            Err(e) => self.fail_session(user_id, e).await,
        }
    }

    async fn renegotiate_if_pending(&mut self, user_id: &UserId) {
        if self
            .registry
            .get_mut(user_id)
            .is_some_and(|s| s.take_renegotiation())
        {
            debug!(peer = %user_id, "Sending deferred renegotiation offer");
            self.send_offer(user_id).await;
        }
    }

    async fn fail_session(&mut self, user_id: &UserId, err: NegotiationError) {
        error!(peer = %user_id, "Negotiation failed: {}", err);
        if let Some(mut session) = self.registry.remove(user_id) {
            session.fail().await;
        }
        self.notify(format!("Connection to {user_id} failed"));
    }

    async fn send_directed(&mut self, msg: SignalMessage) {
        if let Err(e) = self.signaling.send(msg).await {
            warn!("Could not relay signaling message: {}", e);
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let key = event.key().clone();
        let Some(session) = self.registry.get_current_mut(&key) else {
            debug!("Dropping transport event for stale session {}", key);
            return;
        };

        match event {
            TransportEvent::CandidateGenerated(_, candidate) => {
                self.send_local_candidate(key, candidate).await;
            }
            TransportEvent::RemoteTrack(_, track) => {
                if session.add_remote_track(track.clone()) {
                    self.emit(RoomEvent::RemoteStream {
                        user_id: key.user_id,
                        track,
                    });
                }
            }
            TransportEvent::ConnectionState(_, state) => session.observe_connection_state(state),
            TransportEvent::IceState(_, state) => session.observe_ice_state(state),
        }
    }

    async fn send_local_candidate(&mut self, key: PeerKey, candidate: IceCandidate) {
        self.send_directed(SignalMessage::IceCandidate {
            candidate,
            to: key.user_id,
            from: self.identity.user_id.clone(),
        })
        .await;
    }

    // ---------------------------------------------------------------------
    // Local media
    // ---------------------------------------------------------------------

    fn ensure_media(&self) -> Result<(), RoomError> {
        if !self.media.is_acquired() {
            return Err(RoomError::NotJoined);
        }
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<(), RoomError> {
        let change = match self.media.start_screen_share().await {
            Ok(change) => change,
            Err(MediaError::ScreenShareDenied) => {
                info!("Screen share cancelled");
                return Err(RoomError::ScreenShareDenied);
            }
            Err(e) => return Err(e.into()),
        };

        if let MediaChange::ScreenShareStarted(screen) = &change {
            self.watch_capture_end(screen);
        }
        self.apply_media_change(change).await;
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), RoomError> {
        match self.media.stop_screen_share().await {
            Ok(change) => {
                self.apply_media_change(change).await;
                Ok(())
            }
            Err(e) => {
                error!("Camera unavailable after screen share: {}", e);
                self.apply_media_change(MediaChange::ScreenShareStopped(None))
                    .await;
                Err(e.into())
            }
        }
    }

    fn watch_capture_end(&self, screen: &Arc<LocalTrack>) {
        let mut ended = screen.subscribe_ended();
        let track_id = screen.id().to_owned();
        let tx = self.capture_tx.clone();

        tokio::spawn(async move {
            let stopped = ended.wait_for(|e| *e).await.is_ok();
            if stopped {
                let _ = tx.send(CaptureEnded(track_id)).await;
            }
        });
    }

    async fn handle_capture_ended(&mut self, track_id: &str) {
        if !self.media.is_current_screen(track_id) {
            return;
        }
        info!("Display capture ended externally; restoring camera");
        if let Err(e) = self.stop_screen_share().await {
            self.notify(format!("Could not restore camera: {e}"));
        }
    }

    /// Pushes a local media change to every live session and broadcasts it.
    /// Does not wait for any peer to acknowledge.
    async fn apply_media_change(&mut self, change: MediaChange) {
        let user_id = self.identity.user_id.clone();
        let broadcast = match change {
            MediaChange::VideoToggled(enabled) => SignalMessage::ToggleVideo { user_id, enabled },
            MediaChange::AudioToggled(enabled) => SignalMessage::ToggleAudio { user_id, enabled },
            MediaChange::ScreenShareStarted(screen) => {
                self.swap_outgoing_video(Some(screen)).await;
                SignalMessage::StartScreenShare { user_id }
            }
            MediaChange::ScreenShareStopped(camera) => {
                self.swap_outgoing_video(camera).await;
                SignalMessage::StopScreenShare { user_id }
            }
        };

        if self.phase == RoomPhase::Joined {
            if let Err(e) = self.signaling.send(broadcast).await {
                warn!("Could not broadcast media change: {}", e);
            }
        }
        self.emit_local_media();
    }

    async fn swap_outgoing_video(&mut self, track: Option<Arc<LocalTrack>>) {
        for user_id in self.registry.user_ids() {
            let Some(session) = self.registry.get_mut(&user_id) else {
                continue;
            };
            match session.replace_video_track(track.clone()).await {
                Ok(TrackSwap::Added) if session.state() == NegotiationState::Connected => {
                    debug!(peer = %user_id, "Video sender added; renegotiating");
                    self.send_offer(&user_id).await;
                }
                Ok(TrackSwap::Added) => session.defer_renegotiation(),
                Ok(_) => {}
                Err(e) => self.fail_session(&user_id, e).await,
            }
        }
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    async fn teardown(&mut self, next: RoomPhase) {
        for mut session in self.registry.drain() {
            session.close().await;
        }
        self.roster.clear();
        self.departed.clear();
        self.media.release();
        self.join_deadline = None;
        if self.phase != next {
            debug!("Room phase {:?} -> {:?}", self.phase, next);
        }
        self.phase = next;
    }

    /// Answers the pending join request, publishing state first so the caller
    /// observes the outcome in the snapshot.
    fn settle_join(&mut self, result: Result<(), RoomError>) {
        self.join_deadline = None;
        if let Some(reply) = self.pending_join.take() {
            self.publish();
            let _ = reply.send(result);
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    fn emit_local_media(&self) {
        let state = self.media.state();
        self.emit(RoomEvent::LocalMediaChanged {
            video_enabled: state.video_enabled,
            audio_enabled: state.audio_enabled,
            screen_sharing: state.screen_sharing,
        });
    }

    fn notify(&self, message: String) {
        self.emit(RoomEvent::Notice(message));
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }
}

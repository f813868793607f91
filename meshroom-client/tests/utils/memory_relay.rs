use async_trait::async_trait;
use meshroom_client::SignalingError;
use meshroom_client::signaling::{ChannelEvent, SignalingChannel, SignalingContext};
use meshroom_core::utils::{ROOM_CAPACITY, ROOM_FULL_MESSAGE};
use meshroom_core::{Participant, RoomId, SignalMessage, UserId, encode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

struct Connection {
    inbound: mpsc::Sender<ChannelEvent>,
    user: Option<(RoomId, UserId)>,
    online: bool,
}

#[derive(Default)]
struct RelayState {
    connections: Vec<Connection>,
    rooms: HashMap<RoomId, Vec<(usize, Participant)>>,
    received: Vec<(usize, SignalMessage)>,
}

impl RelayState {
    fn deliver(&self, conn: usize, msg: &SignalMessage) {
        let Some(connection) = self.connections.get(conn) else {
            return;
        };
        if !connection.online {
            return;
        }
        let frame = encode(msg).unwrap();
        let _ = connection.inbound.try_send(ChannelEvent::Frame(frame));
    }

    fn connection_of(&self, room: &RoomId, user: &UserId) -> Option<usize> {
        self.rooms
            .get(room)?
            .iter()
            .find(|(_, p)| &p.user_id == user)
            .map(|(c, _)| *c)
    }

    fn broadcast(&self, room: &RoomId, except: Option<usize>, msg: &SignalMessage) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for (conn, _) in members {
            if Some(*conn) != except {
                self.deliver(*conn, msg);
            }
        }
    }

    fn room_of(&self, conn: usize) -> Option<(RoomId, UserId)> {
        self.connections.get(conn)?.user.clone()
    }

    fn drop_member(&mut self, conn: usize) {
        let Some((room, user_id)) = self.connections[conn].user.take() else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room) {
            members.retain(|(c, _)| *c != conn);
        }
        self.broadcast(&room, None, &SignalMessage::UserLeft { user_id });
    }

    fn update_member(&mut self, conn: usize, apply: impl FnOnce(&mut Participant)) {
        let Some((room, _)) = self.room_of(conn) else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room) {
            if let Some((_, p)) = members.iter_mut().find(|(c, _)| *c == conn) {
                apply(p);
            }
        }
    }

    fn handle(&mut self, conn: usize, msg: SignalMessage) {
        self.received.push((conn, msg.clone()));

        match msg {
            SignalMessage::Join {
                room_id,
                user_id,
                user_name,
            } => {
                self.drop_member(conn);
                let members = self.rooms.entry(room_id.clone()).or_default();
                if members.len() >= ROOM_CAPACITY {
                    let error = SignalMessage::RoomError {
                        message: ROOM_FULL_MESSAGE.to_owned(),
                    };
                    self.deliver(conn, &error);
                    return;
                }

                let existing: Vec<Participant> = members.iter().map(|(_, p)| p.clone()).collect();
                let participant = Participant::new(user_id.clone(), user_name);
                members.push((conn, participant.clone()));
                self.connections[conn].user = Some((room_id.clone(), user_id));

                self.deliver(
                    conn,
                    &SignalMessage::RoomJoined {
                        participants: existing,
                    },
                );
                self.broadcast(&room_id, Some(conn), &SignalMessage::UserJoined(participant));
            }
            SignalMessage::Offer { ref to, .. }
            | SignalMessage::Answer { ref to, .. }
            | SignalMessage::IceCandidate { ref to, .. } => {
                let Some((room, _)) = self.room_of(conn) else {
                    return;
                };
                if let Some(target) = self.connection_of(&room, to) {
                    self.deliver(target, &msg);
                }
            }
            SignalMessage::ToggleVideo { enabled, .. } => {
                self.update_member(conn, |p| p.video_enabled = enabled);
                self.broadcast_from(conn, &msg);
            }
            SignalMessage::ToggleAudio { enabled, .. } => {
                self.update_member(conn, |p| p.audio_enabled = enabled);
                self.broadcast_from(conn, &msg);
            }
            SignalMessage::StartScreenShare { .. } => {
                self.update_member(conn, |p| p.screen_sharing = true);
                self.broadcast_from(conn, &msg);
            }
            SignalMessage::StopScreenShare { .. } => {
                self.update_member(conn, |p| p.screen_sharing = false);
                self.broadcast_from(conn, &msg);
            }
            SignalMessage::SendMessage(chat) => {
                if let Some((room, _)) = self.room_of(conn) {
                    self.broadcast(&room, None, &SignalMessage::NewMessage(chat));
                }
            }
            SignalMessage::LeaveRoom { .. } => self.drop_member(conn),
            _ => {}
        }
    }

    fn broadcast_from(&self, conn: usize, msg: &SignalMessage) {
        if let Some((room, _)) = self.room_of(conn) {
            self.broadcast(&room, Some(conn), msg);
        }
    }
}

/// In-process relay with the forwarding rules of the production server:
/// capacity check on join, directed routing by `to`, room-wide broadcasts, and
/// chat echoed to every member including the sender.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap()
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> (SignalingContext, RelayHandle) {
        let (tx, rx) = mpsc::channel(1024);
        let _ = tx.try_send(ChannelEvent::Connected);

        let conn = {
            let mut state = self.lock();
            state.connections.push(Connection {
                inbound: tx,
                user: None,
                online: true,
            });
            state.connections.len() - 1
        };

        let handle = RelayHandle {
            relay: self.clone(),
            conn,
        };
        let context = SignalingContext::new(Arc::new(handle.clone()), rx);
        (context, handle)
    }

    pub fn members(&self, room: &RoomId) -> Vec<UserId> {
        self.lock()
            .rooms
            .get(room)
            .map(|m| m.iter().map(|(_, p)| p.user_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Every message the relay received, with the sending connection.
    pub fn received(&self) -> Vec<(usize, SignalMessage)> {
        self.lock().received.clone()
    }

    pub fn received_from(&self, conn: usize) -> Vec<SignalMessage> {
        self.received()
            .into_iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, m)| m)
            .collect()
    }
}

/// One client's side of the relay.
#[derive(Clone)]
pub struct RelayHandle {
    relay: MemoryRelay,
    conn: usize,
}

impl RelayHandle {
    pub fn id(&self) -> usize {
        self.conn
    }

    /// Drops the socket: the relay announces `user-left` and the client sees
    /// the channel go down.
    pub fn disconnect(&self) {
        let mut state = self.relay.lock();
        state.drop_member(self.conn);
        let connection = &mut state.connections[self.conn];
        connection.online = false;
        let _ = connection.inbound.try_send(ChannelEvent::Disconnected);
    }

    pub fn reconnect(&self) {
        let mut state = self.relay.lock();
        let connection = &mut state.connections[self.conn];
        connection.online = true;
        let _ = connection.inbound.try_send(ChannelEvent::Connected);
    }

    /// Pushes a raw frame to the client, bypassing the relay rules.
    pub fn inject_frame(&self, frame: &str) {
        let state = self.relay.lock();
        let _ = state.connections[self.conn]
            .inbound
            .try_send(ChannelEvent::Frame(frame.to_owned()));
    }
}

#[async_trait]
impl SignalingChannel for RelayHandle {
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        let mut state = self.relay.lock();
        if !state.connections[self.conn].online {
            return Err(SignalingError::ChannelClosed);
        }
        state.handle(self.conn, msg);
        Ok(())
    }
}

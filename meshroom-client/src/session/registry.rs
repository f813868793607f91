use crate::session::{PeerSession, SessionSummary};
use crate::transport::{PeerKey, PeerTransport};
use meshroom_core::UserId;
use std::collections::HashMap;

/// Sole owner of the peer sessions of a room, keyed by remote user.
///
/// Callers look sessions up by id for every operation and never keep a handle
/// across events, so a session removed on `user-left` cannot be reached again.
pub struct PeerRegistry<T> {
    sessions: HashMap<UserId, PeerSession<T>>,
    next_epoch: u64,
}

impl<T: PeerTransport> PeerRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_epoch: 1,
        }
    }

    /// Allocates the key for a session about to be created for `user_id`.
    pub fn next_key(&mut self, user_id: &UserId) -> PeerKey {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        PeerKey {
            user_id: user_id.clone(),
            epoch,
        }
    }

    /// Stores `session`, returning the one it displaced for the caller to close.
    pub fn insert(&mut self, session: PeerSession<T>) -> Option<PeerSession<T>> {
        self.sessions.insert(session.user_id().clone(), session)
    }

    pub fn remove(&mut self, user_id: &UserId) -> Option<PeerSession<T>> {
        self.sessions.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&PeerSession<T>> {
        self.sessions.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &UserId) -> Option<&mut PeerSession<T>> {
        self.sessions.get_mut(user_id)
    }

    /// Looks up the session only if it is still the instance `key` refers to.
    pub fn get_current_mut(&mut self, key: &PeerKey) -> Option<&mut PeerSession<T>> {
        self.sessions
            .get_mut(&key.user_id)
            .filter(|s| s.key().epoch == key.epoch)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.sessions.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.sessions.keys().cloned().collect()
    }

    /// Removes every session, for teardown.
    pub fn drain(&mut self) -> Vec<PeerSession<T>> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self.sessions.values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        summaries
    }
}

impl<T: PeerTransport> Default for PeerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

use meshroom_core::{Participant, UserId};
use std::collections::BTreeMap;

/// Remote participants of the room, unique by user id.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    members: BTreeMap<UserId, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a participant. Returns `true` if it was not present.
    pub fn upsert(&mut self, participant: Participant) -> bool {
        self.members
            .insert(participant.user_id.clone(), participant)
            .is_none()
    }

    pub fn remove(&mut self, user_id: &UserId) -> Option<Participant> {
        self.members.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Participant> {
        self.members.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &UserId) -> Option<&mut Participant> {
        self.members.get_mut(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.members.keys().cloned().collect()
    }

    /// Participants ordered by user id.
    pub fn participants(&self) -> Vec<Participant> {
        self.members.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

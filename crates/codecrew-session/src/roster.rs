//! Participant roster derived from signaling events.
//!
//! The tracker owns the roster; everything else reads it. Connection
//! lifecycle (the link table) reacts to what `apply_*` reports, it
//! never mutates membership itself.

use codecrew_protocol::ParticipantInfo;
use uuid::Uuid;

/// Insertion-ordered roster keyed by participant id.
#[derive(Debug)]
pub struct MembershipTracker {
    local_id: Uuid,
    participants: Vec<ParticipantInfo>,
}

impl MembershipTracker {
    pub fn new(local_id: Uuid) -> Self {
        Self {
            local_id,
            participants: Vec::new(),
        }
    }

    /// Apply a `join`. Returns the participant if it was newly added.
    ///
    /// A join echoing our own id is possible from a broadcast relay
    /// and is filtered here; duplicates are ignored.
    pub fn apply_join(&mut self, participant: ParticipantInfo) -> Option<&ParticipantInfo> {
        if participant.user_id == self.local_id {
            tracing::debug!("ignoring join echo for local participant");
            return None;
        }
        if self.contains(participant.user_id) {
            return None;
        }
        self.participants.push(participant);
        self.participants.last()
    }

    /// Apply a `leave`. Returns the removed participant, if present.
    pub fn apply_leave(&mut self, user_id: Uuid) -> Option<ParticipantInfo> {
        let pos = self.participants.iter().position(|p| p.user_id == user_id)?;
        Some(self.participants.remove(pos))
    }

    /// Replace the whole roster atomically from a relay snapshot.
    pub fn replace_all(&mut self, participants: Vec<ParticipantInfo>) {
        self.participants = participants;
    }

    /// Clear the roster, e.g. on channel loss.
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn get(&self, user_id: Uuid) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// All roster entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantInfo> {
        self.participants.iter()
    }

    /// Everyone except the local participant, in insertion order.
    pub fn remote_participants(&self) -> impl Iterator<Item = &ParticipantInfo> {
        let local_id = self.local_id;
        self.participants
            .iter()
            .filter(move |p| p.user_id != local_id)
    }
}

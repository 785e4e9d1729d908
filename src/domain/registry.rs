// Authoritative roster for one session, replaced wholesale by each snapshot frame.

use super::{Participant, ParticipantKey, RegistryError};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    // Snapshot order is kept; ranking ties fall back to it.
    participants: Vec<Participant>,
    index: HashMap<ParticipantKey, usize>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole roster. A snapshot with duplicate keys is rejected and the previous
    /// roster is kept untouched.
    pub fn apply(&mut self, snapshot: Vec<Participant>) -> Result<(), RegistryError> {
        let mut index = HashMap::with_capacity(snapshot.len());
        for (position, participant) in snapshot.iter().enumerate() {
            if index.insert(participant.key.clone(), position).is_some() {
                return Err(RegistryError::DuplicateKey(participant.key.clone()));
            }
        }

        self.participants = snapshot;
        self.index = index;
        Ok(())
    }

    pub fn get(&self, key: &ParticipantKey) -> Option<&Participant> {
        self.index.get(key).map(|&position| &self.participants[position])
    }

    pub fn all(&self) -> &[Participant] {
        &self.participants
    }

    pub fn size(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

// Participant identity and the ranked view derived from it.

use std::fmt;
use std::sync::Arc;

/// Stable identity of a participant within one session.
///
/// Derived from the backing user id for authenticated users, otherwise from the guest identity the
/// server assigned. Display names are never used in its place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantKey(Arc<str>);

impl ParticipantKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn from_user_id(user_id: u64) -> Self {
        Self::new(format!("user:{user_id}"))
    }

    pub fn from_guest_id(guest_id: &str) -> Self {
        Self::new(format!("guest:{guest_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub key: ParticipantKey,
    // Not unique; two participants may share a name.
    pub display_name: String,
    pub display_avatar: Option<String>,
    // Server-computed score, never derived locally.
    pub realtime_score: i64,
    pub connected: bool,
}

impl Participant {
    pub fn new(key: ParticipantKey, display_name: impl Into<String>, realtime_score: i64) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            display_avatar: None,
            realtime_score,
            connected: true,
        }
    }
}

/// A participant with its 1-based position on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedParticipant {
    pub participant: Participant,
    pub realtime_ranking: u32,
}

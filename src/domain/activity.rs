// Activities presented during a session and the terminal summary rows.

use std::fmt;

/// How an activity awards points. Affects presentation only; scores arrive pre-computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointType {
    #[default]
    Standard,
    DoublePoints,
    NoPoints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub activity_id: String,
    pub point_type: PointType,
    /// Local activity sequence at the time this activity became current.
    pub sequence: u64,
}

impl Activity {
    /// Ticket that answers for this activity must present.
    pub fn ticket(&self) -> ActivityTicket {
        ActivityTicket {
            activity_id: self.activity_id.clone(),
            sequence: self.sequence,
        }
    }
}

/// Identifies exactly one activity instance so late answers cannot land on a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityTicket {
    pub activity_id: String,
    pub sequence: u64,
}

impl fmt::Display for ActivityTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.activity_id, self.sequence)
    }
}

/// Final per-participant result delivered once the session is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub participant_key: Option<super::ParticipantKey>,
    pub display_name: String,
    pub final_score: i64,
    pub final_ranking: Option<u32>,
}

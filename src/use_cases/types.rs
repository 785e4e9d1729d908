// Use-case level inputs/outputs for the session protocol.

use crate::domain::{Participant, ParticipantKey, PointType, Summary};

/// Decoded inbound frame, ready for the state machine.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    ParticipantsUpdate(Vec<Participant>),
    SessionStart { session_id: String },
    NextActivity(ActivityAnnouncement),
    SessionEnd { session_id: Option<String> },
    SessionSummary(Vec<Summary>),
    Rejected(ServerRejection),
}

#[derive(Debug, Clone)]
pub struct ActivityAnnouncement {
    pub activity_id: String,
    pub point_type: PointType,
    // Server-side ordering, when the server provides one.
    pub sequence: Option<u64>,
}

/// Outbound action after local validation.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Join {
        display_name: String,
        participant_key: Option<ParticipantKey>,
    },
    Leave,
    Start,
    Advance,
    SubmitActivity {
        session_id: Option<String>,
        activity_id: String,
        answer_content: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStarted {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub session_id: Option<String>,
}

/// The server refused an action (for example a non-host sending `start`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRejection {
    pub message: String,
    pub action: Option<String>,
}

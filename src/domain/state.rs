// Session phase and the observable status surface bound by UIs.

use super::{ActivityTicket, ParticipantKey, SessionError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
    Joining,
    Active,
    // Terminal for the client instance.
    Ended,
    Error,
}

impl SessionPhase {
    /// True once the transport is open, including the terminal phase.
    pub fn is_connected_or_later(self) -> bool {
        matches!(
            self,
            SessionPhase::Connected | SessionPhase::Joining | SessionPhase::Active | SessionPhase::Ended
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Joining => "joining",
            SessionPhase::Active => "active",
            SessionPhase::Ended => "ended",
            SessionPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Human-readable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("Connecting"),
            ConnectionStatus::Connected => f.write_str("Connected"),
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
            ConnectionStatus::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Snapshot of a session client, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub connection: ConnectionStatus,
    pub session_code: String,
    pub session_id: Option<String>,
    pub activity: Option<ActivityTicket>,
    pub participant_key: Option<ParticipantKey>,
    pub participants: usize,
    // Most recent failure not returned to a caller, such as a lost connection or join timeout.
    pub last_error: Option<SessionError>,
}

impl SessionStatus {
    pub fn new(session_code: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            connection: ConnectionStatus::Disconnected,
            session_code: session_code.into(),
            session_id,
            activity: None,
            participant_key: None,
            participants: 0,
            last_error: None,
        }
    }
}

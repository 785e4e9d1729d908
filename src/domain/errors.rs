// Error taxonomy for the session client and its transport.

use super::{ActivityTicket, ParticipantKey, SessionPhase};
use std::fmt;

/// Outbound action names, used to report which call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Join,
    Leave,
    Start,
    Advance,
    SubmitActivity,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Join => "join",
            Action::Leave => "leave",
            Action::Start => "start",
            Action::Advance => "advance",
            Action::SubmitActivity => "submit activity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Send(String),
    Receive(String),
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(err) => write!(f, "connection failed: {err}"),
            TransportError::Send(err) => write!(f, "send failed: {err}"),
            TransportError::Receive(err) => write!(f, "receive failed: {err}"),
            TransportError::Closed => f.write_str("connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Transport(TransportError),
    ConnectTimeout,
    // The connection went away while the call was outstanding.
    Disconnected,
    InvalidState { action: Action, phase: SessionPhase },
    NoActiveActivity,
    StaleActivity {
        submitted: ActivityTicket,
        current: ActivityTicket,
    },
    JoinTimeout,
    SessionEnded,
    Encode(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(err) => write!(f, "transport error: {err}"),
            SessionError::ConnectTimeout => f.write_str("connection attempt timed out"),
            SessionError::Disconnected => f.write_str("disconnected"),
            SessionError::InvalidState { action, phase } => {
                write!(f, "cannot {action} while {phase}")
            }
            SessionError::NoActiveActivity => f.write_str("no activity is currently active"),
            SessionError::StaleActivity { submitted, current } => {
                write!(f, "answer for {submitted} is stale; current activity is {current}")
            }
            SessionError::JoinTimeout => f.write_str("join was not acknowledged in time"),
            SessionError::SessionEnded => f.write_str("session has ended"),
            SessionError::Encode(err) => write!(f, "failed to encode frame: {err}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

/// Roster snapshots that violate registry invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateKey(ParticipantKey),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateKey(key) => write!(f, "duplicate participant key {key}"),
        }
    }
}

impl std::error::Error for RegistryError {}

// Session protocol state machine for one connection.
//
// Synchronous and I/O free: the session loop feeds it decoded frames and validated actions, and
// it answers with what changed. A machine is created once the transport is open and lives until
// the connection closes.

use crate::domain::{
    Action, Activity, ActivityTicket, Participant, ParticipantKey, ParticipantRegistry,
    RegistryError, SessionError, SessionPhase, Summary,
};
use crate::use_cases::{
    ActivityAnnouncement, InboundMessage, OutboundMessage, ServerRejection, SessionEnded,
    SessionStarted,
};

use std::collections::HashSet;
use std::fmt;

/// What an inbound frame changed, in the order handlers should learn about it.
#[derive(Debug, Clone)]
pub enum Applied {
    Roster {
        // Set when this roster confirmed our own join.
        joined: Option<Participant>,
    },
    Started(SessionStarted),
    Activity(Activity),
    Ended {
        ended: SessionEnded,
        // A join was still waiting for confirmation.
        join_abandoned: bool,
    },
    Summary(Vec<Summary>),
    Rejected(ServerRejection),
}

/// Inbound frames the machine refused; they are dropped without touching state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundError {
    Registry(RegistryError),
    Unexpected {
        frame: &'static str,
        phase: SessionPhase,
    },
    DuplicateActivity(String),
    OutOfOrderActivity {
        activity_id: String,
        sequence: u64,
        current: u64,
    },
}

impl fmt::Display for InboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundError::Registry(err) => write!(f, "roster rejected: {err}"),
            InboundError::Unexpected { frame, phase } => {
                write!(f, "unexpected {frame} frame while {phase}")
            }
            InboundError::DuplicateActivity(activity_id) => {
                write!(f, "activity {activity_id} is already current")
            }
            InboundError::OutOfOrderActivity {
                activity_id,
                sequence,
                current,
            } => write!(
                f,
                "activity {activity_id} has sequence {sequence}, not after {current}"
            ),
        }
    }
}

impl std::error::Error for InboundError {}

#[derive(Debug)]
struct PendingJoin {
    display_name: String,
    // Roster members already present when the join was sent.
    known: HashSet<ParticipantKey>,
}

#[derive(Debug)]
pub struct SessionMachine {
    phase: SessionPhase,
    session_id: Option<String>,
    activity: Option<Activity>,
    activity_sequence: u64,
    registry: ParticipantRegistry,
    own_key: Option<ParticipantKey>,
    pending_join: Option<PendingJoin>,
}

impl SessionMachine {
    /// Machine for a freshly opened transport. Hosts pass the session id the REST call returned;
    /// authenticated users pass their participant key.
    pub fn connected(session_id: Option<String>, own_key: Option<ParticipantKey>) -> Self {
        Self {
            phase: SessionPhase::Connected,
            session_id,
            activity: None,
            activity_sequence: 0,
            registry: ParticipantRegistry::new(),
            own_key,
            pending_join: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn current_activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    pub fn activity_sequence(&self) -> u64 {
        self.activity_sequence
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn own_key(&self) -> Option<&ParticipantKey> {
        self.own_key.as_ref()
    }

    pub fn is_joining(&self) -> bool {
        self.pending_join.is_some()
    }

    pub fn prepare_join(&mut self, display_name: &str) -> Result<OutboundMessage, SessionError> {
        if self.phase != SessionPhase::Connected {
            return Err(SessionError::InvalidState {
                action: Action::Join,
                phase: self.phase,
            });
        }

        self.phase = SessionPhase::Joining;
        self.pending_join = Some(PendingJoin {
            display_name: display_name.to_owned(),
            known: self
                .registry
                .all()
                .iter()
                .map(|participant| participant.key.clone())
                .collect(),
        });

        Ok(OutboundMessage::Join {
            display_name: display_name.to_owned(),
            participant_key: self.own_key.clone(),
        })
    }

    /// The join was not confirmed in time (or could not be sent). The connection stays usable.
    pub fn abandon_join(&mut self) {
        self.pending_join = None;
        if self.phase == SessionPhase::Joining {
            self.phase = SessionPhase::Connected;
        }
    }

    /// `leave` is only worth sending once we asked to be part of the session.
    pub fn prepare_leave(&self) -> Option<OutboundMessage> {
        matches!(self.phase, SessionPhase::Joining | SessionPhase::Active)
            .then_some(OutboundMessage::Leave)
    }

    pub fn prepare_start(&self) -> Result<OutboundMessage, SessionError> {
        match self.phase {
            SessionPhase::Connected | SessionPhase::Joining | SessionPhase::Active => {
                Ok(OutboundMessage::Start)
            }
            SessionPhase::Ended => Err(SessionError::SessionEnded),
            phase => Err(SessionError::InvalidState {
                action: Action::Start,
                phase,
            }),
        }
    }

    pub fn prepare_advance(&self) -> Result<OutboundMessage, SessionError> {
        match self.phase {
            SessionPhase::Active => Ok(OutboundMessage::Advance),
            SessionPhase::Ended => Err(SessionError::SessionEnded),
            phase => Err(SessionError::InvalidState {
                action: Action::Advance,
                phase,
            }),
        }
    }

    pub fn prepare_submit(
        &self,
        ticket: &ActivityTicket,
        answer_content: serde_json::Value,
    ) -> Result<OutboundMessage, SessionError> {
        let current = self.activity.as_ref().map(Activity::ticket);
        check_submission(self.phase, current.as_ref(), ticket)?;

        Ok(OutboundMessage::SubmitActivity {
            session_id: self.session_id.clone(),
            activity_id: ticket.activity_id.clone(),
            answer_content,
        })
    }

    pub fn apply(&mut self, message: InboundMessage) -> Result<Applied, InboundError> {
        match message {
            InboundMessage::ParticipantsUpdate(snapshot) => self.apply_roster(snapshot),
            InboundMessage::SessionStart { session_id } => {
                self.expect_live("sessionStart")?;
                self.session_id = Some(session_id.clone());
                self.phase = SessionPhase::Active;
                Ok(Applied::Started(SessionStarted { session_id }))
            }
            InboundMessage::NextActivity(announcement) => self.apply_activity(announcement),
            InboundMessage::SessionEnd { session_id } => {
                self.expect_live("sessionEnd")?;
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                self.phase = SessionPhase::Ended;
                self.activity = None;
                let join_abandoned = self.pending_join.take().is_some();
                Ok(Applied::Ended {
                    ended: SessionEnded {
                        session_id: self.session_id.clone(),
                    },
                    join_abandoned,
                })
            }
            InboundMessage::SessionSummary(rows) => Ok(Applied::Summary(rows)),
            InboundMessage::Rejected(rejection) => Ok(Applied::Rejected(rejection)),
        }
    }

    /// Transport is gone. `Ended` survives; everything else drops to `Disconnected` or `Error`.
    pub fn close(&mut self, failed: bool) {
        self.pending_join = None;
        self.activity = None;
        if self.phase != SessionPhase::Ended {
            self.phase = if failed {
                SessionPhase::Error
            } else {
                SessionPhase::Disconnected
            };
        }
    }

    fn expect_live(&self, frame: &'static str) -> Result<(), InboundError> {
        match self.phase {
            SessionPhase::Connected | SessionPhase::Joining | SessionPhase::Active => Ok(()),
            phase => Err(InboundError::Unexpected { frame, phase }),
        }
    }

    fn apply_roster(&mut self, snapshot: Vec<Participant>) -> Result<Applied, InboundError> {
        self.expect_live("participantsUpdate")?;
        self.registry.apply(snapshot).map_err(InboundError::Registry)?;

        if self.phase == SessionPhase::Joining {
            self.phase = SessionPhase::Active;
        }

        Ok(Applied::Roster {
            joined: self.confirm_join(),
        })
    }

    fn confirm_join(&mut self) -> Option<Participant> {
        let pending = self.pending_join.as_ref()?;
        let me = match &self.own_key {
            Some(key) => self.registry.get(key),
            // Guests only know their name until the server shows the key it assigned.
            None => self.registry.all().iter().find(|participant| {
                participant.display_name == pending.display_name
                    && !pending.known.contains(&participant.key)
            }),
        }?
        .clone();

        self.pending_join = None;
        self.own_key = Some(me.key.clone());
        Some(me)
    }

    fn apply_activity(
        &mut self,
        announcement: ActivityAnnouncement,
    ) -> Result<Applied, InboundError> {
        if self.phase != SessionPhase::Active {
            return Err(InboundError::Unexpected {
                frame: "nextActivity",
                phase: self.phase,
            });
        }

        let sequence = match announcement.sequence {
            Some(sequence) if self.activity.is_some() && sequence <= self.activity_sequence => {
                return Err(InboundError::OutOfOrderActivity {
                    activity_id: announcement.activity_id,
                    sequence,
                    current: self.activity_sequence,
                });
            }
            Some(sequence) => sequence,
            None => {
                let repeated = self
                    .activity
                    .as_ref()
                    .is_some_and(|current| current.activity_id == announcement.activity_id);
                if repeated {
                    return Err(InboundError::DuplicateActivity(announcement.activity_id));
                }
                self.activity_sequence + 1
            }
        };

        let activity = Activity {
            activity_id: announcement.activity_id,
            point_type: announcement.point_type,
            sequence,
        };
        self.activity_sequence = sequence;
        self.activity = Some(activity.clone());
        Ok(Applied::Activity(activity))
    }
}

/// Local gate for answers: they must target the activity that is current right now.
pub fn check_submission(
    phase: SessionPhase,
    current: Option<&ActivityTicket>,
    submitted: &ActivityTicket,
) -> Result<(), SessionError> {
    match phase {
        SessionPhase::Active => {}
        SessionPhase::Ended => return Err(SessionError::SessionEnded),
        phase => {
            return Err(SessionError::InvalidState {
                action: Action::SubmitActivity,
                phase,
            });
        }
    }

    let Some(current) = current else {
        return Err(SessionError::NoActiveActivity);
    };
    if current != submitted {
        return Err(SessionError::StaleActivity {
            submitted: submitted.clone(),
            current: current.clone(),
        });
    }
    Ok(())
}

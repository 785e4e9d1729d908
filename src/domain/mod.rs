// Domain layer: session roster, ranking rules, and the ports the protocol client drives.

pub mod activity;
pub mod errors;
pub mod participant;
pub mod ports;
pub mod ranking;
pub mod registry;
pub mod state;

pub use activity::{Activity, ActivityTicket, PointType, Summary};
pub use errors::{Action, RegistryError, SessionError, TransportError};
pub use participant::{Participant, ParticipantKey, RankedParticipant};
pub use ports::{Connector, Transport};
pub use ranking::{rank, rank_deltas};
pub use registry::ParticipantRegistry;
pub use state::{ConnectionStatus, SessionPhase, SessionStatus};

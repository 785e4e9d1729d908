pub mod domain;
pub mod frameworks;
pub mod interface_adapters;
pub mod use_cases;

pub use domain::{
    Activity, ActivityTicket, ConnectionStatus, Participant, ParticipantKey, PointType,
    RankedParticipant, SessionError, SessionPhase, SessionStatus, Summary, rank, rank_deltas,
};
pub use frameworks::runtime::{RunOptions, run, run_with_config};
pub use interface_adapters::clients::{CreatedSession, SessionApiClient, SessionApiError};
pub use interface_adapters::net::{ClientSettings, SessionClient, SessionEndpoint, WsConnector};
pub use use_cases::{Leaderboard, LeaderboardBroadcaster, SessionEvents, Subscription};

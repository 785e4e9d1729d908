// Use cases layer: session state machine, event fan-out, and the leaderboard hub.

pub mod broadcaster;
pub mod events;
pub mod machine;
pub mod types;

pub use broadcaster::{Leaderboard, LeaderboardBroadcaster, LeaderboardPublisher};
pub use events::{EventHub, SessionEvents, Subscription};
pub use machine::{check_submission, Applied, InboundError, SessionMachine};
pub use types::{
    ActivityAnnouncement, InboundMessage, OutboundMessage, ServerRejection, SessionEnded,
    SessionStarted,
};

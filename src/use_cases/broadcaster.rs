// Shared leaderboard hub: one ranking computation fanned out to many observers.
//
// Updates are throttled against the last *emitted* leaderboard. Inside the window only the newest
// update is kept and emitted when the window closes. The first update after a new subscriber
// arrives goes out immediately so late-mounted observers are not left empty.

use crate::domain::{ParticipantKey, RankedParticipant, rank_deltas};
use crate::use_cases::events::{EventHub, Subscription, lock};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(300);

/// Full ranked list delivered to every observer on each emission.
#[derive(Debug, Clone)]
pub struct Leaderboard {
    pub session_code: Arc<str>,
    pub ranked: Vec<RankedParticipant>,
    // Relative to the previous emission for the same session.
    deltas: HashMap<ParticipantKey, i64>,
}

impl Leaderboard {
    pub fn delta(&self, key: &ParticipantKey) -> Option<i64> {
        self.deltas.get(key).copied()
    }

    pub fn standings(&self) -> impl Iterator<Item = (&RankedParticipant, Option<i64>)> {
        self.ranked
            .iter()
            .map(|ranked| (ranked, self.delta(&ranked.participant.key)))
    }

    pub fn ranking_of(&self, key: &ParticipantKey) -> Option<u32> {
        self.ranked
            .iter()
            .find(|ranked| &ranked.participant.key == key)
            .map(|ranked| ranked.realtime_ranking)
    }
}

#[derive(Default)]
struct Throttle {
    // Only the owning publisher may feed the hub.
    owner: Option<u64>,
    next_publisher: u64,
    last_emit: Option<Instant>,
    latest: Option<Arc<Leaderboard>>,
    pending: Option<(Arc<str>, Vec<RankedParticipant>)>,
    timer: Option<JoinHandle<()>>,
    emit_next_immediately: bool,
}

impl Throttle {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn emit(
        &mut self,
        session_code: Arc<str>,
        ranked: Vec<RankedParticipant>,
        now: Instant,
    ) -> Arc<Leaderboard> {
        let deltas = match &self.latest {
            Some(previous) if previous.session_code == session_code => {
                rank_deltas(&previous.ranked, &ranked)
            }
            _ => HashMap::new(),
        };

        let board = Arc::new(Leaderboard {
            session_code,
            ranked,
            deltas,
        });
        self.latest = Some(Arc::clone(&board));
        self.last_emit = Some(now);
        self.emit_next_immediately = false;
        board
    }
}

struct Inner {
    window: Duration,
    observers: EventHub<Arc<Leaderboard>>,
    throttle: Mutex<Throttle>,
}

impl Inner {
    fn publish(
        self: &Arc<Self>,
        publisher: u64,
        session_code: &Arc<str>,
        ranked: Vec<RankedParticipant>,
    ) {
        let board = {
            let mut throttle = lock(&self.throttle);
            if throttle.owner != Some(publisher) {
                debug!(publisher, "dropping update from detached leaderboard publisher");
                return;
            }

            let now = Instant::now();
            let window_elapsed = throttle
                .last_emit
                .is_none_or(|at| now.duration_since(at) >= self.window);

            if throttle.emit_next_immediately || window_elapsed {
                throttle.cancel_timer();
                throttle.pending = None;
                throttle.emit(Arc::clone(session_code), ranked, now)
            } else {
                throttle.pending = Some((Arc::clone(session_code), ranked));
                if throttle.timer.is_none() {
                    let deadline = throttle.last_emit.map_or(now, |at| at + self.window);
                    let hub = Arc::downgrade(self);
                    throttle.timer = Some(tokio::spawn(flush_at(hub, deadline)));
                }
                return;
            }
        };

        self.observers.dispatch(&board);
    }

    fn flush(&self, publisher: Option<u64>) {
        let board = {
            let mut throttle = lock(&self.throttle);
            if publisher.is_some() && throttle.owner != publisher {
                return;
            }
            throttle.cancel_timer();
            let Some((session_code, ranked)) = throttle.pending.take() else {
                return;
            };
            throttle.emit(session_code, ranked, Instant::now())
        };

        self.observers.dispatch(&board);
    }

    fn detach(&self, publisher: u64) {
        let mut throttle = lock(&self.throttle);
        if throttle.owner == Some(publisher) {
            throttle.owner = None;
            throttle.pending = None;
            throttle.cancel_timer();
        }
    }
}

async fn flush_at(hub: Weak<Inner>, deadline: Instant) {
    sleep_until(deadline).await;
    if let Some(hub) = hub.upgrade() {
        hub.flush(None);
    }
}

/// Process-wide leaderboard hub, passed explicitly to whoever composes the session view.
///
/// Emissions that wait for the throttle window are scheduled on the current Tokio runtime, so
/// publishing must happen inside one.
#[derive(Clone)]
pub struct LeaderboardBroadcaster {
    inner: Arc<Inner>,
}

impl LeaderboardBroadcaster {
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                observers: EventHub::new(),
                throttle: Mutex::new(Throttle::default()),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Leaderboard) + Send + Sync + 'static,
    {
        let subscription = self
            .inner
            .observers
            .subscribe(move |board: &Arc<Leaderboard>| handler(board.as_ref()));
        lock(&self.inner.throttle).emit_next_immediately = true;
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Registers a new publisher and retires the previous one, whose later updates are ignored.
    pub fn attach(&self, session_code: &str) -> LeaderboardPublisher {
        let mut throttle = lock(&self.inner.throttle);
        let id = throttle.next_publisher;
        throttle.next_publisher += 1;
        if let Some(previous) = throttle.owner.replace(id) {
            debug!(previous, publisher = id, "leaderboard publisher superseded");
        }
        throttle.pending = None;
        throttle.cancel_timer();

        LeaderboardPublisher {
            id,
            session_code: Arc::from(session_code),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Last emitted leaderboard. Survives disconnects until [`Self::clear`].
    pub fn latest(&self) -> Option<Arc<Leaderboard>> {
        lock(&self.inner.throttle).latest.clone()
    }

    pub fn clear(&self) {
        lock(&self.inner.throttle).latest = None;
    }
}

impl Default for LeaderboardBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW)
    }
}

/// Publishing handle owned by one session client. Dropping it detaches from the hub and discards
/// any update still waiting for the throttle window.
pub struct LeaderboardPublisher {
    id: u64,
    session_code: Arc<str>,
    inner: Arc<Inner>,
}

impl LeaderboardPublisher {
    pub fn publish(&self, ranked: Vec<RankedParticipant>) {
        self.inner.publish(self.id, &self.session_code, ranked);
    }

    /// Emits the pending update right away (if any), then detaches.
    pub fn finish(self) {
        self.inner.flush(Some(self.id));
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.inner.throttle).owner == Some(self.id)
    }
}

impl Drop for LeaderboardPublisher {
    fn drop(&mut self) {
        self.inner.detach(self.id);
    }
}

// Session protocol client: one spawned task per connection owns the transport and the state
// machine; the public handle talks to it over a command channel.

use crate::domain::{
    Action, Activity, ActivityTicket, ConnectionStatus, Connector, Participant, ParticipantKey,
    SessionError, SessionPhase, SessionStatus, Transport, TransportError, rank,
};
use crate::interface_adapters::net::SessionEndpoint;
use crate::interface_adapters::protocol;
use crate::use_cases::events::lock;
use crate::use_cases::{
    Applied, LeaderboardBroadcaster, LeaderboardPublisher, OutboundMessage, SessionEvents,
    SessionMachine, check_submission,
};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{Instrument, debug, field, info, info_span, warn};

const LOG_THROTTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    // How long a join waits for a roster that contains us.
    pub join_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Join {
        display_name: String,
        reply: Reply<Participant>,
    },
    Start {
        reply: Reply<()>,
    },
    Advance {
        reply: Reply<()>,
    },
    Submit {
        ticket: ActivityTicket,
        answer_content: serde_json::Value,
        reply: Reply<()>,
    },
    Shutdown {
        leave: bool,
        done: oneshot::Sender<()>,
    },
}

impl Command {
    fn reject(self) {
        match self {
            Command::Join { reply, .. } => {
                let _ = reply.send(Err(SessionError::Disconnected));
            }
            Command::Start { reply } | Command::Advance { reply } | Command::Submit { reply, .. } => {
                let _ = reply.send(Err(SessionError::Disconnected));
            }
            Command::Shutdown { done, .. } => {
                let _ = done.send(());
            }
        }
    }
}

struct Link {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

enum LinkSlot {
    Idle,
    // A connect attempt is in flight; notifying cancels it.
    Connecting(Arc<Notify>),
    Live(Link),
}

/// Client side of one live session.
///
/// Handlers registered on [`SessionClient::events`] run on the session task, after the state
/// they describe has been applied. Leaderboard updates go to the injected broadcaster.
pub struct SessionClient<C: Connector> {
    connector: C,
    endpoint: SessionEndpoint,
    settings: ClientSettings,
    participant_key: Option<ParticipantKey>,
    events: SessionEvents,
    broadcaster: Option<LeaderboardBroadcaster>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    link: Mutex<LinkSlot>,
}

impl<C: Connector> SessionClient<C> {
    pub fn new(connector: C, endpoint: SessionEndpoint, settings: ClientSettings) -> Self {
        let status = SessionStatus::new(
            endpoint.session_code(),
            endpoint.session_id().map(str::to_owned),
        );
        let (status_tx, _status_rx) = watch::channel(status);
        Self {
            connector,
            endpoint,
            settings,
            participant_key: None,
            events: SessionEvents::default(),
            broadcaster: None,
            status_tx: Arc::new(status_tx),
            link: Mutex::new(LinkSlot::Idle),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: LeaderboardBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Authenticated participants know their key up front; guests learn it on join.
    pub fn with_participant_key(mut self, key: ParticipantKey) -> Self {
        self.status_tx
            .send_modify(|status| status.participant_key = Some(key.clone()));
        self.participant_key = Some(key);
        self
    }

    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.endpoint
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut status_rx = self.status_tx.subscribe();
        let Some(mut attempt) = self.claim_connect() else {
            // Someone else is connecting (or already did); share their outcome.
            let status = status_rx
                .wait_for(|status| status.phase != SessionPhase::Connecting)
                .await
                .map_err(|_| SessionError::Disconnected)?;
            return match (&status.phase, &status.last_error) {
                (phase, _) if phase.is_connected_or_later() => Ok(()),
                (SessionPhase::Error, Some(err)) => Err(err.clone()),
                _ => Err(SessionError::Disconnected),
            };
        };

        self.events.status.dispatch(&ConnectionStatus::Connecting);
        let span = info_span!(
            "session",
            session_code = %self.endpoint.session_code(),
            participant_key = field::Empty
        );
        if let Some(key) = &self.participant_key {
            span.record("participant_key", field::display(key));
        }

        let url = self.endpoint.url();
        info!(parent: &span, url, "connecting");
        let cancel = attempt.cancel.clone();
        let mut transport = tokio::select! {
            biased;
            () = cancel.notified() => {
                info!(parent: &span, "connect cancelled");
                attempt.settled = true;
                return Err(SessionError::Disconnected);
            }
            result = timeout(self.settings.connect_timeout, self.connector.connect(url)) => match result {
                Ok(Ok(transport)) => transport,
                Ok(Err(err)) => {
                    warn!(parent: &span, error = %err, "connect failed");
                    return Err(attempt.fail(SessionError::Transport(err)));
                }
                Err(_) => {
                    warn!(
                        parent: &span,
                        timeout_ms = self.settings.connect_timeout.as_millis() as u64,
                        "connect timed out"
                    );
                    return Err(attempt.fail(SessionError::ConnectTimeout));
                }
            },
        };

        // The link goes in before anyone can observe `Connected`, so early commands queue up.
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let installed = attempt.install(Link {
            commands: commands_tx.clone(),
            task: None,
        });
        if !installed {
            info!(parent: &span, "connect cancelled");
            if let Err(err) = transport.close().await {
                debug!(parent: &span, error = %err, "transport close failed");
            }
            return Err(SessionError::Disconnected);
        }

        let machine = SessionMachine::connected(
            self.endpoint.session_id().map(str::to_owned),
            self.participant_key.clone(),
        );
        self.status_tx.send_modify(|status| {
            status.connection = ConnectionStatus::Connected;
            status.last_error = None;
            sync_status(status, &machine);
        });
        info!(parent: &span, "connected");
        self.events.status.dispatch(&ConnectionStatus::Connected);

        let session = SessionLoop {
            transport,
            commands: commands_rx,
            machine,
            events: self.events.clone(),
            publisher: self
                .broadcaster
                .as_ref()
                .map(|broadcaster| broadcaster.attach(self.endpoint.session_code())),
            status_tx: self.status_tx.clone(),
            join_timeout: self.settings.join_timeout,
            pending_join: None,
            stats: LinkStats::default(),
            last_invalid_log: None,
        };
        let task = tokio::spawn(session.run().instrument(span));
        // A teardown may already have taken the link; the task then drains its shutdown command.
        if let LinkSlot::Live(link) = &mut *lock(&self.link)
            && link.commands.same_channel(&commands_tx)
        {
            link.task = Some(task);
        }
        Ok(())
    }

    /// Resolves with our own participant once a roster containing us arrives.
    pub async fn join_session(&self, display_name: &str) -> Result<Participant, SessionError> {
        self.precheck(Action::Join)?;
        let display_name = display_name.to_owned();
        self.request(|reply| Command::Join {
            display_name,
            reply,
        })
        .await
    }

    pub async fn start_session(&self) -> Result<(), SessionError> {
        self.precheck(Action::Start)?;
        self.request(|reply| Command::Start { reply }).await
    }

    /// Host asks the server to move to the next activity; it answers with `nextActivity`.
    pub async fn advance_activity(&self) -> Result<(), SessionError> {
        self.precheck(Action::Advance)?;
        self.request(|reply| Command::Advance { reply }).await
    }

    pub async fn submit_activity(
        &self,
        ticket: &ActivityTicket,
        answer_content: serde_json::Value,
    ) -> Result<(), SessionError> {
        {
            let status = self.status_tx.borrow();
            check_submission(status.phase, status.activity.as_ref(), ticket)?;
        }
        let ticket = ticket.clone();
        self.request(|reply| Command::Submit {
            ticket,
            answer_content,
            reply,
        })
        .await
    }

    /// Sends `leave` when we are part of the session, then tears down. Never fails.
    pub async fn leave_session(&self) -> Result<(), SessionError> {
        self.teardown(true).await
    }

    /// Tears down without telling the server.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.teardown(false).await
    }

    fn precheck(&self, action: Action) -> Result<(), SessionError> {
        match self.status_tx.borrow().phase {
            SessionPhase::Ended => Err(SessionError::SessionEnded),
            phase if phase.is_connected_or_later() => Ok(()),
            phase => Err(SessionError::InvalidState { action, phase }),
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let slot = lock(&self.link);
            let LinkSlot::Live(link) = &*slot else {
                return Err(SessionError::Disconnected);
            };
            link.commands
                .send(command(reply_tx))
                .map_err(|_| SessionError::Disconnected)?;
        }
        reply_rx.await.map_err(|_| SessionError::Disconnected)?
    }

    async fn teardown(&self, leave: bool) -> Result<(), SessionError> {
        let link = {
            let mut slot = lock(&self.link);
            match std::mem::replace(&mut *slot, LinkSlot::Idle) {
                LinkSlot::Live(link) => link,
                LinkSlot::Connecting(cancel) => {
                    cancel.notify_one();
                    self.status_tx.send_modify(|status| {
                        status.phase = SessionPhase::Disconnected;
                        status.connection = ConnectionStatus::Disconnected;
                    });
                    drop(slot);
                    info!(session_code = %self.endpoint.session_code(), "cancelling connect");
                    self.events.status.dispatch(&ConnectionStatus::Disconnected);
                    return Ok(());
                }
                LinkSlot::Idle => return Ok(()),
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        if link
            .commands
            .send(Command::Shutdown {
                leave,
                done: done_tx,
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
        if let Some(task) = link.task
            && let Err(err) = task.await
        {
            warn!(error = %err, "session task did not finish cleanly");
        }
        Ok(())
    }

    /// Moves `Disconnected`/`Error` to `Connecting`; `None` when another attempt owns the phase.
    fn claim_connect(&self) -> Option<ConnectAttempt<'_, C>> {
        let mut slot = lock(&self.link);
        let claimed = self.status_tx.send_if_modified(|status| match status.phase {
            SessionPhase::Disconnected | SessionPhase::Error => {
                status.phase = SessionPhase::Connecting;
                status.connection = ConnectionStatus::Connecting;
                true
            }
            _ => false,
        });
        if !claimed {
            return None;
        }

        let cancel = Arc::new(Notify::new());
        if let LinkSlot::Live(stale) =
            std::mem::replace(&mut *slot, LinkSlot::Connecting(cancel.clone()))
            && let Some(task) = stale.task
        {
            task.abort();
        }
        Some(ConnectAttempt {
            client: self,
            cancel,
            settled: false,
        })
    }
}

impl<C: Connector> Drop for SessionClient<C> {
    fn drop(&mut self) {
        if let LinkSlot::Live(link) = std::mem::replace(&mut *lock(&self.link), LinkSlot::Idle)
            && let Some(task) = link.task
        {
            task.abort();
        }
    }
}

/// Ownership of the `Connecting` phase. Dropped unsettled (the caller gave up on `connect`),
/// it hands the phase back as `Disconnected`.
struct ConnectAttempt<'a, C: Connector> {
    client: &'a SessionClient<C>,
    cancel: Arc<Notify>,
    settled: bool,
}

impl<C: Connector> ConnectAttempt<'_, C> {
    /// False when a teardown cancelled the attempt first.
    fn install(&mut self, link: Link) -> bool {
        self.settled = true;
        let mut slot = lock(&self.client.link);
        match &*slot {
            LinkSlot::Connecting(cancel) if Arc::ptr_eq(cancel, &self.cancel) => {
                *slot = LinkSlot::Live(link);
                true
            }
            _ => false,
        }
    }

    fn fail(mut self, err: SessionError) -> SessionError {
        self.settled = true;
        if !self.release() {
            return SessionError::Disconnected;
        }
        let connection = ConnectionStatus::Failed(err.to_string());
        self.client.status_tx.send_modify(|status| {
            status.phase = SessionPhase::Error;
            status.connection = connection.clone();
            status.last_error = Some(err.clone());
        });
        self.client.events.status.dispatch(&connection);
        err
    }

    fn release(&self) -> bool {
        let mut slot = lock(&self.client.link);
        match &*slot {
            LinkSlot::Connecting(cancel) if Arc::ptr_eq(cancel, &self.cancel) => {
                *slot = LinkSlot::Idle;
                true
            }
            _ => false,
        }
    }
}

impl<C: Connector> Drop for ConnectAttempt<'_, C> {
    fn drop(&mut self) {
        if self.settled || !self.release() {
            return;
        }
        warn!(
            session_code = %self.client.endpoint.session_code(),
            "connect abandoned before it finished"
        );
        self.client.status_tx.send_modify(|status| {
            status.phase = SessionPhase::Disconnected;
            status.connection = ConnectionStatus::Disconnected;
        });
        self.client
            .events
            .status
            .dispatch(&ConnectionStatus::Disconnected);
    }
}

fn sync_status(status: &mut SessionStatus, machine: &SessionMachine) {
    status.phase = machine.phase();
    status.session_id = machine.session_id().map(str::to_owned);
    status.activity = machine.current_activity().map(Activity::ticket);
    status.participant_key = machine.own_key().cloned();
    status.participants = machine.registry().size();
}

fn should_log(last: &mut Option<std::time::Instant>) -> bool {
    if last.is_none_or(|at| at.elapsed() >= LOG_THROTTLE) {
        *last = Some(std::time::Instant::now());
        true
    } else {
        false
    }
}

async fn join_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct PendingJoin {
    reply: Reply<Participant>,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct LinkStats {
    frames_in: u64,
    frames_out: u64,
    invalid_frames: u64,
    ignored_frames: u64,
}

enum Exit {
    Shutdown {
        leave: bool,
        done: oneshot::Sender<()>,
    },
    // Peer closed the connection.
    Closed,
    Failed(TransportError),
    // The client handle went away.
    Abandoned,
}

struct SessionLoop<T: Transport> {
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    machine: SessionMachine,
    events: SessionEvents,
    publisher: Option<LeaderboardPublisher>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    join_timeout: Duration,
    pending_join: Option<PendingJoin>,
    stats: LinkStats,
    last_invalid_log: Option<std::time::Instant>,
}

impl<T: Transport> SessionLoop<T> {
    async fn run(mut self) {
        let exit = loop {
            let deadline = self.pending_join.as_ref().map(|join| join.deadline);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { leave, done }) => break Exit::Shutdown { leave, done },
                    Some(command) => {
                        if let Err(err) = self.handle_command(command).await {
                            break Exit::Failed(err);
                        }
                    }
                    None => break Exit::Abandoned,
                },
                frame = self.transport.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(err)) => break Exit::Failed(err),
                    None => break Exit::Closed,
                },
                () = join_deadline(deadline) => self.expire_join(),
            }
        };
        self.shutdown(exit).await;
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), TransportError> {
        match command {
            Command::Join {
                display_name,
                reply,
            } => {
                let message = match self.machine.prepare_join(&display_name) {
                    Ok(message) => message,
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        return Ok(());
                    }
                };
                self.publish_status();
                info!(display_name, "joining");
                match self.send(message).await {
                    Ok(()) => {
                        self.pending_join = Some(PendingJoin {
                            reply,
                            deadline: Instant::now() + self.join_timeout,
                        });
                        Ok(())
                    }
                    Err(err) => {
                        self.machine.abandon_join();
                        self.publish_status();
                        settle(reply, Err(err))
                    }
                }
            }
            Command::Start { reply } => {
                let result = match self.machine.prepare_start() {
                    Ok(message) => self.send(message).await,
                    Err(err) => Err(err),
                };
                settle(reply, result)
            }
            Command::Advance { reply } => {
                let result = match self.machine.prepare_advance() {
                    Ok(message) => self.send(message).await,
                    Err(err) => Err(err),
                };
                settle(reply, result)
            }
            Command::Submit {
                ticket,
                answer_content,
                reply,
            } => {
                let result = match self.machine.prepare_submit(&ticket, answer_content) {
                    Ok(message) => self.send(message).await,
                    Err(err) => Err(err),
                };
                if result.is_ok() {
                    debug!(activity = %ticket, "answer submitted");
                }
                settle(reply, result)
            }
            Command::Shutdown { done, .. } => {
                // Handled by the select loop.
                let _ = done.send(());
                Ok(())
            }
        }
    }

    async fn send(&mut self, message: OutboundMessage) -> Result<(), SessionError> {
        let text = protocol::encode(message).map_err(|e| SessionError::Encode(e.to_string()))?;
        self.transport.send(text).await?;
        self.stats.frames_out += 1;
        Ok(())
    }

    fn handle_frame(&mut self, text: &str) {
        self.stats.frames_in += 1;
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(err) => {
                self.stats.invalid_frames += 1;
                if should_log(&mut self.last_invalid_log) {
                    warn!(
                        error = %err,
                        invalid_frames = self.stats.invalid_frames,
                        "dropping malformed frame"
                    );
                }
                return;
            }
        };

        match self.machine.apply(message) {
            Ok(applied) => self.deliver(applied),
            Err(err) => {
                self.stats.ignored_frames += 1;
                if should_log(&mut self.last_invalid_log) {
                    warn!(error = %err, phase = %self.machine.phase(), "ignoring frame");
                }
            }
        }
    }

    fn deliver(&mut self, applied: Applied) {
        self.publish_status();
        match applied {
            Applied::Roster { joined } => {
                let roster = self.machine.registry().all();
                if let Some(publisher) = &self.publisher {
                    publisher.publish(rank(roster));
                }
                if let Some(me) = joined {
                    tracing::Span::current().record("participant_key", field::display(&me.key));
                    info!(participants = roster.len(), "join confirmed");
                    if let Some(join) = self.pending_join.take() {
                        let _ = join.reply.send(Ok(me));
                    }
                }
                self.events.roster.dispatch(&roster.to_vec());
            }
            Applied::Started(started) => {
                info!(session_id = %started.session_id, "session started");
                self.events.started.dispatch(&started);
            }
            Applied::Activity(activity) => {
                info!(
                    activity_id = %activity.activity_id,
                    sequence = activity.sequence,
                    point_type = ?activity.point_type,
                    "next activity"
                );
                self.events.activity.dispatch(&activity);
            }
            Applied::Ended {
                ended,
                join_abandoned,
            } => {
                info!(session_id = ?ended.session_id, "session ended");
                // Final standings go out now rather than after the throttle window.
                if let Some(publisher) = self.publisher.take() {
                    publisher.finish();
                }
                if join_abandoned && let Some(join) = self.pending_join.take() {
                    let _ = join.reply.send(Err(SessionError::SessionEnded));
                }
                self.events.ended.dispatch(&ended);
            }
            Applied::Summary(rows) => {
                debug!(rows = rows.len(), "session summary");
                self.events.summary.dispatch(&rows);
            }
            Applied::Rejected(rejection) => {
                warn!(
                    message = %rejection.message,
                    action = ?rejection.action,
                    "server rejected action"
                );
                self.events.rejected.dispatch(&rejection);
            }
        }
    }

    fn expire_join(&mut self) {
        let Some(join) = self.pending_join.take() else {
            return;
        };
        self.machine.abandon_join();
        warn!(
            timeout_ms = self.join_timeout.as_millis() as u64,
            "join not acknowledged"
        );
        self.status_tx.send_modify(|status| {
            status.last_error = Some(SessionError::JoinTimeout);
        });
        self.publish_status();
        let _ = join.reply.send(Err(SessionError::JoinTimeout));
    }

    fn publish_status(&self) {
        let machine = &self.machine;
        self.status_tx
            .send_modify(|status| sync_status(status, machine));
    }

    async fn shutdown(mut self, exit: Exit) {
        let (failure, done) = match exit {
            Exit::Shutdown { leave, done } => {
                if leave && let Some(message) = self.machine.prepare_leave() {
                    match self.send(message).await {
                        Ok(()) => info!("left session"),
                        Err(err) => debug!(error = %err, "leave not delivered"),
                    }
                }
                (None, Some(done))
            }
            Exit::Closed => {
                info!("server closed the connection");
                (None, None)
            }
            Exit::Failed(err) => {
                warn!(error = %err, "connection lost");
                (Some(err), None)
            }
            Exit::Abandoned => (None, None),
        };
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "transport close failed");
        }

        self.machine.close(failure.is_some());
        if let Some(join) = self.pending_join.take() {
            let _ = join.reply.send(Err(SessionError::Disconnected));
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject();
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.finish();
        }

        let connection = match &failure {
            Some(err) => ConnectionStatus::Failed(err.to_string()),
            None => ConnectionStatus::Disconnected,
        };
        let machine = &self.machine;
        self.status_tx.send_modify(|status| {
            sync_status(status, machine);
            status.connection = connection.clone();
            if let Some(err) = &failure {
                status.last_error = Some(SessionError::Transport(err.clone()));
            }
        });
        self.events.status.dispatch(&connection);

        debug!(
            frames_in = self.stats.frames_in,
            frames_out = self.stats.frames_out,
            invalid_frames = self.stats.invalid_frames,
            ignored_frames = self.stats.ignored_frames,
            "connection stats"
        );
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}

/// Answers the caller; transport failures also end the session loop.
fn settle<T>(reply: Reply<T>, result: Result<T, SessionError>) -> Result<(), TransportError> {
    let fatal = match &result {
        Err(SessionError::Transport(err)) => Some(err.clone()),
        _ => None,
    };
    let _ = reply.send(result);
    fatal.map_or(Ok(()), Err)
}

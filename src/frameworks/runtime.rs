// Process bootstrap for the session client binary.

use crate::domain::{Connector, ParticipantKey, SessionError, SessionPhase};
use crate::frameworks::config;
use crate::interface_adapters::clients::SessionApiClient;
use crate::interface_adapters::net::{SessionClient, SessionEndpoint, WsConnector};
use crate::use_cases::{LeaderboardBroadcaster, Subscription};

use std::io::{self, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

/// Loads `.env` and installs the log subscriber (`RUST_LOG`, `LOG_FORMAT=json`). Panics are
/// logged through tracing so they land next to the session's own events.
pub fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config::json_logs() {
        // Session spans carry the session code and participant key.
        subscriber.json().with_current_span(true).init();
    } else {
        subscriber.compact().init();
    }

    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()));
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(
            location = location.as_deref(),
            %info,
            ?backtrace,
            "session client panicked"
        );
    }));
}

/// What the binary does once connected.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    // Join as a participant under this name; hosts leave it unset.
    pub display_name: Option<String>,
    pub auto_start: bool,
}

/// Drives one session until it ends, the connection drops, or the process is interrupted.
pub async fn run<C: Connector>(client: SessionClient<C>, options: RunOptions) -> Result<()> {
    let _subscriptions = log_session_events(&client);

    client.connect().await.map_err(io::Error::other)?;

    if let Some(display_name) = &options.display_name {
        match client.join_session(display_name).await {
            Ok(me) => tracing::info!(participant_key = %me.key, "joined session"),
            // The connection is still usable; keep watching the session.
            Err(SessionError::JoinTimeout) => tracing::warn!("join not acknowledged yet"),
            Err(err) => {
                let _ = client.disconnect().await;
                return Err(io::Error::other(err));
            }
        }
    }

    if options.auto_start {
        client.start_session().await.map_err(io::Error::other)?;
    }

    let mut status_rx = client.watch_status();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        status = status_rx.wait_for(|status| matches!(
            status.phase,
            SessionPhase::Ended | SessionPhase::Disconnected | SessionPhase::Error
        )) => {
            if let Ok(status) = status {
                tracing::info!(
                    session_code = %client.endpoint().session_code(),
                    phase = %status.phase,
                    connection = %status.connection,
                    "session finished"
                );
            }
        }
    }

    let status = client.status();
    client.leave_session().await.map_err(io::Error::other)?;

    match (status.phase, status.last_error) {
        (SessionPhase::Error, Some(err)) => Err(io::Error::other(err)),
        _ => Ok(()),
    }
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let endpoint = resolve_endpoint().await?;
    let settings = config::client_settings();
    let broadcaster = LeaderboardBroadcaster::new(config::leaderboard_throttle());
    let _leaderboard_log = broadcaster.subscribe(|board| {
        let leader = board
            .ranked
            .first()
            .map(|first| first.participant.display_name.as_str());
        tracing::info!(
            session_code = %board.session_code,
            participants = board.ranked.len(),
            leader,
            "leaderboard"
        );
        for (ranked, delta) in board.standings() {
            tracing::debug!(
                rank = ranked.realtime_ranking,
                participant_key = %ranked.participant.key,
                score = ranked.participant.realtime_score,
                delta,
                "standing"
            );
        }
    });

    tracing::debug!(
        url = endpoint.url(),
        connect_timeout_ms = settings.connect_timeout.as_millis() as u64,
        join_timeout_ms = settings.join_timeout.as_millis() as u64,
        leaderboard_throttle_ms = broadcaster.window().as_millis() as u64,
        "session client configured"
    );

    let mut client =
        SessionClient::new(WsConnector, endpoint, settings).with_broadcaster(broadcaster);
    if let Some(key) = config::participant_key() {
        client = client.with_participant_key(ParticipantKey::new(key));
    }

    run(
        client,
        RunOptions {
            display_name: config::display_name(),
            auto_start: config::auto_start(),
        },
    )
    .await
}

async fn resolve_endpoint() -> Result<SessionEndpoint> {
    let ws_url = config::session_ws_url();
    let invalid_url = |e: url::ParseError| {
        tracing::error!(%ws_url, error = %e, "invalid session websocket url");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    };

    if let Some(collection_id) = config::collection_id() {
        let api_url = config::session_api_url();
        let api = SessionApiClient::new(api_url.clone(), config::session_api_timeout())
            .map_err(|e| io::Error::other(format!("failed to initialize session api client: {e}")))?;
        let created = api.create_session(&collection_id).await.inspect_err(|e| {
            tracing::error!(%api_url, error = %e, "failed to create session");
        });
        let created = created.map_err(io::Error::other)?;
        tracing::info!(
            session_code = %created.session_code,
            session_id = %created.session_id,
            "session created"
        );
        return SessionEndpoint::host(&ws_url, &created.session_code, &created.session_id)
            .map_err(invalid_url);
    }

    let session_code = config::session_code().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "SESSION_CODE or COLLECTION_ID must be set",
        )
    })?;
    match config::session_id() {
        Some(session_id) => SessionEndpoint::host(&ws_url, &session_code, &session_id),
        None => SessionEndpoint::participant(&ws_url, &session_code),
    }
    .map_err(invalid_url)
}

fn log_session_events<C: Connector>(client: &SessionClient<C>) -> Vec<Subscription> {
    let events = client.events();
    vec![
        events.status.subscribe(|status| tracing::info!(%status, "connection status")),
        events.started.subscribe(|started| {
            tracing::info!(session_id = %started.session_id, "session started");
        }),
        events.activity.subscribe(|activity| {
            tracing::info!(activity = %activity.ticket(), "activity open");
        }),
        events.summary.subscribe(|rows| {
            for row in rows {
                tracing::info!(
                    display_name = %row.display_name,
                    final_score = row.final_score,
                    final_ranking = row.final_ranking,
                    "final result"
                );
            }
        }),
        events.rejected.subscribe(|rejection| {
            tracing::warn!(message = %rejection.message, "server rejected an action");
        }),
    ]
}

use crate::interface_adapters::net::ClientSettings;

use std::{env, time::Duration};

// Runtime constants and environment lookups (library code only sees plain settings).

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3001/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3001";

pub fn session_ws_url() -> String {
    env::var("SESSION_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string())
}

pub fn session_api_url() -> String {
    env::var("SESSION_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string())
}

pub fn connect_timeout() -> Duration {
    millis_or("SESSION_CONNECT_TIMEOUT_MS", 10_000)
}

pub fn join_timeout() -> Duration {
    millis_or("SESSION_JOIN_TIMEOUT_MS", 5_000)
}

pub fn leaderboard_throttle() -> Duration {
    millis_or("LEADERBOARD_THROTTLE_MS", 300)
}

pub fn session_api_timeout() -> Duration {
    millis_or("SESSION_API_TIMEOUT_MS", 1_500)
}

pub fn client_settings() -> ClientSettings {
    ClientSettings {
        connect_timeout: connect_timeout(),
        join_timeout: join_timeout(),
    }
}

// Optional identity/bootstrap values for the binary; empty strings count as unset.
pub fn session_code() -> Option<String> {
    non_empty("SESSION_CODE")
}

pub fn session_id() -> Option<String> {
    non_empty("SESSION_ID")
}

pub fn collection_id() -> Option<String> {
    non_empty("COLLECTION_ID")
}

pub fn display_name() -> Option<String> {
    non_empty("DISPLAY_NAME")
}

pub fn participant_key() -> Option<String> {
    non_empty("PARTICIPANT_KEY")
}

pub fn auto_start() -> bool {
    matches!(
        env::var("SESSION_AUTO_START").as_deref(),
        Ok("1" | "true" | "yes")
    )
}

pub fn json_logs() -> bool {
    matches!(env::var("LOG_FORMAT").as_deref(), Ok("json"))
}

fn millis_or(name: &str, default: u64) -> Duration {
    let millis = env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

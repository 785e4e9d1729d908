use crate::interface_adapters::http::ErrorResponse;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Identity of a freshly created session; the host connects with both, participants only get the code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub session_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    collection_id: &'a str,
}

#[derive(Debug)]
pub enum SessionApiError {
    // Request never produced a response (connect error, timeout).
    Transport(reqwest::Error),
    Upstream { status: StatusCode, message: String },
    Decode(reqwest::Error),
}

impl fmt::Display for SessionApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionApiError::Transport(err) => write!(f, "session api unreachable: {err}"),
            SessionApiError::Upstream { status, message } => {
                write!(f, "session api returned {status}: {message}")
            }
            SessionApiError::Decode(err) => write!(f, "invalid session api response: {err}"),
        }
    }
}

impl std::error::Error for SessionApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionApiError::Transport(err) | SessionApiError::Decode(err) => Some(err),
            SessionApiError::Upstream { .. } => None,
        }
    }
}

// Thin reqwest client for the session REST API.
#[derive(Clone)]
pub struct SessionApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl SessionApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_session(
        &self,
        collection_id: &str,
    ) -> Result<CreatedSession, SessionApiError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .http
            .post(url)
            .json(&CreateSessionRequest { collection_id })
            .send()
            .await
            .map_err(SessionApiError::Transport)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<CreatedSession>()
                .await
                .map_err(SessionApiError::Decode);
        }

        // Error bodies are best effort; fall back to the status reason.
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_owned(),
        };
        Err(SessionApiError::Upstream { status, message })
    }
}

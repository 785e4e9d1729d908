// Shared HTTP payload types for the session REST boundary.

use serde::Deserialize;

/// Error body returned by the session API on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(alias = "error")]
    pub message: String,
}

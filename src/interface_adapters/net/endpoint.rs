// WebSocket endpoint for one session, addressed by its human-entry code.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    url: Url,
    session_code: String,
    session_id: Option<String>,
}

impl SessionEndpoint {
    /// Endpoint a participant uses: only the code they typed in.
    pub fn participant(base: &str, session_code: &str) -> Result<Self, url::ParseError> {
        Self::build(base, session_code, None)
    }

    /// Endpoint for the host, who also knows the id returned when the session was created.
    pub fn host(base: &str, session_code: &str, session_id: &str) -> Result<Self, url::ParseError> {
        Self::build(base, session_code, Some(session_id))
    }

    fn build(
        base: &str,
        session_code: &str,
        session_id: Option<&str>,
    ) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(base)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", session_code);
            if let Some(session_id) = session_id {
                query.append_pair("sessionId", session_id);
            }
        }
        Ok(Self {
            url,
            session_code: session_code.to_owned(),
            session_id: session_id.map(str::to_owned),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

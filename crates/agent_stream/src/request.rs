use std::fmt;

use url::Url;

use crate::error::StreamError;

/// Default base URL of the agent streaming service.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
/// Default path of the streaming chat endpoint.
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/chat/intelligent";

/// One user submission. Issued once; there are no mid-stream requests.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub message: String,
    pub session_id: String,
    /// Opaque model selector forwarded to the server.
    pub model: String,
    /// Opaque identity token supplied by the host; never inspected.
    pub auth: Option<String>,
}

impl StreamRequest {
    pub fn new(
        message: impl Into<String>,
        session_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            model: model.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Full request URL with the submission URL-encoded into the query string.
    pub fn to_url(&self, base_url: &str, endpoint_path: &str) -> Result<Url, StreamError> {
        let mut url = endpoint_url(base_url, endpoint_path)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("message", &self.message)
                .append_pair("session_id", &self.session_id)
                .append_pair("model", &self.model);
            if let Some(auth) = self.auth.as_deref().filter(|auth| !auth.is_empty()) {
                query.append_pair("auth", auth);
            }
        }
        Ok(url)
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("message", &self.message)
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Join a base URL and endpoint path.
///
/// Normalization rules:
/// 1) an empty base falls back to [`DEFAULT_BASE_URL`]
/// 2) a base already ending in the endpoint path is kept unchanged
/// 3) otherwise the path is appended after trimming trailing slashes
pub fn endpoint_url(base_url: &str, endpoint_path: &str) -> Result<Url, StreamError> {
    let base = if base_url.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base_url.trim()
    };
    let trimmed = base.trim_end_matches('/');
    let path = format!("/{}", endpoint_path.trim_start_matches('/'));

    let joined = if path == "/" || trimmed.ends_with(&path) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}{path}")
    };

    Url::parse(&joined).map_err(|error| StreamError::InvalidBaseUrl(format!("{base}: {error}")))
}

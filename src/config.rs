//! Session configuration, with environment overrides.

use std::env;
use std::time::Duration;

use agent_stream::{RetryPolicy, StreamConfig};

/// Grace period before the "still working" advisory fires.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// Model selector used when a submission names none.
pub const DEFAULT_MODEL: &str = "GPT4.1";

pub const ENV_BASE_URL: &str = "AGENT_SESSION_BASE_URL";
pub const ENV_MODEL: &str = "AGENT_SESSION_MODEL";
pub const ENV_GRACE_SECS: &str = "AGENT_SESSION_GRACE_SECS";
pub const ENV_MAX_RETRIES: &str = "AGENT_SESSION_MAX_RETRIES";

/// Open/close markers bracketing the deliverable in accumulated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "<solution>".to_owned(),
            close: "</solution>".to_owned(),
        }
    }
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Advisory-only watchdog delay; never cancels or fails a session.
    pub grace_period: Duration,
    pub delimiters: Delimiters,
    pub default_model: String,
    pub stream: StreamConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            delimiters: Delimiters::default(),
            default_model: DEFAULT_MODEL.to_owned(),
            stream: StreamConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `AGENT_SESSION_*` variables. Unparseable numeric
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(base_url) = env_string_opt(ENV_BASE_URL) {
            config.stream.base_url = base_url;
        }
        if let Some(model) = env_string_opt(ENV_MODEL) {
            config.default_model = model;
        }
        if let Some(secs) = env_parse::<u64>(ENV_GRACE_SECS) {
            config.grace_period = Duration::from_secs(secs);
        }
        if let Some(max_retries) = env_parse::<u32>(ENV_MAX_RETRIES) {
            config.stream.retry = RetryPolicy::bounded(max_retries);
        }

        config
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_owned())
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}

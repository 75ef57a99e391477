use std::collections::BTreeMap;
use std::time::Duration;

use crate::request::{DEFAULT_BASE_URL, DEFAULT_ENDPOINT_PATH};
use crate::retry::RetryPolicy;

/// Transport configuration for the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Base URL of the agent service.
    pub base_url: String,
    /// Path of the streaming endpoint under `base_url`.
    pub endpoint_path: String,
    /// Optional connect timeout. There is no whole-request deadline by default.
    pub connect_timeout: Option<Duration>,
    /// Optional whole-request timeout; unset keeps long-lived streams open.
    pub timeout: Option<Duration>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_owned(),
            connect_timeout: None,
            timeout: None,
            extra_headers: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint_path(mut self, endpoint_path: impl Into<String>) -> Self {
        self.endpoint_path = endpoint_path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

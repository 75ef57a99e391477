use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;

/// Opt-in retry of the initial request. The default performs no retries:
/// transport failures are terminal unless a host configures otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial request attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::disabled()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Exponential backoff delay for a retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
    }
}

fn retryable_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?(refused|reset)|timed?.?out")
            .expect("retry regex must compile")
    })
}

/// Retry classification for transient statuses and error text.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504) || retryable_error_regex().is_match(error_text)
}

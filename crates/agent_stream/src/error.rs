use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Terminal transport failures. Frame-level decode problems are never errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {0} {1}")]
    Status(StatusCode, String),

    #[error(
        "retry exhausted after {attempts} attempts (status: {}, last_error: {last_error:?})",
        display_status(.status)
    )]
    RetryExhausted {
        attempts: u32,
        status: Option<StatusCode>,
        last_error: Option<String>,
    },

    #[error("request was cancelled")]
    Cancelled,
}

impl StreamError {
    /// True when the failure came from the local cancel signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status, _) => Some(*status),
            Self::RetryExhausted { status, .. } => *status,
            Self::Request(error) => error.status(),
            _ => None,
        }
    }
}

fn display_status(status: &Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "n/a".to_owned())
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
    error: Option<ErrorFields>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorFields {
    Text(String),
    Object { message: Option<String> },
}

/// Extract a human-readable message from a non-2xx response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        } else {
            body.to_owned()
        }
    };

    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return fallback();
    };

    if let Some(detail) = parsed.detail {
        return match detail {
            serde_json::Value::String(detail) => detail,
            other => other.to_string(),
        };
    }

    match parsed.error {
        Some(ErrorFields::Text(message)) if !message.is_empty() => message,
        Some(ErrorFields::Object {
            message: Some(message),
        }) if !message.is_empty() => message,
        _ => fallback(),
    }
}

use std::time::Duration;

use agent_stream::retry::*;

#[test]
fn retry_http_status_is_retryable() {
    assert!(is_retryable_http_error(429, ""));
    assert!(is_retryable_http_error(500, ""));
    assert!(is_retryable_http_error(502, ""));
    assert!(is_retryable_http_error(503, ""));
    assert!(is_retryable_http_error(504, ""));
    assert!(!is_retryable_http_error(401, ""));
}

#[test]
fn retry_http_error_pattern_is_retryable() {
    assert!(is_retryable_http_error(400, "rate limit exceeded"));
    assert!(is_retryable_http_error(400, "connection refused"));
    assert!(!is_retryable_http_error(400, "invalid request"));
}

#[test]
fn retry_delay_is_exponential() {
    let policy = RetryPolicy::bounded(3);
    assert_eq!(policy.delay(0), Duration::from_millis(1000));
    assert_eq!(policy.delay(1), Duration::from_millis(2000));
    assert_eq!(policy.delay(2), Duration::from_millis(4000));
}

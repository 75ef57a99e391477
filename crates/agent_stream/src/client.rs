use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::config::StreamConfig;
use crate::decode::decode;
use crate::error::{parse_error_message, StreamError};
use crate::events::Event;
use crate::frame::FrameDecoder;
use crate::request::StreamRequest;
use crate::retry::is_retryable_http_error;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Transport-level progress reported while a response body is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the request with a 2xx status.
    Opened { status: u16 },
    /// One complete frame of the response body.
    Frame(String),
}

#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client,
    config: StreamConfig,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn request_url(&self, request: &StreamRequest) -> Result<Url, StreamError> {
        request.to_url(&self.config.base_url, &self.config.endpoint_path)
    }

    pub fn build_request(
        &self,
        request: &StreamRequest,
    ) -> Result<reqwest::RequestBuilder, StreamError> {
        let mut builder = self
            .http
            .get(self.request_url(request)?)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        for (key, value) in &self.config.extra_headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|error| {
                StreamError::InvalidHeader {
                    name: key.clone(),
                    message: error.to_string(),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|error| StreamError::InvalidHeader {
                name: key.clone(),
                message: error.to_string(),
            })?;
            builder = builder.header(name, value);
        }

        Ok(builder)
    }

    /// Issue the request, retrying only when the configured policy allows it.
    pub async fn send_with_retry(
        &self,
        request: &StreamRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, StreamError> {
        let policy = self.config.retry;
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=policy.max_retries {
            if is_cancelled(cancellation) {
                return Err(StreamError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation).await?;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(status = status.as_u16(), attempt, "stream response opened");
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < policy.max_retries
                        && is_retryable_http_error(status.as_u16(), &body)
                    {
                        let delay = policy.delay(attempt);
                        warn!(
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "retrying stream request after retryable status"
                        );
                        await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
                        continue;
                    }

                    return Err(StreamError::Status(status, message));
                }
                Err(error) => {
                    if !policy.is_enabled() {
                        return Err(StreamError::Request(error));
                    }
                    last_error = Some(error.to_string());
                    if attempt < policy.max_retries {
                        let delay = policy.delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = last_error.as_deref().unwrap_or_default(),
                            "retrying stream request after transport failure"
                        );
                        await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
                        continue;
                    }
                    return Err(StreamError::RetryExhausted {
                        attempts: attempt + 1,
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(StreamError::RetryExhausted {
            attempts: policy.max_retries + 1,
            status: last_status,
            last_error,
        })
    }

    /// Stream the response body, reporting the open and every complete frame
    /// in arrival order. A trailing unterminated line is flushed only when the
    /// body ends normally.
    pub async fn stream_with_handler<F>(
        &self,
        request: &StreamRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<(), StreamError>
    where
        F: FnMut(TransportEvent),
    {
        let response = self.send_with_retry(request, cancellation).await?;
        on_event(TransportEvent::Opened {
            status: response.status().as_u16(),
        });

        let mut bytes = response.bytes_stream();
        let mut frames = FrameDecoder::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk?;
            for frame in frames.feed(&chunk) {
                on_event(TransportEvent::Frame(frame));
            }
        }

        if is_cancelled(cancellation) {
            return Err(StreamError::Cancelled);
        }
        if let Some(frame) = frames.finish() {
            on_event(TransportEvent::Frame(frame));
        }

        Ok(())
    }

    /// Collect and decode every event of one response.
    pub async fn stream(
        &self,
        request: &StreamRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Vec<Event>, StreamError> {
        let mut events = Vec::new();
        self.stream_with_handler(request, cancellation, |event| {
            if let TransportEvent::Frame(frame) = event {
                events.push(decode(&frame));
            }
        })
        .await?;

        Ok(events)
    }
}

pub fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, StreamError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(StreamError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(StreamError::Cancelled);
            }
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::{await_or_cancel, StreamClient};
    use crate::config::StreamConfig;
    use crate::error::StreamError;
    use crate::request::StreamRequest;

    #[test]
    fn request_is_a_get_with_encoded_query() {
        let client = StreamClient::new(
            StreamConfig::new("http://agent.local:8000/").insert_header("x-trace", "abc"),
        )
        .expect("client");
        let request = StreamRequest::new("mix A & B?", "s-1", "GPT4.1").with_auth("dXNlcjpwdw==");

        let http_request = client
            .build_request(&request)
            .expect("build request")
            .build()
            .expect("request");

        assert_eq!(http_request.method(), "GET");
        assert_eq!(http_request.url().path(), "/api/chat/intelligent");
        assert_eq!(
            http_request.url().query(),
            Some("message=mix+A+%26+B%3F&session_id=s-1&model=GPT4.1&auth=dXNlcjpwdw%3D%3D")
        );
        assert_eq!(http_request.headers()["accept"], "text/event-stream");
        assert_eq!(http_request.headers()["x-trace"], "abc");
    }

    #[test]
    fn invalid_header_is_reported() {
        let client =
            StreamClient::new(StreamConfig::default().insert_header("bad header", "v")).expect("client");
        let request = StreamRequest::new("hi", "s", "m");
        let error = client.build_request(&request).err().expect("header must fail");
        assert!(matches!(error, StreamError::InvalidHeader { .. }));
    }

    #[tokio::test]
    async fn await_or_cancel_returns_cancelled_when_flag_is_set() {
        let cancel = Arc::new(AtomicBool::new(true));
        let result = await_or_cancel(std::future::pending::<()>(), Some(&cancel)).await;
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }
}

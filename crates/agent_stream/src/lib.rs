//! Wire layer for agent streaming sessions.
//!
//! This crate owns everything between the HTTP response body and a typed
//! [`Event`]: the outbound request URL, line framing, tolerant frame decoding,
//! transport configuration, and the opt-in retry policy. It holds no session
//! state; progress tracking and solution extraction live in `agent_session`.
//!
//! Decoding never fails. A frame that is not a JSON object degrades to an
//! `ai_message` event with the raw text, and an unknown `type` is preserved as
//! [`EventPayload::Unknown`] so newer servers cannot break older clients.

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod frame;
pub mod request;
pub mod retry;

pub use client::{CancellationSignal, StreamClient, TransportEvent};
pub use config::StreamConfig;
pub use decode::decode;
pub use error::StreamError;
pub use events::{Event, EventKind, EventPayload, ImageRef, PlanStep};
pub use frame::FrameDecoder;
pub use request::{endpoint_url, StreamRequest, DEFAULT_BASE_URL, DEFAULT_ENDPOINT_PATH};
pub use retry::RetryPolicy;
pub use reqwest::StatusCode;

//! Streaming session controller for autonomous agent runs.
//!
//! A submission opens one long-lived response stream. Each frame is decoded by
//! [`agent_stream::decode`] and dispatched, in arrival order and to completion,
//! into the session model:
//!
//! - [`ProgressTracker`]: fixed phase table whose completed prefix only grows.
//! - [`TaskListManager`]: plan checklist; completion is monotonic and the last
//!   item is reserved for "deliverable produced".
//! - [`ExecutionLog`]: append-only audit log pairing tool calls with outputs.
//! - [`SolutionExtractor`]: sanitized, at-most-once deliverable detection.
//!
//! [`SessionController`] drives the stream through [`ConnectionSupervisor`],
//! which owns the transport, cancellation and the advisory watchdog.
//!
//! Invariant: one writer. Every mutating call takes `&mut self`; hosts that
//! share a controller across threads must serialize access to it as a whole.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod exec_log;
pub mod progress;
pub mod session;
pub mod solution;
pub mod state;
pub mod supervisor;
pub mod tasks;

pub use agent_stream::{Event, EventKind, EventPayload, RetryPolicy, StreamConfig, StreamError};

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{Delimiters, SessionConfig};
pub use crate::controller::{NoopObserver, SessionController, SessionObserver, SubmitRequest};
pub use crate::error::SessionError;
pub use crate::exec_log::{EntryStatus, EntryType, ExecutionLog, ExecutionLogEntry};
pub use crate::progress::{Phase, ProgressTracker, StatusStep, StepStatus};
pub use crate::session::{ArtifactKind, ArtifactRef, Session, SessionSnapshot, SessionStatus};
pub use crate::solution::{SolutionArtifact, SolutionExtractor};
pub use crate::state::{DispatchOutcome, SessionState, Termination};
pub use crate::supervisor::{ConnectionEvent, ConnectionHandle, ConnectionSupervisor, FrameSink, FrameSource};
pub use crate::tasks::{TaskListManager, TodoItem};

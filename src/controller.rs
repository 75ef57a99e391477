//! Async driver composing the supervisor and the dispatch engine.

use std::sync::Arc;
use std::time::Duration;

use agent_stream::{decode, Event, StreamClient, StreamRequest};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{Session, SessionSnapshot};
use crate::solution::SolutionArtifact;
use crate::state::{DispatchOutcome, SessionState, Termination};
use crate::supervisor::{ConnectionEvent, ConnectionHandle, ConnectionSupervisor, FrameSource};

/// Receives session progress. Called synchronously from the dispatch path, so
/// implementations must not block.
pub trait SessionObserver {
    fn on_event(&mut self, _event: &Event, _session: &Session) {}

    /// Called at most once per session.
    fn on_solution(&mut self, _solution: &SolutionArtifact) {}

    fn on_advisory(&mut self, _waited: Duration) {}

    /// Called exactly once per session, after it reached a terminal status.
    fn on_finished(&mut self, _snapshot: &SessionSnapshot) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// One user submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub message: String,
    /// Falls back to the configured default model.
    pub model: Option<String>,
    /// Opaque id from the identity provider; a random one is generated when absent.
    pub session_id: Option<String>,
    pub auth: Option<String>,
}

impl SubmitRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }
}

/// Owns at most one live session. All mutation goes through `&mut self`, so a
/// multi-threaded host must put the controller behind a single writer.
pub struct SessionController<O = NoopObserver> {
    config: SessionConfig,
    supervisor: ConnectionSupervisor,
    observer: O,
    clock: Arc<dyn Clock>,
    state: Option<SessionState>,
    handle: Option<ConnectionHandle>,
    reported: bool,
}

impl SessionController<NoopObserver> {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_observer(config, NoopObserver)
    }
}

impl<O: SessionObserver> SessionController<O> {
    /// Controller streaming over HTTP with the configured [`StreamClient`].
    pub fn with_observer(config: SessionConfig, observer: O) -> Result<Self, SessionError> {
        let client = StreamClient::new(config.stream.clone())?;
        Ok(Self::with_source(config, Arc::new(client), observer))
    }

    pub fn with_source(config: SessionConfig, source: Arc<dyn FrameSource>, observer: O) -> Self {
        let supervisor = ConnectionSupervisor::new(source, config.grace_period);
        Self {
            config,
            supervisor,
            observer,
            clock: Arc::new(SystemClock),
            state: None,
            handle: None,
            reported: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn session(&self) -> Option<&Session> {
        self.state.as_ref().map(SessionState::session)
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.state.as_ref().map(SessionState::snapshot)
    }

    pub fn is_live(&self) -> bool {
        self.state.as_ref().is_some_and(|state| !state.is_finished())
    }

    /// Start a new session, cancelling any session still live. Returns the session id.
    pub fn submit(&mut self, request: SubmitRequest) -> String {
        if self.is_live() {
            debug!("new submission replaces live session");
            self.finish(Termination::Cancelled);
        }

        let SubmitRequest {
            message,
            model,
            session_id,
            auth,
        } = request;
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let model = model.unwrap_or_else(|| self.config.default_model.clone());

        let mut stream_request = StreamRequest::new(message, id.clone(), model.clone());
        if let Some(auth) = auth {
            stream_request = stream_request.with_auth(auth);
        }

        self.state = Some(SessionState::new(
            id.clone(),
            model,
            &self.config,
            Arc::clone(&self.clock),
        ));
        self.reported = false;
        self.handle = Some(self.supervisor.open(stream_request));
        id
    }

    /// Wait for one transport event and apply it. Returns `false` once there is
    /// nothing left to drive.
    pub async fn step(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        let next = handle.next().await;

        match next {
            Some(ConnectionEvent::Opened { status }) => {
                debug!(status, "stream accepted");
                if let Some(state) = self.state.as_mut() {
                    state.mark_opened();
                }
            }
            Some(ConnectionEvent::Frame(raw)) => {
                let event = decode(&raw);
                self.dispatch_event(&event);
            }
            Some(ConnectionEvent::Advisory(waited)) => {
                if let Some(session) = self.session() {
                    info!(session_id = %session.id, waited_secs = waited.as_secs(), "still working");
                }
                self.observer.on_advisory(waited);
            }
            Some(ConnectionEvent::Closed) | None => self.finish(Termination::StreamEnded),
            Some(ConnectionEvent::Failed(error)) if error.is_cancelled() => {
                self.finish(Termination::Cancelled);
            }
            Some(ConnectionEvent::Failed(error)) => {
                self.finish(Termination::TransportFailed(error.to_string()));
            }
        }

        self.handle.is_some()
    }

    /// Drive the current session to a terminal status and return its snapshot.
    pub async fn run(&mut self) -> Option<SessionSnapshot> {
        while self.step().await {}
        self.snapshot()
    }

    /// Decode and apply one raw frame without going through the transport.
    pub fn dispatch_frame(&mut self, raw: &str) -> Result<DispatchOutcome, SessionError> {
        if self.state.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        Ok(self.dispatch_event(&decode(raw)))
    }

    /// Cancel the current session. Partially streamed output still goes
    /// through the full-text rescan, tagged as recovered.
    pub fn cancel(&mut self) -> Result<SessionSnapshot, SessionError> {
        if self.state.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        self.finish(Termination::Cancelled);
        self.snapshot().ok_or(SessionError::NoActiveSession)
    }

    fn dispatch_event(&mut self, event: &Event) -> DispatchOutcome {
        let Some(state) = self.state.as_mut() else {
            return DispatchOutcome::default();
        };
        let outcome = state.dispatch(event);
        self.observer.on_event(event, state.session());

        if let Some(solution) = &outcome.solution {
            self.observer.on_solution(solution);
        }
        if outcome.finished {
            self.close();
        }
        outcome
    }

    fn finish(&mut self, termination: Termination) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if termination == Termination::Cancelled {
            if let Some(handle) = self.handle.as_mut() {
                self.supervisor.cancel(handle);
            }
        }
        if let Some(solution) = state.finish(termination) {
            self.observer.on_solution(&solution);
        }
        self.close();
    }

    fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            self.supervisor.release(&mut handle);
        }
        if self.reported {
            return;
        }
        if let Some(state) = self.state.as_ref().filter(|state| state.is_finished()) {
            self.reported = true;
            self.observer.on_finished(&state.snapshot());
        }
    }
}

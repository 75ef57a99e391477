//! Transport ownership: one live connection, cancel, and the advisory watchdog.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_stream::{CancellationSignal, StreamClient, StreamError, StreamRequest, TransportEvent};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Sleep;
use tracing::debug;

/// Seam between the supervisor and whatever produces raw frames.
pub trait FrameSource: Send + Sync + 'static {
    /// Drive one response to completion, pushing progress into `sink`.
    /// Resolves with `Ok` when the body ends normally.
    fn open(
        &self,
        request: StreamRequest,
        cancellation: CancellationSignal,
        sink: FrameSink,
    ) -> BoxFuture<'static, Result<(), StreamError>>;
}

impl FrameSource for StreamClient {
    fn open(
        &self,
        request: StreamRequest,
        cancellation: CancellationSignal,
        sink: FrameSink,
    ) -> BoxFuture<'static, Result<(), StreamError>> {
        let client = self.clone();
        Box::pin(async move {
            client
                .stream_with_handler(&request, Some(&cancellation), |event| match event {
                    TransportEvent::Opened { status } => sink.opened(status),
                    TransportEvent::Frame(frame) => sink.frame(frame),
                })
                .await
        })
    }
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Opened { status: u16 },
    Frame(String),
    /// No frame arrived within the grace period. Informational only.
    Advisory(Duration),
    /// The body ended normally.
    Closed,
    Failed(StreamError),
}

/// Producer side handed to a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl FrameSink {
    pub fn opened(&self, status: u16) {
        let _ = self.tx.send(ConnectionEvent::Opened { status });
    }

    pub fn frame(&self, frame: impl Into<String>) {
        let _ = self.tx.send(ConnectionEvent::Frame(frame.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct ActiveConnection {
    id: u64,
    cancellation: CancellationSignal,
    abort: AbortHandle,
}

pub struct ConnectionSupervisor {
    source: Arc<dyn FrameSource>,
    grace_period: Duration,
    next_id: u64,
    active: Option<ActiveConnection>,
}

impl ConnectionSupervisor {
    pub fn new(source: Arc<dyn FrameSource>, grace_period: Duration) -> Self {
        Self {
            source,
            grace_period,
            next_id: 1,
            active: None,
        }
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Start streaming `request`. Any connection still open is cancelled first.
    pub fn open(&mut self, request: StreamRequest) -> ConnectionHandle {
        if let Some(previous) = self.active.take() {
            debug!(connection = previous.id, "cancelling previous connection");
            previous.cancellation.store(true, Ordering::Release);
            previous.abort.abort();
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancellation: CancellationSignal = Arc::new(AtomicBool::new(false));
        let source = Arc::clone(&self.source);
        let sink = FrameSink { tx: tx.clone() };
        let signal = Arc::clone(&cancellation);

        let task = tokio::spawn(async move {
            let terminal = match source.open(request, signal, sink).await {
                Ok(()) => ConnectionEvent::Closed,
                Err(error) => ConnectionEvent::Failed(error),
            };
            let _ = tx.send(terminal);
        });

        self.active = Some(ActiveConnection {
            id,
            cancellation: Arc::clone(&cancellation),
            abort: task.abort_handle(),
        });
        debug!(connection = id, grace_ms = self.grace_period.as_millis() as u64, "connection opened");

        ConnectionHandle {
            id,
            rx,
            cancellation,
            task,
            grace_period: self.grace_period,
            watchdog: Some(Box::pin(tokio::time::sleep(self.grace_period))),
            closed: false,
        }
    }

    /// Close `handle` immediately. Frames already buffered are discarded.
    pub fn cancel(&mut self, handle: &mut ConnectionHandle) {
        if self.active.as_ref().is_some_and(|active| active.id == handle.id) {
            self.active = None;
        }
        handle.close();
        debug!(connection = handle.id, "connection cancelled");
    }

    /// Forget `handle` once its session is over. The transport task is torn
    /// down if it is still running.
    pub fn release(&mut self, handle: &mut ConnectionHandle) {
        if self.active.as_ref().is_some_and(|active| active.id == handle.id) {
            self.active = None;
        }
        handle.close();
    }
}

enum Wake {
    Event(Option<ConnectionEvent>),
    Deadline,
}

/// Consumer side of one connection.
pub struct ConnectionHandle {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    cancellation: CancellationSignal,
    task: JoinHandle<()>,
    grace_period: Duration,
    watchdog: Option<Pin<Box<Sleep>>>,
    closed: bool,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next transport event. The advisory fires at most once, and only if no
    /// frame arrived before the grace period elapsed. Returns `None` once the
    /// connection is closed.
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        if self.closed {
            return None;
        }

        let wake = match self.watchdog.as_mut() {
            Some(deadline) => tokio::select! {
                biased;
                event = self.rx.recv() => Wake::Event(event),
                () = deadline => Wake::Deadline,
            },
            None => Wake::Event(self.rx.recv().await),
        };

        match wake {
            Wake::Deadline => {
                self.watchdog = None;
                Some(ConnectionEvent::Advisory(self.grace_period))
            }
            Wake::Event(Some(ConnectionEvent::Frame(frame))) => {
                self.watchdog = None;
                Some(ConnectionEvent::Frame(frame))
            }
            Wake::Event(Some(event @ (ConnectionEvent::Closed | ConnectionEvent::Failed(_)))) => {
                self.closed = true;
                self.watchdog = None;
                Some(event)
            }
            Wake::Event(Some(event)) => Some(event),
            Wake::Event(None) => {
                self.closed = true;
                None
            }
        }
    }

    fn close(&mut self) {
        self.cancellation.store(true, Ordering::Release);
        self.task.abort();
        self.rx.close();
        self.watchdog = None;
        self.closed = true;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancellation.store(true, Ordering::Release);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use agent_stream::{CancellationSignal, StreamError, StreamRequest};
    use futures_util::future::BoxFuture;

    use super::{ConnectionEvent, ConnectionSupervisor, FrameSink, FrameSource};

    /// Emits `frames` after `delay`, then ends normally. Records every request it sees.
    struct DelayedSource {
        delay: Duration,
        frames: Vec<&'static str>,
        opened: Arc<Mutex<Vec<String>>>,
    }

    impl DelayedSource {
        fn new(delay: Duration, frames: Vec<&'static str>) -> Self {
            Self {
                delay,
                frames,
                opened: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameSource for DelayedSource {
        fn open(
            &self,
            request: StreamRequest,
            _cancellation: CancellationSignal,
            sink: FrameSink,
        ) -> BoxFuture<'static, Result<(), StreamError>> {
            self.opened.lock().expect("lock").push(request.session_id.clone());
            let delay = self.delay;
            let frames = self.frames.clone();
            Box::pin(async move {
                sink.opened(200);
                tokio::time::sleep(delay).await;
                for frame in frames {
                    sink.frame(frame);
                }
                Ok(())
            })
        }
    }

    fn request(id: &str) -> StreamRequest {
        StreamRequest::new("hello", id, "GPT4.1")
    }

    #[tokio::test(start_paused = true)]
    async fn advisory_fires_once_when_stream_is_silent() {
        let source = DelayedSource::new(Duration::from_secs(25), vec![r#"{"type":"done"}"#]);
        let mut supervisor = ConnectionSupervisor::new(Arc::new(source), Duration::from_secs(10));
        let mut handle = supervisor.open(request("s-1"));

        assert!(matches!(handle.next().await, Some(ConnectionEvent::Opened { status: 200 })));
        assert!(matches!(
            handle.next().await,
            Some(ConnectionEvent::Advisory(waited)) if waited == Duration::from_secs(10)
        ));
        assert!(matches!(handle.next().await, Some(ConnectionEvent::Frame(_))));
        assert!(matches!(handle.next().await, Some(ConnectionEvent::Closed)));
        assert!(handle.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn early_frame_disarms_advisory() {
        let source = DelayedSource::new(Duration::from_secs(1), vec![r#"{"type":"ping"}"#]);
        let mut supervisor = ConnectionSupervisor::new(Arc::new(source), Duration::from_secs(10));
        let mut handle = supervisor.open(request("s-1"));

        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        assert!(!events
            .iter()
            .any(|event| matches!(event, ConnectionEvent::Advisory(_))));
        assert!(matches!(events.last(), Some(ConnectionEvent::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn opening_again_cancels_previous_connection() {
        let source = DelayedSource::new(Duration::from_secs(5), vec![r#"{"type":"done"}"#]);
        let opened = Arc::clone(&source.opened);
        let mut supervisor = ConnectionSupervisor::new(Arc::new(source), Duration::from_secs(10));

        let mut first = supervisor.open(request("s-1"));
        let second = supervisor.open(request("s-2"));
        tokio::task::yield_now().await;
        assert_eq!(supervisor.active_id(), Some(second.id()));

        while let Some(event) = first.next().await {
            assert!(!matches!(event, ConnectionEvent::Frame(_)), "cancelled stream delivered a frame");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(supervisor.has_active());
        assert!(opened.lock().expect("lock").contains(&"s-2".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn release_after_close_frees_the_slot() {
        let source = DelayedSource::new(Duration::ZERO, vec![r#"{"type":"done"}"#]);
        let mut supervisor = ConnectionSupervisor::new(Arc::new(source), Duration::from_secs(10));
        let mut handle = supervisor.open(request("s-1"));

        while let Some(event) = handle.next().await {
            if matches!(event, ConnectionEvent::Closed) {
                break;
            }
        }
        assert!(supervisor.has_active());

        supervisor.release(&mut handle);
        assert!(!supervisor.has_active());
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_buffered_frames() {
        let source = DelayedSource::new(Duration::ZERO, vec![r#"{"type":"ping"}"#, r#"{"type":"ping"}"#]);
        let mut supervisor = ConnectionSupervisor::new(Arc::new(source), Duration::from_secs(10));
        let mut handle = supervisor.open(request("s-1"));
        tokio::time::sleep(Duration::from_millis(1)).await;

        supervisor.cancel(&mut handle);
        assert!(handle.is_closed());
        assert!(handle.next().await.is_none());
        assert!(!supervisor.has_active());
    }
}

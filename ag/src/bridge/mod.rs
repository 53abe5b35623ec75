//! TaskStreamBridge - runs one task while streaming its translated events
//!
//! A session moves through `pending → running → draining → terminal`:
//!
//! 1. A `start` event goes out before the executor is touched.
//! 2. The executor runs on its own tokio task inside a [`SESSION_SPAN`]
//!    span; the [`TranslatorLayer`](crate::translate::TranslatorLayer)
//!    routes every log line emitted there into this session's queue.
//! 3. The driver forwards queued events as they arrive, waking on queue
//!    pushes, on a fixed poll interval, or on task completion.
//! 4. After completion it waits a short grace period, drains once more and
//!    emits exactly one terminal event, `complete` or `error`, always last.
//!
//! Overlapping sessions are independent: each has its own queue and span.
//! The shared [`EventBus`] is mirrored by at most one session at a time.

mod queue;

use std::any::Any;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

pub use queue::{DEFAULT_QUEUE_CAPACITY, Drained, SessionQueue, SessionRegistration, SessionRegistry};

use crate::config::BridgeConfig;
use crate::events::{EventBus, StreamEvent, StreamKind};
use crate::executor::{ExecutorError, ExecutorSlot};
use crate::translate::SESSION_SPAN;

/// Lifecycle of one streaming session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Pending,
    Running,
    Draining,
    Terminal,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub phase: SessionPhase,
    /// The terminal event that ended the stream
    pub terminal: StreamEvent,
    /// Events delivered to the client, terminal included
    pub forwarded: usize,
    /// Translated events lost to queue overflow
    pub dropped: u64,
    /// Whether this session mirrored its events into the bus
    pub owned_bus: bool,
    /// Whether the client went away before the terminal event
    pub disconnected: bool,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.terminal.kind == StreamKind::Complete
    }
}

/// Coordinates task execution and event streaming
pub struct TaskStreamBridge {
    executors: Arc<ExecutorSlot>,
    sessions: SessionRegistry,
    bus: Arc<EventBus>,
    bus_owner: Arc<Mutex<()>>,
    config: BridgeConfig,
}

impl TaskStreamBridge {
    pub fn new(
        executors: Arc<ExecutorSlot>,
        sessions: SessionRegistry,
        bus: Arc<EventBus>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            executors,
            sessions,
            bus,
            bus_owner: Arc::new(Mutex::new(())),
            config,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Start a session in the background and return its event stream
    ///
    /// The stream ends right after the terminal event. Dropping it stops
    /// delivery; the task itself still runs to completion.
    pub fn start(self: &Arc<Self>, prompt: impl Into<String>) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.output_buffer.max(1));
        let bridge = Arc::clone(self);
        let prompt = prompt.into();
        tokio::spawn(async move {
            bridge.run_session(&prompt, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Drive one session to its terminal event, writing events to `out`
    pub async fn run_session(&self, prompt: &str, out: mpsc::Sender<StreamEvent>) -> SessionOutcome {
        let session_id = Uuid::now_v7().to_string();
        debug!(%session_id, prompt_len = prompt.len(), "TaskStreamBridge::run_session: called");

        let owner = Arc::clone(&self.bus_owner).try_lock_owned().ok();
        if owner.is_some() && self.config.reset_bus_on_start {
            self.bus.reset();
        }
        if owner.is_none() {
            info!(%session_id, "Another session owns the event bus; streaming without mirroring");
        }

        let mut sink = SessionSink {
            session_id,
            out,
            bus: Arc::clone(&self.bus),
            owner,
            phase: SessionPhase::Pending,
            forwarded: 0,
            dropped: 0,
            disconnected: false,
        };
        sink.forward(StreamEvent::start()).await;

        let executor = match self.executors.get_or_init().await {
            Ok(executor) => executor,
            Err(e) => {
                warn!(session_id = %sink.session_id, error = %e, "Executor unavailable");
                return sink.finish(StreamEvent::error(e.to_string())).await;
            }
        };

        let queue = Arc::new(SessionQueue::new(self.config.queue_capacity));
        let registration = self.sessions.register(&sink.session_id, Arc::clone(&queue));

        sink.transition(SessionPhase::Running);
        let span = info_span!(SESSION_SPAN, session_id = %sink.session_id);
        let task_prompt = prompt.to_string();
        let mut task = tokio::spawn(async move { executor.run(&task_prompt).await }.instrument(span));

        let poll_interval = self.config.poll_interval();
        let joined = loop {
            sink.forward_drained(queue.drain()).await;
            tokio::select! {
                biased;
                joined = &mut task => break joined,
                _ = queue.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        };

        sink.transition(SessionPhase::Draining);
        tokio::time::sleep(self.config.grace_period()).await;
        sink.forward_drained(queue.drain()).await;
        drop(registration);

        let terminal = match joined {
            Ok(Ok(result)) if result.trim().is_empty() => StreamEvent::complete("Task completed"),
            Ok(Ok(result)) => StreamEvent::complete(result),
            Ok(Err(e)) => StreamEvent::error(e.to_string()),
            Err(e) => StreamEvent::error(join_failure(e).to_string()),
        };
        sink.finish(terminal).await
    }
}

/// Per-session output: the client channel plus, when owned, the bus
struct SessionSink {
    session_id: String,
    out: mpsc::Sender<StreamEvent>,
    bus: Arc<EventBus>,
    owner: Option<OwnedMutexGuard<()>>,
    phase: SessionPhase,
    forwarded: usize,
    dropped: u64,
    disconnected: bool,
}

impl SessionSink {
    fn transition(&mut self, phase: SessionPhase) {
        debug!(session_id = %self.session_id, from = ?self.phase, to = ?phase, "SessionSink::transition");
        self.phase = phase;
    }

    async fn forward_drained(&mut self, drained: Drained) {
        if drained.dropped > 0 {
            self.dropped += drained.dropped;
            warn!(
                session_id = %self.session_id,
                dropped = drained.dropped,
                "Session queue overflowed; oldest events dropped"
            );
        }
        for event in drained.events {
            self.forward(event).await;
        }
    }

    async fn forward(&mut self, event: StreamEvent) {
        if self.owner.is_some() {
            self.bus.record_stream_event(&event);
        }
        self.send(event).await;
    }

    async fn send(&mut self, event: StreamEvent) {
        if self.disconnected {
            return;
        }
        if self.out.send(event).await.is_err() {
            info!(session_id = %self.session_id, "Client disconnected; task continues without delivery");
            self.disconnected = true;
        } else {
            self.forwarded += 1;
        }
    }

    async fn finish(mut self, terminal: StreamEvent) -> SessionOutcome {
        if self.owner.is_some() {
            match terminal.kind {
                StreamKind::Complete => {
                    self.bus.complete("success");
                }
                _ => {
                    self.bus.error(&terminal.content);
                }
            }
        }
        self.send(terminal.clone()).await;
        self.transition(SessionPhase::Terminal);
        info!(
            session_id = %self.session_id,
            kind = ?terminal.kind,
            forwarded = self.forwarded,
            "Session finished"
        );

        SessionOutcome {
            session_id: self.session_id,
            phase: self.phase,
            terminal,
            forwarded: self.forwarded,
            dropped: self.dropped,
            owned_bus: self.owner.is_some(),
            disconnected: self.disconnected,
        }
    }
}

fn join_failure(err: JoinError) -> ExecutorError {
    if err.is_panic() {
        ExecutorError::Panicked(panic_message(err.into_panic()))
    } else {
        ExecutorError::Panicked("task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Event Bus - bounded history plus pub/sub for agent events
//!
//! The EventBus keeps the most recent events in a FIFO history and delivers
//! every new event to all live subscribers through a tokio broadcast channel.
//! Producers never block: a subscriber that falls more than the channel
//! capacity behind skips the overwritten events and a warning is logged.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::Stream;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{
    BusSnapshot, BusStatus, EventRecord, EventType, MAX_CONTENT_CHARS, StreamEvent, StreamKind, TokenCount,
    truncate_chars,
};

/// Default history capacity (events)
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Default per-subscriber buffer before a slow subscriber starts missing events
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Mutable bus state, guarded by a single mutex
#[derive(Debug, Default)]
struct BusState {
    history: VecDeque<EventRecord>,
    next_id: u64,
    step: u32,
    status: BusStatus,
    tokens: TokenCount,
}

/// In-memory, bounded, multi-subscriber store of [`EventRecord`]s
///
/// Construct one per application and share it as `Arc<EventBus>`.
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
    state: Mutex<BusState>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    ///
    /// `capacity` bounds the history; `subscriber_buffer` bounds how far a
    /// subscriber may lag before it misses events.
    pub fn new(capacity: usize, subscriber_buffer: usize) -> Self {
        debug!(capacity, subscriber_buffer, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(subscriber_buffer.max(1));
        Self {
            tx,
            state: Mutex::new(BusState::default()),
            capacity,
        }
    }

    /// Create a new event bus with default capacities
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to history and fan out while the state lock is held, so id
    /// order and delivery order agree.
    fn emit_locked(
        &self,
        state: &mut BusState,
        event_type: EventType,
        content: &str,
        metadata: Map<String, Value>,
    ) -> EventRecord {
        let record = EventRecord {
            id: state.next_id,
            event_type,
            timestamp: Utc::now(),
            content: truncate_chars(content, MAX_CONTENT_CHARS),
            metadata,
            step: state.step,
        };
        state.next_id += 1;

        if self.capacity > 0 {
            if state.history.len() >= self.capacity {
                state.history.pop_front();
            }
            state.history.push_back(record.clone());
        }

        // No subscribers is fine
        let _ = self.tx.send(record.clone());
        record
    }

    /// Emit an event to history and all subscribers
    pub fn emit(&self, event_type: EventType, content: &str, metadata: Map<String, Value>) -> EventRecord {
        let mut state = self.lock();
        let record = self.emit_locked(&mut state, event_type, content, metadata);
        debug!(id = record.id, event_type = event_type.as_str(), "EventBus::emit");
        record
    }

    // === Convenience emitters ===

    /// A task session started
    pub fn start(&self, content: &str) -> EventRecord {
        self.emit(EventType::Start, content, icon("🚀"))
    }

    /// Agent is thinking
    pub fn thought(&self, content: &str) -> EventRecord {
        self.emit(EventType::Thought, content, icon("💭"))
    }

    /// Agent started using a tool
    pub fn tool_start(&self, tool: &str, arguments: Value) -> EventRecord {
        let mut metadata = icon("🔧");
        metadata.insert("tool".to_string(), json!(tool));
        metadata.insert("arguments".to_string(), arguments);
        self.emit(EventType::ToolStart, &format!("Using: {tool}"), metadata)
    }

    /// A tool returned a result
    pub fn tool_result(&self, tool: &str, result: &str, success: bool) -> EventRecord {
        let mut metadata = icon(if success { "✅" } else { "❌" });
        metadata.insert("tool".to_string(), json!(tool));
        metadata.insert("success".to_string(), json!(success));
        self.emit(EventType::ToolResult, result, metadata)
    }

    /// A new step started; marks the bus as running
    pub fn step_start(&self, step: u32, max_steps: u32) -> EventRecord {
        let mut state = self.lock();
        state.step = step;
        state.status = BusStatus::Running;

        let mut metadata = icon("📍");
        metadata.insert("step".to_string(), json!(step));
        metadata.insert("max_steps".to_string(), json!(max_steps));
        self.emit_locked(&mut state, EventType::Step, &format!("Step {step}/{max_steps}"), metadata)
    }

    /// Accumulate token usage
    pub fn update_tokens(&self, input: u64, output: u64) -> EventRecord {
        let mut state = self.lock();
        state.tokens.input += input;
        state.tokens.output += output;
        state.tokens.total = state.tokens.input + state.tokens.output;
        let tokens = state.tokens;

        let mut metadata = icon("📊");
        metadata.insert("tokens".to_string(), json!(tokens));
        self.emit_locked(&mut state, EventType::Tokens, &format!("Tokens: {}", tokens.total), metadata)
    }

    /// Task completed; marks the bus as idle
    pub fn complete(&self, status: &str) -> EventRecord {
        let mut state = self.lock();
        state.status = BusStatus::Idle;

        let mut metadata = icon("🏁");
        metadata.insert("status".to_string(), json!(status));
        self.emit_locked(&mut state, EventType::Complete, &format!("Task {status}"), metadata)
    }

    /// Task failed; marks the bus as errored
    pub fn error(&self, message: &str) -> EventRecord {
        let mut state = self.lock();
        state.status = BusStatus::Error;
        self.emit_locked(&mut state, EventType::Error, message, icon("❌"))
    }

    /// Mirror a streaming-session event onto the matching emitter
    ///
    /// Terminal events are not mirrored here: the session decides between
    /// [`complete`](Self::complete) and [`error`](Self::error) itself.
    pub fn record_stream_event(&self, event: &StreamEvent) -> Option<EventRecord> {
        let field_u64 = |key: &str| event.metadata.get(key).and_then(Value::as_u64);
        let field_u32 = |key: &str| field_u64(key).and_then(|n| u32::try_from(n).ok());

        let record = match event.kind {
            StreamKind::Start => self.start(&event.content),
            StreamKind::Step => match (field_u32("step"), field_u32("max_steps")) {
                (Some(step), Some(max)) => self.step_start(step, max),
                _ => self.emit(EventType::Step, &event.content, with_icon(event)),
            },
            StreamKind::Thought => self.thought(&event.content),
            StreamKind::Tool | StreamKind::Args => self.emit(EventType::ToolStart, &event.content, with_icon(event)),
            StreamKind::Result => {
                let tool = event.metadata.get("tool").and_then(Value::as_str).unwrap_or("tool");
                self.tool_result(tool, &event.content, true)
            }
            StreamKind::Tokens => match (field_u64("input"), field_u64("output")) {
                (Some(input), Some(output)) => self.update_tokens(input, output),
                _ => self.emit(EventType::Tokens, &event.content, with_icon(event)),
            },
            StreamKind::Error => self.emit(EventType::Error, &event.content, with_icon(event)),
            StreamKind::Complete => return None,
        };
        Some(record)
    }

    // === Observation ===

    /// Subscribe to every event emitted from now on
    ///
    /// Dropping the returned [`Subscription`] deregisters it.
    pub fn subscribe(&self) -> Subscription {
        debug!("EventBus::subscribe: new subscriber");
        Subscription { rx: self.tx.subscribe() }
    }

    /// Get up to `limit` most recent events, oldest first
    pub fn history(&self, limit: usize) -> Vec<EventRecord> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Clear history, counters, step and status; subscribers stay registered
    pub fn reset(&self) {
        debug!("EventBus::reset");
        *self.lock() = BusState::default();
    }

    /// Current status
    pub fn status(&self) -> BusStatus {
        self.lock().status
    }

    /// Current token totals
    pub fn tokens(&self) -> TokenCount {
        self.lock().tokens
    }

    /// Current step
    pub fn current_step(&self) -> u32 {
        self.lock().step
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Point-in-time view for status endpoints
    pub fn snapshot(&self) -> BusSnapshot {
        let state = self.lock();
        BusSnapshot {
            status: state.status,
            step: state.step,
            tokens: state.tokens,
            history_len: state.history.len(),
            subscribers: self.tx.receiver_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn icon(icon: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("icon".to_string(), json!(icon));
    metadata
}

fn with_icon(event: &StreamEvent) -> Map<String, Value> {
    let mut metadata = event.metadata.clone();
    metadata.insert("icon".to_string(), json!(event.icon));
    metadata
}

/// A live registration on the bus
///
/// Receives every event emitted after it was created. Deregisters on drop,
/// including when the consuming task is aborted.
pub struct Subscription {
    rx: broadcast::Receiver<EventRecord>,
}

impl Subscription {
    /// Wait for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Subscription: lagged behind, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already waiting
    pub fn try_recv(&mut self) -> Option<EventRecord> {
        loop {
            match self.rx.try_recv() {
                Ok(record) => return Some(record),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Subscription: lagged behind, skipped events");
                }
                Err(_) => return None,
            }
        }
    }

    /// Turn the subscription into a potentially infinite stream
    pub fn into_stream(self) -> impl Stream<Item = EventRecord> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move { sub.recv().await.map(|record| (record, sub)) })
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus(capacity: usize, subscriber_buffer: usize) -> Arc<EventBus> {
    Arc::new(EventBus::new(capacity, subscriber_buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use proptest::prelude::*;

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::new(10, 10);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.status(), BusStatus::Idle);
        assert!(bus.history(50).is_empty());
    }

    #[test]
    fn test_ids_start_at_zero_and_increase() {
        let bus = EventBus::new(10, 10);
        let a = bus.thought("one");
        let b = bus.thought("two");
        let c = bus.error("three");
        assert_eq!((a.id, b.id, c.id), (0, 1, 2));
    }

    #[test]
    fn test_ids_keep_increasing_past_capacity() {
        let bus = EventBus::new(2, 10);
        for i in 0..5 {
            assert_eq!(bus.thought("x").id, i);
        }
        let ids: Vec<u64> = bus.history(10).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_history_limit_returns_most_recent_in_order() {
        let bus = EventBus::new(100, 10);
        for i in 0..10 {
            bus.thought(&format!("t{i}"));
        }
        let recent = bus.history(3);
        let contents: Vec<&str> = recent.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["t7", "t8", "t9"]);
    }

    #[test]
    fn test_content_truncated() {
        let bus = EventBus::new(10, 10);
        let record = bus.tool_result("python_execute", &"x".repeat(2000), true);
        assert_eq!(record.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_step_start_sets_running_and_step() {
        let bus = EventBus::new(10, 10);
        assert_eq!(bus.thought("before").step, 0);

        let record = bus.step_start(3, 10);
        assert_eq!(record.step, 3);
        assert_eq!(record.content, "Step 3/10");
        assert_eq!(record.metadata["max_steps"], 10);
        assert_eq!(bus.status(), BusStatus::Running);
        assert_eq!(bus.thought("after").step, 3);
    }

    #[test]
    fn test_complete_and_error_status() {
        let bus = EventBus::new(10, 10);
        bus.step_start(1, 5);
        bus.error("boom");
        assert_eq!(bus.status(), BusStatus::Error);
        let record = bus.complete("success");
        assert_eq!(record.content, "Task success");
        assert_eq!(bus.status(), BusStatus::Idle);
    }

    #[test]
    fn test_update_tokens_accumulates() {
        let bus = EventBus::new(10, 10);
        bus.update_tokens(100, 20);
        let record = bus.update_tokens(5, 7);
        assert_eq!(record.content, "Tokens: 132");
        assert_eq!(record.metadata["tokens"]["input"], 105);
        assert_eq!(
            bus.tokens(),
            TokenCount {
                input: 105,
                output: 27,
                total: 132
            }
        );
    }

    #[test]
    fn test_tool_start_metadata() {
        let bus = EventBus::new(10, 10);
        let record = bus.tool_start("browser_use", json!({"url": "https://example.com"}));
        assert_eq!(record.event_type, EventType::ToolStart);
        assert_eq!(record.content, "Using: browser_use");
        assert_eq!(record.metadata["tool"], "browser_use");
        assert_eq!(record.metadata["arguments"]["url"], "https://example.com");
    }

    #[test]
    fn test_reset_clears_state_but_keeps_subscribers() {
        let bus = EventBus::new(10, 10);
        let mut sub = bus.subscribe();
        bus.step_start(2, 4);
        bus.update_tokens(1, 1);
        bus.reset();

        assert!(bus.history(10).is_empty());
        assert_eq!(bus.tokens(), TokenCount::default());
        assert_eq!(bus.current_step(), 0);
        assert_eq!(bus.status(), BusStatus::Idle);
        assert_eq!(bus.subscriber_count(), 1);

        // Drain pre-reset events, then the subscription keeps working
        while sub.try_recv().is_some() {}
        let record = bus.thought("fresh");
        assert_eq!(record.id, 0);
        assert_eq!(sub.try_recv().map(|r| r.content), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_subscriber_receives_only_later_events() {
        let bus = EventBus::new(10, 10);
        bus.thought("before");
        let mut sub = bus.subscribe();
        bus.thought("after");

        let record = sub.recv().await.unwrap();
        assert_eq!(record.content, "after");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_in_order() {
        let bus = EventBus::new(10, 10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for i in 0..3 {
            bus.thought(&format!("t{i}"));
        }

        for sub in [&mut rx1, &mut rx2] {
            let ids: Vec<u64> = vec![
                sub.recv().await.unwrap().id,
                sub.recv().await.unwrap().id,
                sub.recv().await.unwrap().id,
            ];
            assert_eq!(ids, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_subscription_drop_deregisters() {
        let bus = EventBus::new(10, 10);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_consumer_deregisters() {
        let bus = Arc::new(EventBus::new(10, 10));
        let stream = bus.subscribe().into_stream();
        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while stream.next().await.is_some() {}
        });
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_producer() {
        let bus = EventBus::new(100, 4);
        let mut sub = bus.subscribe();
        for i in 0..20 {
            bus.thought(&format!("t{i}"));
        }
        // Lagged events are skipped; the newest ones are still delivered
        let first = sub.recv().await.unwrap();
        assert_eq!(first.content, "t16");
        assert_eq!(bus.history(100).len(), 20);
    }

    #[test]
    fn test_record_stream_event_mapping() {
        let bus = EventBus::new(10, 10);
        let step = StreamEvent::new(StreamKind::Step, "📍", "Step 2/8")
            .with("step", 2)
            .with("max_steps", 8);
        let record = bus.record_stream_event(&step).unwrap();
        assert_eq!(record.event_type, EventType::Step);
        assert_eq!(bus.current_step(), 2);

        let tool = StreamEvent::new(StreamKind::Tool, "⚡", "Running: bash").with("tool", "bash");
        let record = bus.record_stream_event(&tool).unwrap();
        assert_eq!(record.event_type, EventType::ToolStart);
        assert_eq!(record.metadata["icon"], "⚡");

        let tokens = StreamEvent::new(StreamKind::Tokens, "📊", "Tokens: 30")
            .with("tokens", 30)
            .with("input", 20)
            .with("output", 10);
        bus.record_stream_event(&tokens);
        assert_eq!(bus.tokens().total, 30);

        assert!(bus.record_stream_event(&StreamEvent::complete("ok")).is_none());
    }

    #[test]
    fn test_out_of_range_step_is_plain_step_event() {
        let bus = EventBus::new(10, 10);
        let step = StreamEvent::new(StreamKind::Step, "📍", "Step 4294967296/4294967297")
            .with("step", u64::from(u32::MAX) + 1)
            .with("max_steps", u64::from(u32::MAX) + 2);
        let record = bus.record_stream_event(&step).unwrap();
        assert_eq!(record.event_type, EventType::Step);
        assert_eq!(record.content, "Step 4294967296/4294967297");
        assert_eq!(bus.current_step(), 0);
        assert_eq!(bus.status(), BusStatus::Idle);
    }

    #[test]
    fn test_snapshot() {
        let bus = EventBus::new(10, 10);
        let _sub = bus.subscribe();
        bus.step_start(1, 3);
        let snap = bus.snapshot();
        assert_eq!(snap.status, BusStatus::Running);
        assert_eq!(snap.step, 1);
        assert_eq!(snap.history_len, 1);
        assert_eq!(snap.subscribers, 1);
    }

    proptest! {
        #[test]
        fn prop_history_bounded_and_fifo(capacity in 1usize..20, count in 0usize..60) {
            let bus = EventBus::new(capacity, 8);
            for i in 0..count {
                bus.thought(&i.to_string());
            }
            let history = bus.history(usize::MAX);
            prop_assert!(history.len() <= capacity);
            prop_assert_eq!(history.len(), count.min(capacity));
            let expected_first = count.saturating_sub(capacity) as u64;
            if let Some(first) = history.first() {
                prop_assert_eq!(first.id, expected_first);
            }
            for pair in history.windows(2) {
                prop_assert_eq!(pair[1].id, pair[0].id + 1);
            }
        }

        #[test]
        fn prop_token_total_is_sum(calls in proptest::collection::vec((0u64..10_000, 0u64..10_000), 0..30)) {
            let bus = EventBus::new(8, 8);
            let (mut input, mut output) = (0u64, 0u64);
            for (a, b) in calls {
                input += a;
                output += b;
                bus.update_tokens(a, b);
                prop_assert_eq!(bus.tokens().total, input + output);
            }
        }

        #[test]
        fn prop_ids_restart_after_reset(before in 0usize..10, after in 1usize..10) {
            let bus = EventBus::new(4, 8);
            for _ in 0..before {
                bus.thought("x");
            }
            bus.reset();
            let ids: Vec<u64> = (0..after).map(|_| bus.thought("y").id).collect();
            prop_assert_eq!(ids, (0..after as u64).collect::<Vec<_>>());
        }
    }
}

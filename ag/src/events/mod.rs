//! Event Bus Architecture for Live Observability
//!
//! Every observable step of an agent run becomes an [`EventRecord`] on the
//! [`EventBus`]. The bus keeps a bounded history for late observers and
//! broadcasts each record to live subscribers.
//!
//! # Architecture
//!
//! ```text
//!   TaskStreamBridge        any other producer
//!   (mirrors sessions)      (direct emitter calls)
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────────────────────────────────┐
//! │                  EVENT BUS                  │
//! │  history: VecDeque (FIFO, bounded)          │
//! │  fan-out: tokio::sync::broadcast            │
//! │  counters: step, status, tokens             │
//! └─────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//!   /api/history (pull)     /api/events (SSE push)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use agentstream::events::EventBus;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let mut sub = bus.subscribe();
//!
//! bus.step_start(1, 20);
//! bus.thought("I should search the web first");
//!
//! while let Some(record) = sub.recv().await {
//!     println!("{} {}", record.id, record.content);
//! }
//! ```

mod bus;
mod types;

pub use bus::{
    DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER, EventBus, Subscription, create_event_bus,
};
pub use types::{
    BusSnapshot, BusStatus, EventRecord, EventType, MAX_CONTENT_CHARS, StreamEvent, StreamKind, TokenCount,
    truncate_chars,
};

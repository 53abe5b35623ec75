//! Event types for agent activity streaming
//!
//! Two vocabularies live here:
//! - [`EventRecord`] - the unit stored and broadcast by the [`EventBus`](super::EventBus)
//! - [`StreamEvent`] - the NDJSON object written to a streaming HTTP response

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum characters kept in an [`EventRecord`]'s content
pub const MAX_CONTENT_CHARS: usize = 500;

/// Kind of an [`EventRecord`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Thought,
    ToolStart,
    ToolResult,
    Step,
    Tokens,
    Complete,
    Error,
    Start,
}

impl EventType {
    /// Get the wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Thought => "thought",
            EventType::ToolStart => "tool_start",
            EventType::ToolResult => "tool_result",
            EventType::Step => "step",
            EventType::Tokens => "tokens",
            EventType::Complete => "complete",
            EventType::Error => "error",
            EventType::Start => "start",
        }
    }
}

/// One structured, timestamped unit of agent progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sequence number, equal to the count of events emitted before this one
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary, at most [`MAX_CONTENT_CHARS`] characters
    pub content: String,
    /// Auxiliary fields whose shape depends on `event_type`
    pub metadata: Map<String, Value>,
    /// Task step current at emission time
    pub step: u32,
}

/// Lifecycle status tracked by the bus
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusStatus {
    #[default]
    Idle,
    Running,
    Error,
}

/// Accumulated token usage for a task run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Point-in-time view of the bus, served to non-streaming observers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusSnapshot {
    pub status: BusStatus,
    pub step: u32,
    pub tokens: TokenCount,
    pub history_len: usize,
    pub subscribers: usize,
}

/// Kind of a [`StreamEvent`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Start,
    Step,
    Thought,
    Tool,
    Args,
    Result,
    Tokens,
    Error,
    Complete,
}

impl StreamKind {
    /// Whether this kind ends a streaming session
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamKind::Complete | StreamKind::Error)
    }
}

/// One object of a streaming response: `{type, icon, content, ...fields}`
///
/// Type-specific fields live in `metadata` and are flattened into the
/// top-level JSON object on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub icon: String,
    pub content: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl StreamEvent {
    /// Create an event with no extra fields
    pub fn new(kind: StreamKind, icon: &str, content: impl Into<String>) -> Self {
        Self {
            kind,
            icon: icon.to_string(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Attach an extra field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The session-opening event
    pub fn start() -> Self {
        Self::new(StreamKind::Start, "🚀", "Starting task...")
    }

    /// Successful terminal event carrying the task's result
    pub fn complete(result: impl Into<String>) -> Self {
        Self::new(StreamKind::Complete, "🏁", "Done").with("result", result.into())
    }

    /// Failed terminal event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StreamKind::Error, "❌", message)
    }

    /// Serialize as a single NDJSON line (including the trailing newline)
    pub fn to_ndjson(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{json}\n"),
            // Only reachable with non-string map keys, which Map cannot hold
            Err(e) => format!("{{\"type\":\"error\",\"icon\":\"❌\",\"content\":\"serialization error: {e}\"}}\n"),
        }
    }
}

/// Truncate to at most `max` characters, respecting char boundaries
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

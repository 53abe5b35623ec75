//! agentstream - live event streaming for long-running agent tasks
//!
//! An agent run is an opaque background task that narrates its progress in
//! free-text log lines. agentstream turns those lines into typed events while
//! the task is still running and delivers them two ways: as a chunked NDJSON
//! response for the client that started the task, and through a bounded,
//! multi-subscriber event bus for any other observer.
//!
//! # Core Concepts
//!
//! - **Span-routed logs**: a task runs inside a session span; its log lines
//!   reach only that session's queue
//! - **Ordered patterns**: the first matching pattern classifies a line,
//!   unmatched lines are dropped, malformed ones degrade to placeholders
//! - **Exactly one terminal event**: every stream ends with `complete` or
//!   `error`, whatever happened to the task
//!
//! # Modules
//!
//! - [`events`] - Event records, stream events and the event bus
//! - [`translate`] - Log line classification and the `tracing` layer
//! - [`bridge`] - Streaming sessions over a running task
//! - [`executor`] - Task executor trait and the command executor
//! - [`server`] - HTTP routes
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod bridge;
pub mod cli;
pub mod config;
pub mod events;
pub mod executor;
pub mod server;
pub mod translate;

// Re-export commonly used types
pub use bridge::{SessionOutcome, SessionRegistry, TaskStreamBridge};
pub use config::Config;
pub use events::{EventBus, EventRecord, EventType, StreamEvent, StreamKind};
pub use executor::{CommandExecutor, ExecutorError, ExecutorSlot, TaskExecutor};
pub use translate::{LogTranslator, TranslatorLayer};

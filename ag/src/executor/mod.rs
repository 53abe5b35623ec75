//! Task executor seam
//!
//! The executor performs the actual agent work and is opaque to the rest of
//! the system: it takes a prompt, eventually returns a result, and as a side
//! channel writes free-text log lines through `tracing`.

mod command;
mod probe;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

pub use command::CommandExecutor;
pub use probe::probe_dependency;

/// Errors surfaced by a task executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor initialization failed: {0}")]
    Init(String),

    /// The task ran and failed; the message is shown to users verbatim
    #[error("{0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that runs one task to completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run a task, returning its string result
    async fn run(&self, prompt: &str) -> Result<String, ExecutorError>;
}

/// Builds an executor on first use
pub type ExecutorFactory = Arc<dyn Fn() -> Result<Arc<dyn TaskExecutor>, ExecutorError> + Send + Sync>;

/// Lazily constructed, shared executor
///
/// Construction happens at most once; a failed construction is retried on
/// the next request.
pub struct ExecutorSlot {
    cell: OnceCell<Arc<dyn TaskExecutor>>,
    factory: ExecutorFactory,
}

impl ExecutorSlot {
    pub fn new(factory: ExecutorFactory) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
        }
    }

    /// A slot holding an already constructed executor
    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> Self {
        let factory_executor = Arc::clone(&executor);
        Self {
            cell: OnceCell::new_with(Some(executor)),
            factory: Arc::new(move || Ok(Arc::clone(&factory_executor))),
        }
    }

    /// Get the executor, constructing it if needed
    pub async fn get_or_init(&self) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
        self.cell
            .get_or_try_init(|| async {
                debug!("ExecutorSlot::get_or_init: constructing executor");
                (self.factory)()
            })
            .await
            .cloned()
    }

    /// Whether the executor has been constructed
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

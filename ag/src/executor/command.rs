//! Executor that runs an external agent program
//!
//! Every stdout and stderr line of the child is re-emitted as a `tracing`
//! event with target `executor`, which is how its progress reaches the
//! translator. The last non-empty stdout line is the task's result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use super::{ExecutorError, TaskExecutor};
use crate::config::ExecutorConfig;

/// Placeholder in configured arguments replaced by the prompt
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Runs a configured program once per task
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Build from configuration, checking what can be checked up front
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        debug!(program = %config.program, "CommandExecutor::from_config: called");
        if config.program.trim().is_empty() {
            return Err(ExecutorError::Init("no executor program configured".to_string()));
        }
        if let Some(dir) = &config.working_dir {
            if !dir.is_dir() {
                return Err(ExecutorError::Init(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
        })
    }

    /// Set the child's working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn prompt_in_args(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(PROMPT_PLACEHOLDER))
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn run(&self, prompt: &str) -> Result<String, ExecutorError> {
        debug!(program = %self.program, prompt_len = prompt.len(), "CommandExecutor::run: called");
        let prompt_in_args = self.prompt_in_args();

        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(|arg| arg.replace(PROMPT_PLACEHOLDER, prompt)))
            .envs(&self.env)
            .stdin(if prompt_in_args { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExecutorError::Failed(format!("Failed to start {}: {}", self.program, e)))?;

        // Stdin is written while both pipes drain
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let ((), last_stdout, last_stderr) =
            tokio::join!(write_prompt(stdin, prompt), forward_lines(stdout), forward_lines(stderr));

        let status = child.wait().await?;
        debug!(?status, "CommandExecutor::run: child exited");

        if status.success() {
            Ok(last_stdout.unwrap_or_default())
        } else {
            Err(ExecutorError::Failed(match last_stderr {
                Some(line) => format!("{} exited with {}: {}", self.program, status, line),
                None => format!("{} exited with {}", self.program, status),
            }))
        }
    }
}

/// Write the prompt and close stdin
async fn write_prompt(stdin: Option<ChildStdin>, prompt: &str) {
    let Some(mut stdin) = stdin else {
        return;
    };
    // A child that never reads stdin may already be gone
    if let Err(e) = stdin.write_all(format!("{prompt}\n").as_bytes()).await {
        debug!(error = %e, "write_prompt: prompt not delivered on stdin");
    }
}

/// Re-emit each line as a log event; returns the last non-empty line
///
/// Bytes that are not UTF-8 are replaced. A read error ends this stream
/// only.
async fn forward_lines<R>(source: Option<R>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source?);
    let mut buf = Vec::new();
    let mut last = None;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                info!(target: "executor", "{line}");
                if !line.trim().is_empty() {
                    last = Some(line.to_string());
                }
            }
            Err(e) => {
                warn!(error = %e, "forward_lines: read failed, dropping rest of stream");
                break;
            }
        }
    }
    last
}

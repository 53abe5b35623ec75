//! Integration tests for agentstream
//!
//! These tests drive whole streaming sessions through the public API, and
//! exercise the binary end to end.

use std::sync::Arc;
use std::time::Duration;

use agentstream::config::BridgeConfig;
use agentstream::events::{BusStatus, EventBus, EventType, StreamEvent, StreamKind};
use agentstream::executor::{CommandExecutor, ExecutorError, ExecutorSlot, TaskExecutor};
use agentstream::translate::{LogTranslator, TranslatorLayer};
use agentstream::{SessionRegistry, TaskStreamBridge};
use assert_cmd::Command;
use async_trait::async_trait;
use futures::StreamExt;
use predicates::prelude::*;
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logs an agent-like transcript, then returns or fails
struct TranscriptExecutor {
    outcome: Result<&'static str, &'static str>,
}

#[async_trait]
impl TaskExecutor for TranscriptExecutor {
    async fn run(&self, _prompt: &str) -> Result<String, ExecutorError> {
        let transcript = [
            "Executing step 1/3",
            "✨ Manus's thoughts: I should list the files first",
            "🛠️ Manus selected 1 tools to use",
            "🧰 Tools being prepared: ['bash']",
            "🔧 Tool arguments: {\"command\": \"ls\"}",
            "🔧 Activating tool: 'bash'...",
            "🎯 Tool 'bash' completed its mission! Result: README.md src",
            "Token usage - Input=120 Completion=30 Cumulative Input=120 Cumulative Completion=30 Total=150",
        ];
        for line in transcript {
            tracing::info!(target: "app.agent", "{line}");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        match self.outcome {
            Ok(result) => Ok(result.to_string()),
            Err(message) => Err(ExecutorError::Failed(message.to_string())),
        }
    }
}

fn bridge_for(executor: TranscriptExecutor) -> (Arc<TaskStreamBridge>, tracing::subscriber::DefaultGuard) {
    let sessions = SessionRegistry::new();
    let layer = TranslatorLayer::new(Arc::new(LogTranslator::default()), sessions.clone());
    let guard = tracing_subscriber::registry().with(layer).set_default();

    let bridge = Arc::new(TaskStreamBridge::new(
        Arc::new(ExecutorSlot::with_executor(Arc::new(executor))),
        sessions,
        Arc::new(EventBus::with_default_capacity()),
        BridgeConfig {
            poll_interval_ms: 5,
            grace_period_ms: 20,
            ..BridgeConfig::default()
        },
    ));
    (bridge, guard)
}

// =============================================================================
// Streaming Session Tests
// =============================================================================

#[tokio::test]
async fn test_successful_task_streams_in_order() {
    let (bridge, _guard) = bridge_for(TranscriptExecutor { outcome: Ok("done") });

    let events: Vec<StreamEvent> = bridge.start("list files").collect().await;
    let kinds: Vec<StreamKind> = events.iter().map(|e| e.kind).collect();

    assert_eq!(
        kinds,
        vec![
            StreamKind::Start,
            StreamKind::Step,
            StreamKind::Thought,
            StreamKind::Tool,
            StreamKind::Tool,
            StreamKind::Args,
            StreamKind::Tool,
            StreamKind::Result,
            StreamKind::Tokens,
            StreamKind::Complete,
        ]
    );
    assert_eq!(events[2].content, "I should list the files first");
    assert_eq!(events[6].content, "Running: bash");
    assert_eq!(events[7].content, "README.md src");
    assert_eq!(events[8].content, "Tokens: 150");

    let last = events.last().expect("stream ends with a terminal event");
    assert_eq!(last.metadata["result"], "done");
    assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_failed_task_ends_with_error() {
    let (bridge, _guard) = bridge_for(TranscriptExecutor {
        outcome: Err("Browser crashed"),
    });

    let events: Vec<StreamEvent> = bridge.start("browse").collect().await;
    let last = events.last().expect("stream ends with a terminal event");

    assert_eq!(last.kind, StreamKind::Error);
    assert_eq!(last.content, "Browser crashed");
    assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    assert_eq!(bridge.bus().status(), BusStatus::Error);
}

#[tokio::test]
async fn test_bus_history_mirrors_session() {
    let (bridge, _guard) = bridge_for(TranscriptExecutor { outcome: Ok("done") });
    let mut subscription = bridge.bus().subscribe();

    let _events: Vec<StreamEvent> = bridge.start("list files").collect().await;

    let history = bridge.bus().history(100);
    let types: Vec<EventType> = history.iter().map(|r| r.event_type).collect();
    assert_eq!(types.first(), Some(&EventType::Start));
    assert_eq!(types.last(), Some(&EventType::Complete));
    assert!(history.windows(2).all(|pair| pair[0].id < pair[1].id));

    let tokens = bridge.bus().tokens();
    assert_eq!((tokens.input, tokens.output, tokens.total), (120, 30, 150));

    // A subscriber registered before the session saw every record
    let mut received = Vec::new();
    while let Some(record) = subscription.try_recv() {
        received.push(record.id);
    }
    assert_eq!(received, history.iter().map(|r| r.id).collect::<Vec<_>>());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_executor_session() {
    let sessions = SessionRegistry::new();
    let layer = TranslatorLayer::new(Arc::new(LogTranslator::default()), sessions.clone());
    let _guard = tracing_subscriber::registry().with(layer).set_default();

    let executor = CommandExecutor::new(
        "sh",
        vec![
            "-c".to_string(),
            "echo 'Executing step 1/1'; echo 'ERROR: disk almost full' >&2; echo 'all good'".to_string(),
        ],
    );
    let bridge = Arc::new(TaskStreamBridge::new(
        Arc::new(ExecutorSlot::with_executor(Arc::new(executor))),
        sessions,
        Arc::new(EventBus::with_default_capacity()),
        BridgeConfig {
            poll_interval_ms: 5,
            grace_period_ms: 20,
            ..BridgeConfig::default()
        },
    ));

    let events: Vec<StreamEvent> = bridge.start("x").collect().await;
    let kinds: Vec<StreamKind> = events.iter().map(|e| e.kind).collect();

    assert_eq!(kinds.first(), Some(&StreamKind::Start));
    assert!(kinds.contains(&StreamKind::Step));
    assert!(kinds.contains(&StreamKind::Error));
    let last = events.last().expect("stream ends with a terminal event");
    assert_eq!(last.kind, StreamKind::Complete);
    assert_eq!(last.metadata["result"], "all good");
}

// =============================================================================
// CLI Tests
// =============================================================================

fn agentstream(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("agentstream").expect("binary is built");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"));
    cmd
}

#[test]
fn test_cli_translate_stdin() {
    let home = TempDir::new().expect("Failed to create temp dir");

    agentstream(&home)
        .arg("translate")
        .write_stdin("Executing step 3/10\nnothing to see\nToken usage - Total=1523\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"step""#))
        .stdout(predicate::str::contains(r#""content":"Step 3/10""#))
        .stdout(predicate::str::contains(r#""tokens":1523"#))
        .stdout(predicate::str::contains("nothing to see").not());
}

#[test]
fn test_cli_translate_file() {
    let home = TempDir::new().expect("Failed to create temp dir");
    let log = home.path().join("agent.log");
    std::fs::write(&log, "✨ Manus's thoughts: first line\nsecond line\n").expect("write log");

    agentstream(&home)
        .arg("translate")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"thought""#))
        .stdout(predicate::str::contains(r#""content":"first line""#))
        .stdout(predicate::str::contains("second line").not());
}

#[test]
fn test_cli_translate_rejects_bad_thought_capture() {
    let home = TempDir::new().expect("Failed to create temp dir");
    let config = home.path().join("agentstream.yml");
    std::fs::write(&config, "translator:\n  thought-capture: sideways\n").expect("write config");

    agentstream(&home)
        .arg("--config")
        .arg(&config)
        .arg("translate")
        .write_stdin("Executing step 1/2\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_cli_translate_missing_file_fails() {
    let home = TempDir::new().expect("Failed to create temp dir");

    agentstream(&home)
        .args(["translate", "does-not-exist.log"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}

#[cfg(unix)]
#[test]
fn test_cli_status_reports_dependency_check() {
    let home = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(home.path().join(".agentstream.yml"), "executor:\n  probe: [\"false\"]\n").expect("write config");

    agentstream(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""executor_dependency_ok": false"#))
        .stdout(predicate::str::contains(r#""agent_initialized": false"#));
}

#[cfg(unix)]
#[test]
fn test_cli_run_prints_ndjson() {
    let home = TempDir::new().expect("Failed to create temp dir");
    let config = concat!(
        "executor:\n",
        "  program: sh\n",
        "  args: [\"-c\", \"echo 'Executing step 1/1'; echo '{prompt} done'\"]\n",
        "bridge:\n",
        "  grace-period-ms: 20\n",
    );
    std::fs::write(home.path().join(".agentstream.yml"), config).expect("write config");

    agentstream(&home)
        .args(["run", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(r#"{"type":"start""#))
        .stdout(predicate::str::contains(r#""content":"Step 1/1""#))
        .stdout(predicate::str::contains(r#""result":"hello done""#));
}

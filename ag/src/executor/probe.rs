//! Reachability check for the executor's runtime dependency

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Run `command` and report whether it exits successfully within `timeout`
///
/// An empty command, a spawn failure, a timeout and a non-zero exit all
/// count as unreachable.
pub async fn probe_dependency(command: &[String], timeout: Duration) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    let ok = matches!(tokio::time::timeout(timeout, status).await, Ok(Ok(status)) if status.success());
    debug!(%program, ok, "probe_dependency: finished");
    ok
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_successful_probe() {
        assert!(probe_dependency(&cmd(&["true"]), Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_failing_probe() {
        assert!(!probe_dependency(&cmd(&["false"]), Duration::from_secs(5)).await);
        assert!(!probe_dependency(&cmd(&["/no/such/binary"]), Duration::from_secs(5)).await);
        assert!(!probe_dependency(&[], Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        assert!(!probe_dependency(&cmd(&["sleep", "5"]), Duration::from_millis(50)).await);
    }
}

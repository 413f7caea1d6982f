//! Process runner
//!
//! Spawns one external process with captured stdio, enforces a timeout
//! with a graceful-then-forceful kill ladder, and resolves with the
//! exit code and tail-bounded output. Command, test, lint and debug
//! launch paths all go through here.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::DaemonError;

/// Delay between the graceful signal and the forceful kill.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a completed run. A non-zero exit code is a successful
/// run with a failure result, not a runner error.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run a process to completion under `timeout_ms`, keeping at most
/// `max_output_bytes` of each stream (tail-kept).
pub async fn run(
    command: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    timeout_ms: u64,
    max_output_bytes: usize,
) -> Result<RunOutput, DaemonError> {
    let mut child = spawn(command, args, cwd, env)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_tail(stdout, max_output_bytes));
    let stderr_task = tokio::spawn(read_tail(stderr, max_output_bytes));

    let waited = timeout(Duration::from_millis(timeout_ms), child.wait()).await;

    match waited {
        Ok(Ok(status)) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(RunOutput {
                exit_code: status.code().unwrap_or(0),
                stdout,
                stderr,
            })
        }
        Ok(Err(e)) => Err(DaemonError::Internal(format!(
            "Failed to wait on {command}: {e}"
        ))),
        Err(_) => {
            warn!("Process timed out after {timeout_ms}ms: {command}");
            escalate_kill(child);
            stdout_task.abort();
            stderr_task.abort();
            Err(DaemonError::Timeout(format!(
                "Command timed out after {timeout_ms}ms: {command}"
            )))
        }
    }
}

/// Spawn with piped stdio. Spawn-level failures (binary missing,
/// permission denied) are distinct from non-zero exits.
pub fn spawn(
    command: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> Result<Child, DaemonError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in env {
        cmd.env(k, v);
    }

    cmd.spawn()
        .map_err(|e| DaemonError::Spawn(format!("Failed to spawn {command}: {e}")))
}

/// Send the graceful signal now and schedule a forceful kill after the
/// grace window. The caller does not wait for the kill to land.
pub fn escalate_kill(mut child: Child) {
    send_term(&child);
    tokio::spawn(async move {
        tokio::time::sleep(KILL_GRACE).await;
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                debug!("Grace window expired, killing process");
                let _ = child.kill().await;
            }
        }
    });
}

/// Graceful close used by session teardown: SIGTERM, wait up to the
/// grace window, then SIGKILL. Returns the exit code when observed.
pub async fn terminate(child: &mut Child) -> Option<i32> {
    send_term(child);
    match timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        _ => {
            let _ = child.kill().await;
            child.try_wait().ok().flatten().and_then(|s| s.code())
        }
    }
}

#[cfg(unix)]
fn send_term(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to signal pid {pid}: {e}");
        }
    }
}

#[cfg(not(unix))]
fn send_term(_child: &Child) {}

async fn read_tail(
    stream: Option<impl tokio::io::AsyncRead + Unpin>,
    max_bytes: usize,
) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => push_tail(&mut tail, &chunk[..n], max_bytes),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&tail).to_string()
}

/// Append keeping at most `max` bytes; large output loses its earliest
/// bytes, not its latest.
fn push_tail(buf: &mut Vec<u8>, chunk: &[u8], max: usize) {
    buf.extend_from_slice(chunk);
    if buf.len() > max {
        let excess = buf.len() - max;
        buf.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::{push_tail, run};
    use crate::error::DaemonError;
    use std::collections::HashMap;
    use std::path::Path;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn echo_completes_with_stdout() {
        let out = run(
            "echo",
            &["hi".to_string()],
            Path::new("/tmp"),
            &no_env(),
            5_000,
            64 * 1024,
        )
        .await
        .unwrap();

        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_a_runner_error() {
        let out = run(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            Path::new("/tmp"),
            &no_env(),
            5_000,
            64 * 1024,
        )
        .await
        .unwrap();

        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run(
            "definitely-not-a-real-binary",
            &[],
            Path::new("/tmp"),
            &no_env(),
            5_000,
            64 * 1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DaemonError::Spawn(_)));
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let err = run(
            "sleep",
            &["5".to_string()],
            Path::new("/tmp"),
            &no_env(),
            100,
            64 * 1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DaemonError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_delivers_the_graceful_signal_first() {
        // The trap only runs on SIGTERM; SIGKILL would leave no marker.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("terminated");
        let script = format!(
            "trap 'touch {}; exit 0' TERM; sleep 5 & wait",
            marker.display()
        );

        let err = run(
            "sh",
            &["-c".to_string(), script],
            dir.path(),
            &no_env(),
            200,
            64 * 1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::Timeout(_)));

        // The runner returns before the signal necessarily lands; give
        // the trap a moment, well inside the kill grace window.
        for _ in 0..30 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn output_is_tail_bounded() {
        let out = run(
            "sh",
            &["-c".to_string(), "printf 'a%.0s' $(seq 1 1000); echo END".to_string()],
            Path::new("/tmp"),
            &no_env(),
            5_000,
            128,
        )
        .await
        .unwrap();

        assert!(out.stdout.len() <= 128);
        assert!(out.stdout.contains("END"));
    }

    #[test]
    fn push_tail_keeps_latest_bytes() {
        let mut buf = Vec::new();
        push_tail(&mut buf, b"0123456789", 4);
        assert_eq!(buf, b"6789");
        push_tail(&mut buf, b"ab", 4);
        assert_eq!(buf, b"89ab");
    }
}

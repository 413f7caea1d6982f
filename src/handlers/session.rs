//! Debug session orchestrator: open, close, list, remove.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapter::launch_invocation;
use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::runner;
use crate::session::{DebugSession, SessionStatus};
use crate::state::{watch_session_process, DaemonState, SessionEntry};

/// How long a freshly spawned debugger may take before the session is
/// considered started. An exit inside this window is a launch failure.
const STARTUP_WINDOW: Duration = Duration::from_millis(1_000);

pub async fn handle_open(request: &Request, state: Arc<DaemonState>) -> String {
    let id = request.id;
    match parse_params::<DebugOpenParams>(request) {
        Ok(params) => respond(id, open(state, params).await),
        Err(e) => respond::<DebugSession>(id, Err(e)),
    }
}

async fn open(state: Arc<DaemonState>, params: DebugOpenParams) -> Result<DebugSession, DaemonError> {
    let cwd = resolve_cwd(&state, params.cwd.as_deref())?;
    let entry_abs = resolve_entry(&state, &cwd, &params.entry)?;
    let launch = launch_invocation(params.kind, &entry_abs.to_string_lossy(), &params.args)?;

    let mut child = runner::spawn(&launch.command, &launch.args, &cwd, &params.env)?;

    // Bounded startup window: a debugger that dies immediately is a
    // failed open, not a session.
    tokio::time::sleep(STARTUP_WINDOW).await;
    if let Ok(Some(status)) = child.try_wait() {
        return Err(DaemonError::Spawn(format!(
            "Debugger exited during startup with code {:?}: {}",
            status.code(),
            launch.command
        )));
    }

    let mut session = DebugSession::new(
        params.kind,
        cwd.to_string_lossy().to_string(),
        entry_abs.to_string_lossy().to_string(),
        params.args,
        params.env,
    );
    session.transition(SessionStatus::Running)?;
    session.current_line = Some(1);

    let session_id = session.id.clone();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    state.sessions.write().await.insert(
        session_id.clone(),
        SessionEntry {
            session: session.clone(),
            child: Some(child),
        },
    );
    watch_session_process(state.clone(), session_id.clone(), stdout, stderr);

    info!("Opened {} session {}", params.kind.as_str(), session_id);
    state
        .log(
            LogLevel::Info,
            format!("debug:{session_id}"),
            format!("Session opened with {}", launch.command),
            Some(serde_json::json!({
                "kind": params.kind.as_str(),
                "mime": crate::sandbox::Sandbox::mime_for_path(&entry_abs),
            })),
        )
        .await;

    Ok(session)
}

pub async fn handle_close(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<SessionIdParams>(request) {
        Ok(params) => respond(id, close(state, &params.session_id).await),
        Err(e) => respond::<DebugSession>(id, Err(e)),
    }
}

async fn close(state: &DaemonState, session_id: &str) -> Result<DebugSession, DaemonError> {
    // Take the child out of the entry so the grace-window wait runs
    // without holding the registry lock.
    let child = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;
        entry.child.take()
    };

    let exit_code = match child {
        Some(mut child) => runner::terminate(&mut child).await,
        None => None,
    };

    let snapshot = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;
        if !entry.session.status.is_terminal() {
            entry.session.transition(SessionStatus::Stopped)?;
            entry.session.exit_code = exit_code;
        }
        entry.session.clone()
    };

    info!("Closed session {session_id} (exit code {exit_code:?})");
    state
        .log(
            LogLevel::Info,
            format!("debug:{session_id}"),
            "Session closed",
            Some(serde_json::json!({ "exitCode": exit_code })),
        )
        .await;

    Ok(snapshot)
}

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    let params = if request.params.is_null() {
        DebugListParams { filter: None }
    } else {
        match parse_params::<DebugListParams>(request) {
            Ok(p) => p,
            Err(e) => return respond::<Vec<DebugSession>>(id, Err(e)),
        }
    };
    respond(id, list(state, params.filter.as_deref()).await)
}

async fn list(state: &DaemonState, filter: Option<&str>) -> Result<Vec<DebugSession>, DaemonError> {
    let filter = filter.unwrap_or("all");
    let predicate: fn(SessionStatus) -> bool = match filter {
        "all" => |_| true,
        "active" => |s| {
            matches!(
                s,
                SessionStatus::Starting | SessionStatus::Running | SessionStatus::Paused
            )
        },
        "paused" => |s| s == SessionStatus::Paused,
        "stopped" => |s| s == SessionStatus::Stopped,
        other => {
            return Err(DaemonError::Validation(format!(
                "Unknown session filter: {other}"
            )))
        }
    };

    Ok(state.list_sessions(predicate).await)
}

pub async fn handle_remove(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<SessionIdParams>(request) {
        Ok(params) => respond(id, remove(state, &params.session_id).await),
        Err(e) => respond::<serde_json::Value>(id, Err(e)),
    }
}

async fn remove(state: &DaemonState, session_id: &str) -> Result<serde_json::Value, DaemonError> {
    let mut sessions = state.sessions.write().await;
    let entry = sessions
        .get(session_id)
        .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;

    if !entry.session.status.is_terminal() {
        return Err(DaemonError::Validation(format!(
            "Session {session_id} is still {:?}; close it first",
            entry.session.status
        )));
    }

    sessions.remove(session_id);
    Ok(serde_json::json!({ "removed": true }))
}

fn resolve_cwd(state: &DaemonState, cwd: Option<&str>) -> Result<PathBuf, DaemonError> {
    match cwd {
        Some(cwd) => {
            let resolved = state.sandbox.resolve_path(cwd)?;
            if !resolved.is_dir() {
                return Err(DaemonError::Validation(format!(
                    "Working directory is not a directory: {cwd}"
                )));
            }
            Ok(resolved)
        }
        None => Ok(state.sandbox.root().to_path_buf()),
    }
}

fn resolve_entry(
    state: &DaemonState,
    cwd: &PathBuf,
    entry: &str,
) -> Result<PathBuf, DaemonError> {
    let candidate = {
        let p = std::path::Path::new(entry);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            cwd.join(p)
        }
    };
    let resolved = state.sandbox.resolve_path(&candidate.to_string_lossy())?;
    if !resolved.is_file() {
        return Err(DaemonError::NotFound(format!(
            "Entry point is not a file: {entry}"
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::{close, list, open, remove};
    use crate::config::Limits;
    use crate::error::DaemonError;
    use crate::protocol::DebugOpenParams;
    use crate::sandbox::Sandbox;
    use crate::session::{RuntimeKind, SessionStatus};
    use crate::state::DaemonState;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state_in(dir: &std::path::Path) -> Arc<DaemonState> {
        Arc::new(DaemonState::new(
            None,
            Limits {
                enable_patches: true,
                enable_commands: true,
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(dir.to_path_buf(), None, None),
        ))
    }

    fn open_params(kind: RuntimeKind, entry: &str) -> DebugOpenParams {
        DebugOpenParams {
            kind,
            entry: entry.to_string(),
            cwd: None,
            args: vec![],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn missing_entry_registers_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let err = open(state.clone(), open_params(RuntimeKind::Node, "missing.js"))
            .await
            .unwrap_err();

        assert!(matches!(err, DaemonError::NotFound(_)));
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn csharp_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Program.cs"), "class P {}\n").unwrap();
        let state = state_in(dir.path());

        let err = open(state.clone(), open_params(RuntimeKind::Csharp, "Program.cs"))
            .await
            .unwrap_err();

        assert!(matches!(err, DaemonError::Unsupported(_)));
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn close_of_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let err = close(&state, "nope").await.unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_rejects_unknown_filter() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        assert!(list(&state, Some("bogus")).await.is_err());
        assert!(list(&state, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_requires_terminal_session() {
        use crate::session::DebugSession;
        use crate::state::SessionEntry;

        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let mut session = DebugSession::new(
            RuntimeKind::Node,
            "/tmp".to_string(),
            "app.js".to_string(),
            vec![],
            HashMap::new(),
        );
        session.transition(SessionStatus::Running).unwrap();
        let id = session.id.clone();
        state
            .sessions
            .write()
            .await
            .insert(id.clone(), SessionEntry { session, child: None });

        let err = remove(&state, &id).await.unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));

        close(&state, &id).await.unwrap();
        remove(&state, &id).await.unwrap();
        assert!(state.sessions.read().await.is_empty());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use crate::adapter::{DebugAdapter, SimulatedAdapter};
use crate::config::Limits;
use crate::logstore::{LogLevel, LogStore};
use crate::protocol::{Event, SessionExitedParams, EVENT_SESSION_EXITED};
use crate::sandbox::Sandbox;
use crate::session::{
    CommandExecution, DebugSession, LintReport, PendingAction, SessionStatus, TestReport,
};

/// Unique client identifier
pub type ClientId = u64;

/// Channel for sending events to a client
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Registry entry pairing the logical session record with the owned
/// process handle. The handle is dropped on exit; the record stays
/// queryable until explicitly removed.
pub struct SessionEntry {
    pub session: DebugSession,
    pub child: Option<Child>,
}

/// Daemon-wide shared state: the sandbox policy, every registry, and
/// the adapter strategy. Constructed empty at startup, dropped on
/// shutdown; nothing persists across restarts.
pub struct DaemonState {
    /// Token for authentication (None if auth disabled)
    pub token: Option<String>,

    pub limits: Limits,
    pub sandbox: Sandbox,
    pub adapter: Box<dyn DebugAdapter>,

    /// Debug sessions (sessionId → record + live child handle)
    pub sessions: RwLock<HashMap<String, SessionEntry>>,

    /// Command executions (executionId → record)
    pub commands: RwLock<HashMap<String, CommandExecution>>,

    /// Test reports (reportId → record)
    pub test_reports: RwLock<HashMap<String, TestReport>>,

    /// Lint reports (reportId → record)
    pub lint_reports: RwLock<HashMap<String, LintReport>>,

    /// Confirmation-gated actions (pendingId → patch or commit)
    pub pending: RwLock<HashMap<String, PendingAction>>,

    pub logs: LogStore,

    /// Client event senders (ClientId → sender)
    pub clients: RwLock<HashMap<ClientId, ClientSender>>,

    /// Next client ID counter
    next_client_id: Mutex<ClientId>,
}

impl DaemonState {
    pub fn new(token: Option<String>, limits: Limits, sandbox: Sandbox) -> Self {
        Self {
            token,
            limits,
            sandbox,
            adapter: Box::new(SimulatedAdapter::new()),
            sessions: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            test_reports: RwLock::new(HashMap::new()),
            lint_reports: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            logs: LogStore::new(),
            clients: RwLock::new(HashMap::new()),
            next_client_id: Mutex::new(1),
        }
    }

    /// Register a new client, returning its ID and event receiver
    pub async fn register_client(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let mut id = self.next_client_id.lock().await;
        let client_id = *id;
        *id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(client_id, tx);

        (client_id, rx)
    }

    pub async fn unregister_client(&self, client_id: ClientId) {
        self.clients.write().await.remove(&client_id);
    }

    /// Broadcast a message to all connected clients
    pub async fn broadcast_to_all_clients(&self, msg: String) {
        let clients = self.clients.read().await;
        for tx in clients.values() {
            let _ = tx.send(msg.clone());
        }
    }

    /// Snapshot of a session record by id
    pub async fn get_session(&self, session_id: &str) -> Option<DebugSession> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.session.clone())
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Snapshot of all sessions, optionally filtered by status
    pub async fn list_sessions(
        &self,
        filter: impl Fn(SessionStatus) -> bool,
    ) -> Vec<DebugSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|e| filter(e.session.status))
            .map(|e| e.session.clone())
            .collect()
    }

    /// Append process output to a session's captured streams,
    /// tail-bounded by the configured output cap.
    pub async fn append_session_output(&self, session_id: &str, stderr: bool, chunk: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            let buf = if stderr {
                &mut entry.session.stderr
            } else {
                &mut entry.session.stdout
            };
            buf.push_str(chunk);
            let max = self.limits.max_output_bytes;
            if buf.len() > max {
                let excess = buf.len() - max;
                // Keep the tail on a char boundary.
                let cut = (excess..buf.len())
                    .find(|i| buf.is_char_boundary(*i))
                    .unwrap_or(buf.len());
                buf.drain(..cut);
            }
            entry.session.touch();
        }
    }

    /// Asynchronous terminal transition when a session's process dies
    /// without an explicit close. Valid from any non-terminal state.
    pub async fn mark_session_exited(&self, session_id: &str, exit_code: Option<i32>) {
        {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(session_id) else {
                return;
            };
            if entry.session.status.is_terminal() {
                return;
            }
            let _ = entry.session.transition(SessionStatus::Stopped);
            entry.session.exit_code = exit_code;
            entry.child = None;
        }

        info!("Session {session_id} process exited with code {exit_code:?}");
        self.log(
            LogLevel::Info,
            format!("debug:{session_id}"),
            "Process exited",
            Some(serde_json::json!({ "exitCode": exit_code })),
        )
        .await;

        let event = Event::new(
            EVENT_SESSION_EXITED,
            SessionExitedParams {
                session_id: session_id.to_string(),
                exit_code,
            },
        );
        if let Ok(msg) = serde_json::to_string(&event) {
            self.broadcast_to_all_clients(msg).await;
        }
    }

    /// Structured entry into the in-process log store.
    pub async fn log(
        &self,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        self.logs.add(level, source, message, data).await;
    }
}

/// Watch a spawned session process: stream stdout/stderr into the
/// session record and mark the session stopped when it exits.
pub fn watch_session_process(
    state: Arc<DaemonState>,
    session_id: String,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) {
    use tokio::io::AsyncReadExt;

    if let Some(mut out) = stdout {
        let state = state.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            while let Ok(n) = out.read(&mut chunk).await {
                if n == 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&chunk[..n]).to_string();
                state.append_session_output(&id, false, &text).await;
            }
        });
    }

    if let Some(mut err) = stderr {
        let state = state.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            while let Ok(n) = err.read(&mut chunk).await {
                if n == 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&chunk[..n]).to_string();
                state.append_session_output(&id, true, &text).await;
            }
        });
    }

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            let exited = {
                let mut sessions = state.sessions.write().await;
                match sessions.get_mut(&session_id) {
                    Some(entry) => match entry.child.as_mut() {
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => Some(status.code()),
                            Ok(None) => None,
                            Err(_) => Some(None),
                        },
                        // Closed explicitly; nothing left to watch.
                        None => break,
                    },
                    None => break,
                }
            };
            if let Some(code) = exited {
                state.mark_session_exited(&session_id, code).await;
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::{DaemonState, SessionEntry};
    use crate::config::Limits;
    use crate::sandbox::Sandbox;
    use crate::session::{DebugSession, RuntimeKind, SessionStatus};
    use std::collections::HashMap;

    fn test_state() -> DaemonState {
        let dir = std::env::temp_dir();
        DaemonState::new(
            None,
            Limits {
                enable_patches: true,
                enable_commands: true,
                timeout_ms: 5_000,
                max_output_bytes: 64,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(dir, None, None),
        )
    }

    fn test_session() -> DebugSession {
        let mut s = DebugSession::new(
            RuntimeKind::Node,
            "/tmp".to_string(),
            "app.js".to_string(),
            vec![],
            HashMap::new(),
        );
        s.transition(SessionStatus::Running).unwrap();
        s
    }

    #[tokio::test]
    async fn exit_marks_session_stopped_and_keeps_record() {
        let state = test_state();
        let session = test_session();
        let id = session.id.clone();
        state
            .sessions
            .write()
            .await
            .insert(id.clone(), SessionEntry { session, child: None });

        state.mark_session_exited(&id, Some(0)).await;

        let session = state.get_session(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(session.exit_code, Some(0));
    }

    #[tokio::test]
    async fn exit_is_a_no_op_on_terminal_sessions() {
        let state = test_state();
        let mut session = test_session();
        session.transition(SessionStatus::Stopped).unwrap();
        session.exit_code = Some(3);
        let id = session.id.clone();
        state
            .sessions
            .write()
            .await
            .insert(id.clone(), SessionEntry { session, child: None });

        state.mark_session_exited(&id, Some(0)).await;

        let session = state.get_session(&id).await.unwrap();
        assert_eq!(session.exit_code, Some(3));
    }

    #[tokio::test]
    async fn session_output_is_tail_bounded() {
        let state = test_state();
        let session = test_session();
        let id = session.id.clone();
        state
            .sessions
            .write()
            .await
            .insert(id.clone(), SessionEntry { session, child: None });

        state.append_session_output(&id, false, &"x".repeat(100)).await;
        state.append_session_output(&id, false, "TAIL").await;

        let session = state.get_session(&id).await.unwrap();
        assert!(session.stdout.len() <= 64);
        assert!(session.stdout.ends_with("TAIL"));
    }

    #[tokio::test]
    async fn list_sessions_filters_by_status() {
        let state = test_state();
        let running = test_session();
        let mut stopped = test_session();
        stopped.transition(SessionStatus::Stopped).unwrap();

        for s in [running, stopped] {
            state
                .sessions
                .write()
                .await
                .insert(s.id.clone(), SessionEntry { session: s, child: None });
        }

        let active = state
            .list_sessions(|s| !s.is_terminal())
            .await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, SessionStatus::Running);
    }
}

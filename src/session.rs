//! Domain records tracked by the registries: debug sessions and their
//! breakpoints, command executions, test/lint reports, and the pending
//! confirmation actions shared by patches and commits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Node,
    Python,
    Go,
    Java,
    Csharp,
    Cpp,
    Php,
    Ruby,
    Rust,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
            RuntimeKind::Go => "go",
            RuntimeKind::Java => "java",
            RuntimeKind::Csharp => "csharp",
            RuntimeKind::Cpp => "cpp",
            RuntimeKind::Php => "php",
            RuntimeKind::Ruby => "ruby",
            RuntimeKind::Rust => "rust",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Paused,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Error)
    }

    /// Valid edges: starting→running, running⇄paused, any non-terminal
    /// →stopped, any→error. Stopped and error are terminal.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, SessionStatus::Error) => true,
            (_, SessionStatus::Stopped) => true,
            (SessionStatus::Starting, SessionStatus::Running) => true,
            (SessionStatus::Running, SessionStatus::Paused) => true,
            (SessionStatus::Paused, SessionStatus::Running) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub enabled: bool,
    pub hit_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: u32,
    pub name: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: u32,
    pub name: String,
}

/// One logical debugging attempt. The registry pairs this record with
/// the owned process handle while the child is alive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub id: String,
    pub kind: RuntimeKind,
    pub cwd: String,
    pub entry_point: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub breakpoints: Vec<Breakpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<StackFrame>,
    pub threads: Vec<ThreadInfo>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_line: Option<u32>,
}

impl DebugSession {
    pub fn new(
        kind: RuntimeKind,
        cwd: String,
        entry_point: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            cwd,
            entry_point,
            args,
            env,
            status: SessionStatus::Starting,
            created_at: now,
            last_activity: now,
            breakpoints: Vec::new(),
            current_frame: None,
            threads: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            current_line: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Guarded status change along the transition graph.
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), DaemonError> {
        if !self.status.can_transition(to) {
            return Err(DaemonError::Validation(format!(
                "Session {} cannot go from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        self.touch();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecution {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CommandExecution {
    pub fn started(command: String, args: Vec<String>, cwd: String, timeout_ms: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command,
            args,
            cwd,
            status: CommandStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub id: String,
    pub runner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub status: ReportStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: TestSummary,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintIssue {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub id: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub status: ReportStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub issues: Vec<LintIssue>,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Range,
    Diff,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPatch {
    pub id: String,
    pub file: String,
    pub kind: PatchKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    pub applied: bool,
    #[serde(skip)]
    pub backup: Option<String>,
    pub requires_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommit {
    pub id: String,
    pub message: String,
    pub paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Confirmation-gated mutation. Patches and git commits park here
/// until confirmed or rejected; both outcomes are terminal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum PendingAction {
    Patch(PendingPatch),
    Commit(PendingCommit),
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::DaemonError;
use crate::session::{PatchKind, RuntimeKind};

/// JSON-RPC request from client
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub id: u64,
    pub result: Value,
}

/// JSON-RPC error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub id: u64,
    pub error: RpcError,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
}

/// Server→Client event (no id)
#[derive(Debug, Serialize)]
pub struct Event {
    pub method: &'static str,
    pub params: Value,
}

// Connection-level error codes; operation errors use DaemonError::code
pub const AUTH_REQUIRED: &str = "auth_required";
pub const AUTH_FAILED: &str = "auth_failed";
pub const INVALID_PARAMS: &str = "invalid_params";

// Method names
pub const METHOD_AUTH: &str = "auth";
pub const METHOD_DEBUG_OPEN: &str = "debug_open";
pub const METHOD_DEBUG_CLOSE: &str = "debug_close";
pub const METHOD_DEBUG_LIST: &str = "debug_list";
pub const METHOD_DEBUG_REMOVE: &str = "debug_remove";
pub const METHOD_DEBUG_CONTINUE: &str = "debug_continue";
pub const METHOD_DEBUG_STEP: &str = "debug_step";
pub const METHOD_DEBUG_PAUSE: &str = "debug_pause";
pub const METHOD_DEBUG_EVALUATE: &str = "debug_evaluate";
pub const METHOD_BREAKPOINT_SET: &str = "breakpoint_set";
pub const METHOD_BREAKPOINT_CLEAR: &str = "breakpoint_clear";
pub const METHOD_BREAKPOINT_LIST: &str = "breakpoint_list";
pub const METHOD_BREAKPOINT_TOGGLE: &str = "breakpoint_toggle";
pub const METHOD_COMMAND_RUN: &str = "command_run";
pub const METHOD_COMMAND_LIST: &str = "command_list";
pub const METHOD_TEST_RUN: &str = "test_run";
pub const METHOD_LINT_RUN: &str = "lint_run";
pub const METHOD_PATCH_APPLY: &str = "patch_apply";
pub const METHOD_PATCH_PENDING: &str = "patch_pending";
pub const METHOD_CONFIRM: &str = "confirm";
pub const METHOD_REJECT: &str = "reject";
pub const METHOD_GIT_STATUS: &str = "git_status";
pub const METHOD_GIT_DIFF: &str = "git_diff";
pub const METHOD_GIT_COMMIT: &str = "git_commit";
pub const METHOD_LOG_QUERY: &str = "log_query";

// Event names
pub const EVENT_SESSION_EXITED: &str = "session_exited";

// --- Request params ---

#[derive(Debug, Deserialize)]
pub struct AuthParams {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugOpenParams {
    pub kind: RuntimeKind,
    pub entry: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugListParams {
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStepParams {
    pub session_id: String,
    pub mode: crate::adapter::StepMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvaluateParams {
    pub session_id: String,
    pub expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointSetParams {
    pub session_id: String,
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointIdParams {
    pub session_id: String,
    pub breakpoint_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointListParams {
    pub session_id: String,
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRunParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunParams {
    pub runner: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintRunParams {
    pub tool: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub fix: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchApplyParams {
    pub file: String,
    pub kind: PatchKind,
    pub content: String,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmParams {
    pub pending_id: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectParams {
    pub pending_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitDiffParams {
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommitParams {
    pub message: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
}

// --- Response types ---

#[derive(Debug, Serialize)]
pub struct AuthResult {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResult {
    pub pending_id: String,
    pub requires_confirmation: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchApplied {
    pub patch_id: String,
    pub file: String,
    pub applied: bool,
    pub lines_replaced: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectResult {
    pub rejected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitFileStatus {
    pub path: String,
    pub status: String,
    pub additions: i32,
    pub deletions: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatusResult {
    pub is_repository: bool,
    pub branch_name: String,
    pub staged_files: Vec<GitFileStatus>,
    pub unstaged_files: Vec<GitFileStatus>,
    pub total_additions: i32,
    pub total_deletions: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitDiffResult {
    pub is_repository: bool,
    pub diff: String,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommitResult {
    pub commit: String,
    pub message: String,
}

// --- Event params ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExitedParams {
    pub session_id: String,
    pub exit_code: Option<i32>,
}

// --- Helpers ---

impl SuccessResponse {
    pub fn new<T: Serialize>(id: u64, result: T) -> Self {
        Self {
            id,
            result: serde_json::to_value(result).unwrap_or(Value::Null),
        }
    }
}

impl ErrorResponse {
    pub fn new(id: u64, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            id,
            error: RpcError {
                code,
                message: message.into(),
            },
        }
    }

    /// Translate a handler failure into the wire shape. Nothing below
    /// this point crosses the protocol boundary as a panic.
    pub fn from_daemon_error(id: u64, err: &DaemonError) -> Self {
        Self::new(id, err.code(), err.to_string())
    }
}

impl Event {
    pub fn new<T: Serialize>(method: &'static str, params: T) -> Self {
        Self {
            method,
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ErrorResponse, Event, PatchApplyParams, Request, SuccessResponse, AUTH_FAILED,
        EVENT_SESSION_EXITED,
    };
    use crate::error::DaemonError;
    use serde_json::json;

    #[test]
    fn request_defaults_params_to_null() {
        let request: Request =
            serde_json::from_str(r#"{"id":1,"method":"auth"}"#).expect("request to parse");
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "auth");
        assert_eq!(request.params, json!(null));
    }

    #[test]
    fn success_response_serializes_result() {
        let response = SuccessResponse::new(2, json!({"ok": true}));
        let value = serde_json::to_value(response).expect("response to serialize");
        assert_eq!(value.get("id"), Some(&json!(2)));
        assert_eq!(value.get("result"), Some(&json!({"ok": true})));
    }

    #[test]
    fn error_response_serializes_error() {
        let response = ErrorResponse::new(3, AUTH_FAILED, "nope");
        let value = serde_json::to_value(response).expect("error to serialize");
        assert_eq!(value.get("id"), Some(&json!(3)));
        let error = value.get("error").expect("error field");
        assert_eq!(error.get("code"), Some(&json!(AUTH_FAILED)));
        assert_eq!(error.get("message"), Some(&json!("nope")));
    }

    #[test]
    fn daemon_error_maps_to_its_code() {
        let err = DaemonError::NotFound("no such session".to_string());
        let response = ErrorResponse::from_daemon_error(7, &err);
        let value = serde_json::to_value(response).unwrap();
        let error = value.get("error").unwrap();
        assert_eq!(error.get("code"), Some(&json!("not_found")));
        assert_eq!(error.get("message"), Some(&json!("no such session")));
    }

    #[test]
    fn event_serializes_params() {
        let event = Event::new(EVENT_SESSION_EXITED, json!({"sessionId": "s1"}));
        let value = serde_json::to_value(event).expect("event to serialize");
        assert_eq!(value.get("method"), Some(&json!(EVENT_SESSION_EXITED)));
        assert_eq!(value.get("params"), Some(&json!({"sessionId": "s1"})));
    }

    #[test]
    fn patch_params_default_to_requiring_confirmation() {
        let params: PatchApplyParams = serde_json::from_value(json!({
            "file": "src/app.js",
            "kind": "range",
            "content": "x",
        }))
        .unwrap();
        assert!(params.require_confirmation);
    }
}

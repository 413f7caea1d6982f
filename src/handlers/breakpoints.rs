//! Breakpoint management: set, clear, list, toggle. Breakpoints are
//! owned by exactly one session; ids are unique per session only.

use chrono::Utc;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::Breakpoint;
use crate::state::DaemonState;

pub async fn handle_set(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<BreakpointSetParams>(request) {
        Ok(params) => respond(id, set(state, params).await),
        Err(e) => respond::<Breakpoint>(id, Err(e)),
    }
}

async fn set(state: &DaemonState, params: BreakpointSetParams) -> Result<Breakpoint, DaemonError> {
    if !state.session_exists(&params.session_id).await {
        return Err(DaemonError::NotFound(format!(
            "Session not found: {}",
            params.session_id
        )));
    }

    let resolved = state.sandbox.resolve_path(&params.file)?;
    let line_count = std::fs::read_to_string(&resolved)
        .map_err(|e| DaemonError::Internal(format!("Failed to read {}: {e}", params.file)))?
        .lines()
        .count() as u32;

    if params.line == 0 || params.line > line_count {
        return Err(DaemonError::Validation(format!(
            "Line {} is out of range for {} ({} lines)",
            params.line, params.file, line_count
        )));
    }

    if let Some(condition) = &params.condition {
        validate_condition(condition)?;
    }

    let breakpoint = Breakpoint {
        id: Uuid::new_v4().to_string(),
        file: params.file.clone(),
        line: params.line,
        condition: params.condition,
        enabled: true,
        hit_count: 0,
        created_at: Utc::now(),
    };

    {
        let mut sessions = state.sessions.write().await;
        let entry = sessions.get_mut(&params.session_id).ok_or_else(|| {
            DaemonError::NotFound(format!("Session not found: {}", params.session_id))
        })?;
        entry.session.breakpoints.push(breakpoint.clone());
        entry.session.touch();
    }

    state
        .log(
            LogLevel::Info,
            format!("debug:{}", params.session_id),
            format!("Breakpoint set at {}:{}", params.file, params.line),
            None,
        )
        .await;

    Ok(breakpoint)
}

pub async fn handle_clear(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<BreakpointIdParams>(request) {
        Ok(params) => respond(id, clear(state, params).await),
        Err(e) => respond::<serde_json::Value>(id, Err(e)),
    }
}

async fn clear(
    state: &DaemonState,
    params: BreakpointIdParams,
) -> Result<serde_json::Value, DaemonError> {
    let mut sessions = state.sessions.write().await;
    let entry = sessions.get_mut(&params.session_id).ok_or_else(|| {
        DaemonError::NotFound(format!("Session not found: {}", params.session_id))
    })?;

    let before = entry.session.breakpoints.len();
    entry
        .session
        .breakpoints
        .retain(|b| b.id != params.breakpoint_id);

    if entry.session.breakpoints.len() == before {
        return Err(DaemonError::NotFound(format!(
            "Breakpoint not found: {}",
            params.breakpoint_id
        )));
    }
    entry.session.touch();

    Ok(serde_json::json!({ "cleared": true }))
}

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<BreakpointListParams>(request) {
        Ok(params) => respond(id, list(state, params).await),
        Err(e) => respond::<Vec<Breakpoint>>(id, Err(e)),
    }
}

async fn list(
    state: &DaemonState,
    params: BreakpointListParams,
) -> Result<Vec<Breakpoint>, DaemonError> {
    let session = state.get_session(&params.session_id).await.ok_or_else(|| {
        DaemonError::NotFound(format!("Session not found: {}", params.session_id))
    })?;

    Ok(session
        .breakpoints
        .into_iter()
        .filter(|b| !params.enabled_only || b.enabled)
        .collect())
}

pub async fn handle_toggle(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<BreakpointIdParams>(request) {
        Ok(params) => respond(id, toggle(state, params).await),
        Err(e) => respond::<Breakpoint>(id, Err(e)),
    }
}

async fn toggle(state: &DaemonState, params: BreakpointIdParams) -> Result<Breakpoint, DaemonError> {
    let (breakpoint, was_enabled) = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions.get_mut(&params.session_id).ok_or_else(|| {
            DaemonError::NotFound(format!("Session not found: {}", params.session_id))
        })?;

        let bp = entry
            .session
            .breakpoints
            .iter_mut()
            .find(|b| b.id == params.breakpoint_id)
            .ok_or_else(|| {
                DaemonError::NotFound(format!("Breakpoint not found: {}", params.breakpoint_id))
            })?;

        let was_enabled = bp.enabled;
        bp.enabled = !bp.enabled;
        let bp = bp.clone();
        entry.session.touch();
        (bp, was_enabled)
    };

    // Record the prior value for auditability.
    state
        .log(
            LogLevel::Info,
            format!("debug:{}", params.session_id),
            format!(
                "Breakpoint {} toggled: {} -> {}",
                breakpoint.id, was_enabled, breakpoint.enabled
            ),
            None,
        )
        .await;

    Ok(breakpoint)
}

/// Syntax-only condition check: non-empty, balanced brackets, and
/// closed string literals. Malformed expressions are rejected before
/// storage.
fn validate_condition(condition: &str) -> Result<(), DaemonError> {
    if condition.trim().is_empty() {
        return Err(DaemonError::Validation(
            "Breakpoint condition must not be empty".to_string(),
        ));
    }

    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in condition.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return Err(DaemonError::Validation(format!(
                        "Unbalanced `{c}` in breakpoint condition"
                    )));
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(DaemonError::Validation(
            "Unterminated string literal in breakpoint condition".to_string(),
        ));
    }
    if !stack.is_empty() {
        return Err(DaemonError::Validation(
            "Unbalanced brackets in breakpoint condition".to_string(),
        ));
    }
    Ok(())
}

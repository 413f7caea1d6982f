//! Execution control: continue, step, pause, evaluate. Each is a
//! guarded transition driven through the configured debug adapter;
//! wrong-state attempts return an error result and leave the session
//! unchanged.

use crate::adapter::EvalResult;
use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{DebugSession, SessionStatus};
use crate::state::DaemonState;

pub async fn handle_continue(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<SessionIdParams>(request) {
        Ok(params) => respond(id, resume(state, &params.session_id).await),
        Err(e) => respond::<DebugSession>(id, Err(e)),
    }
}

async fn resume(state: &DaemonState, session_id: &str) -> Result<DebugSession, DaemonError> {
    let snapshot = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;
        require_status(&entry.session, SessionStatus::Paused)?;
        state.adapter.resume(&mut entry.session).await?;
        entry.session.clone()
    };

    state
        .log(
            LogLevel::Debug,
            format!("debug:{session_id}"),
            "Continued execution",
            None,
        )
        .await;
    Ok(snapshot)
}

pub async fn handle_step(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<DebugStepParams>(request) {
        Ok(params) => respond(id, step(state, params).await),
        Err(e) => respond::<DebugSession>(id, Err(e)),
    }
}

async fn step(state: &DaemonState, params: DebugStepParams) -> Result<DebugSession, DaemonError> {
    let session_id = params.session_id;
    let snapshot = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;
        require_status(&entry.session, SessionStatus::Paused)?;
        state.adapter.step(&mut entry.session, params.mode).await?;
        entry.session.clone()
    };

    state
        .log(
            LogLevel::Debug,
            format!("debug:{session_id}"),
            format!("Stepped to line {:?}", snapshot.current_line),
            None,
        )
        .await;
    Ok(snapshot)
}

pub async fn handle_pause(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<SessionIdParams>(request) {
        Ok(params) => respond(id, pause(state, &params.session_id).await),
        Err(e) => respond::<DebugSession>(id, Err(e)),
    }
}

async fn pause(state: &DaemonState, session_id: &str) -> Result<DebugSession, DaemonError> {
    let snapshot = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session not found: {session_id}")))?;
        require_status(&entry.session, SessionStatus::Running)?;
        state.adapter.pause(&mut entry.session).await?;
        entry.session.clone()
    };

    state
        .log(
            LogLevel::Debug,
            format!("debug:{session_id}"),
            "Paused execution",
            None,
        )
        .await;
    Ok(snapshot)
}

pub async fn handle_evaluate(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<DebugEvaluateParams>(request) {
        Ok(params) => respond(id, evaluate(state, params).await),
        Err(e) => respond::<EvalResult>(id, Err(e)),
    }
}

async fn evaluate(
    state: &DaemonState,
    params: DebugEvaluateParams,
) -> Result<EvalResult, DaemonError> {
    let session = state
        .get_session(&params.session_id)
        .await
        .ok_or_else(|| {
            DaemonError::NotFound(format!("Session not found: {}", params.session_id))
        })?;
    require_status(&session, SessionStatus::Paused)?;

    state.adapter.evaluate(&session, &params.expression).await
}

fn require_status(session: &DebugSession, expected: SessionStatus) -> Result<(), DaemonError> {
    if session.status != expected {
        return Err(DaemonError::Validation(format!(
            "Session {} is not {:?} (status: {:?})",
            session.id, expected, session.status
        )));
    }
    Ok(())
}

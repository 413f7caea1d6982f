//! Version-control boundary. Reads are immediate; commits go through
//! the same confirmation gate as file patches.

use chrono::Utc;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{PendingAction, PendingCommit};
use crate::state::DaemonState;

pub async fn handle_status(request: &Request, state: &DaemonState) -> String {
    respond(request.id, crate::git::status(state.sandbox.root()))
}

pub async fn handle_diff(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    let params = if request.params.is_null() {
        GitDiffParams {
            staged: false,
            path: None,
        }
    } else {
        match parse_params::<GitDiffParams>(request) {
            Ok(p) => p,
            Err(e) => return respond::<GitDiffResult>(id, Err(e)),
        }
    };

    respond(
        id,
        crate::git::diff(state.sandbox.root(), params.staged, params.path.as_deref()),
    )
}

pub async fn handle_commit(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<GitCommitParams>(request) {
        Ok(params) => respond(id, commit(state, params).await),
        Err(e) => respond::<serde_json::Value>(id, Err(e)),
    }
}

async fn commit(
    state: &DaemonState,
    params: GitCommitParams,
) -> Result<serde_json::Value, DaemonError> {
    if params.message.trim().is_empty() {
        return Err(DaemonError::Validation(
            "Commit message must not be empty".to_string(),
        ));
    }

    if params.require_confirmation {
        let pending = PendingCommit {
            id: Uuid::new_v4().to_string(),
            message: params.message,
            paths: params.paths,
            created_at: Utc::now(),
        };
        let pending_id = pending.id.clone();
        state
            .pending
            .write()
            .await
            .insert(pending_id.clone(), PendingAction::Commit(pending));

        state
            .log(
                LogLevel::Info,
                "git",
                format!("Commit proposed, awaiting confirmation: {pending_id}"),
                None,
            )
            .await;

        return serde_json::to_value(PendingResult {
            pending_id,
            requires_confirmation: true,
        })
        .map_err(|e| DaemonError::Internal(e.to_string()));
    }

    let root = state.sandbox.root();
    crate::git::add(root, &params.paths)?;
    let result = crate::git::commit(root, &params.message)?;

    state
        .log(
            LogLevel::Info,
            "git",
            format!("Committed {}", result.commit),
            None,
        )
        .await;

    serde_json::to_value(result).map_err(|e| DaemonError::Internal(e.to_string()))
}

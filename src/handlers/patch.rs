//! File patches and the shared confirmation gate.
//!
//! A mutation either applies immediately or parks in the pending map
//! until an explicit `confirm` names an actor. Confirm and reject are
//! terminal: the action leaves the map and a second call is a
//! not-found, never a double write. Git commits share this gate.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{PatchKind, PendingAction, PendingPatch};
use crate::state::DaemonState;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PatchOutcome {
    Pending(PendingResult),
    Applied(PatchApplied),
}

pub async fn handle_apply(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<PatchApplyParams>(request) {
        Ok(params) => respond(id, apply(state, params).await),
        Err(e) => respond::<PatchOutcome>(id, Err(e)),
    }
}

async fn apply(state: &DaemonState, params: PatchApplyParams) -> Result<PatchOutcome, DaemonError> {
    if !state.limits.enable_patches {
        return Err(DaemonError::AccessDenied(
            "File patching is disabled".to_string(),
        ));
    }
    // Diff application is not implemented; refusing here keeps a
    // never-confirmable patch out of the pending map.
    if params.kind == PatchKind::Diff {
        return Err(DaemonError::Unsupported(
            "Unified diff patches are not supported yet".to_string(),
        ));
    }

    // Validate the target up front so a pending patch is at least
    // plausible at proposal time.
    let resolved = state.sandbox.resolve_path(&params.file)?;
    let size = std::fs::metadata(&resolved)?.len();
    if size > state.limits.max_file_bytes {
        return Err(DaemonError::Validation(format!(
            "File too large to patch: {} ({size} bytes)",
            params.file
        )));
    }

    let mut patch = PendingPatch {
        id: Uuid::new_v4().to_string(),
        file: params.file,
        kind: params.kind,
        content: params.content,
        start_line: params.start_line,
        end_line: params.end_line,
        applied: false,
        backup: None,
        requires_confirmation: params.require_confirmation,
        confirmed_by: None,
        confirmed_at: None,
        created_at: Utc::now(),
    };

    if patch.requires_confirmation {
        let pending_id = patch.id.clone();
        state
            .pending
            .write()
            .await
            .insert(pending_id.clone(), PendingAction::Patch(patch));

        state
            .log(
                LogLevel::Info,
                "patch",
                format!("Patch proposed, awaiting confirmation: {pending_id}"),
                None,
            )
            .await;

        return Ok(PatchOutcome::Pending(PendingResult {
            pending_id,
            requires_confirmation: true,
        }));
    }

    let applied = apply_patch(state, &mut patch)?;
    state
        .log(
            LogLevel::Info,
            "patch",
            format!("Patch applied to {}", applied.file),
            Some(serde_json::json!({ "patchId": applied.patch_id })),
        )
        .await;
    Ok(PatchOutcome::Applied(applied))
}

pub async fn handle_confirm(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<ConfirmParams>(request) {
        Ok(params) => respond(id, confirm(state, params).await),
        Err(e) => respond::<serde_json::Value>(id, Err(e)),
    }
}

async fn confirm(
    state: &DaemonState,
    params: ConfirmParams,
) -> Result<serde_json::Value, DaemonError> {
    let action = state
        .pending
        .write()
        .await
        .remove(&params.pending_id)
        .ok_or_else(|| {
            DaemonError::NotFound(format!("No pending action: {}", params.pending_id))
        })?;

    match action {
        PendingAction::Patch(mut patch) => {
            patch.confirmed_by = Some(params.actor.clone());
            patch.confirmed_at = Some(Utc::now());
            let applied = apply_patch(state, &mut patch)?;

            state
                .log(
                    LogLevel::Info,
                    "patch",
                    format!("Patch {} confirmed by {}", patch.id, params.actor),
                    None,
                )
                .await;

            Ok(serde_json::to_value(applied)
                .map_err(|e| DaemonError::Internal(e.to_string()))?)
        }
        PendingAction::Commit(commit) => {
            let root = state.sandbox.root();
            crate::git::add(root, &commit.paths)?;
            let result = crate::git::commit(root, &commit.message)?;

            state
                .log(
                    LogLevel::Info,
                    "git",
                    format!("Commit {} confirmed by {}", result.commit, params.actor),
                    None,
                )
                .await;

            Ok(serde_json::to_value(result)
                .map_err(|e| DaemonError::Internal(e.to_string()))?)
        }
    }
}

pub async fn handle_reject(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<RejectParams>(request) {
        Ok(params) => {
            let rejected = state
                .pending
                .write()
                .await
                .remove(&params.pending_id)
                .is_some();
            if rejected {
                state
                    .log(
                        LogLevel::Info,
                        "patch",
                        format!("Pending action rejected: {}", params.pending_id),
                        None,
                    )
                    .await;
            }
            respond(id, Ok::<_, DaemonError>(RejectResult { rejected }))
        }
        Err(e) => respond::<RejectResult>(id, Err(e)),
    }
}

pub async fn handle_pending(request: &Request, state: &DaemonState) -> String {
    let pending: Vec<PendingAction> = state.pending.read().await.values().cloned().collect();
    respond(request.id, Ok::<_, DaemonError>(pending))
}

/// Apply a patch to its target file. The pre-mutation read doubles as
/// the backup; the write is a whole-file overwrite.
fn apply_patch(state: &DaemonState, patch: &mut PendingPatch) -> Result<PatchApplied, DaemonError> {
    if patch.applied {
        return Err(DaemonError::Validation(format!(
            "Patch already applied: {}",
            patch.id
        )));
    }

    let resolved = state.sandbox.resolve_path(&patch.file)?;
    let original = std::fs::read_to_string(&resolved)
        .map_err(|e| DaemonError::Internal(format!("Failed to read {}: {e}", patch.file)))?;
    patch.backup = Some(original.clone());

    let (updated, lines_replaced) = match patch.kind {
        PatchKind::Range => splice_range(
            &original,
            &patch.content,
            patch.start_line,
            patch.end_line,
        )?,
        PatchKind::Diff => {
            return Err(DaemonError::Unsupported(
                "Unified diff patches are not supported yet".to_string(),
            ))
        }
    };

    std::fs::write(&resolved, updated)
        .map_err(|e| DaemonError::Internal(format!("Failed to write {}: {e}", patch.file)))?;
    patch.applied = true;

    Ok(PatchApplied {
        patch_id: patch.id.clone(),
        file: patch.file.clone(),
        applied: true,
        lines_replaced,
    })
}

/// Splice replacement text over the zero-based inclusive line range,
/// clamped to the file bounds.
fn splice_range(
    original: &str,
    replacement: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<(String, usize), DaemonError> {
    let lines: Vec<&str> = original.lines().collect();
    if lines.is_empty() {
        return Ok((ensure_trailing_newline(replacement), 0));
    }

    let start = start_line.unwrap_or(0).min(lines.len() - 1);
    let end = end_line.unwrap_or(start).min(lines.len() - 1);
    if start > end {
        return Err(DaemonError::Validation(format!(
            "Invalid line range: {start} > {end}"
        )));
    }

    let mut updated: Vec<&str> = Vec::with_capacity(lines.len());
    updated.extend(&lines[..start]);
    updated.extend(replacement.lines());
    updated.extend(&lines[end + 1..]);

    let mut text = updated.join("\n");
    if original.ends_with('\n') {
        text.push('\n');
    }

    Ok((text, end - start + 1))
}

fn ensure_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::{apply, confirm, splice_range, PatchOutcome};
    use crate::config::Limits;
    use crate::error::DaemonError;
    use crate::protocol::{ConfirmParams, PatchApplyParams};
    use crate::sandbox::Sandbox;
    use crate::session::PatchKind;
    use crate::state::DaemonState;

    fn state_in(dir: &std::path::Path, enable_patches: bool) -> DaemonState {
        DaemonState::new(
            None,
            Limits {
                enable_patches,
                enable_commands: true,
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(dir.to_path_buf(), None, None),
        )
    }

    fn twenty_lines() -> String {
        (0..20).map(|i| format!("line {i}\n")).collect()
    }

    fn range_params(require_confirmation: bool) -> PatchApplyParams {
        PatchApplyParams {
            file: "app.py".to_string(),
            kind: PatchKind::Range,
            content: "replacement\n".to_string(),
            start_line: Some(10),
            end_line: Some(12),
            require_confirmation,
        }
    }

    #[tokio::test]
    async fn unconfirmed_range_patch_applies_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app.py");
        std::fs::write(&target, twenty_lines()).unwrap();
        let state = state_in(dir.path(), true);

        let outcome = apply(&state, range_params(false)).await.unwrap();
        let PatchOutcome::Applied(applied) = outcome else {
            panic!("expected immediate apply");
        };
        assert_eq!(applied.lines_replaced, 3);

        let updated = std::fs::read_to_string(&target).unwrap();
        let lines: Vec<&str> = updated.lines().collect();
        assert_eq!(lines.len(), 18);
        assert_eq!(lines[9], "line 9");
        assert_eq!(lines[10], "replacement");
        assert_eq!(lines[11], "line 13");
        // The 17 untouched lines survive in order.
        assert_eq!(lines[17], "line 19");
    }

    #[tokio::test]
    async fn confirmation_gate_defers_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app.py");
        std::fs::write(&target, twenty_lines()).unwrap();
        let state = state_in(dir.path(), true);

        let outcome = apply(&state, range_params(true)).await.unwrap();
        let PatchOutcome::Pending(pending) = outcome else {
            panic!("expected pending patch");
        };

        // Unconfirmed: file untouched.
        assert_eq!(std::fs::read_to_string(&target).unwrap(), twenty_lines());

        confirm(
            &state,
            ConfirmParams {
                pending_id: pending.pending_id.clone(),
                actor: "reviewer".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(std::fs::read_to_string(&target)
            .unwrap()
            .contains("replacement"));

        // Terminal: a second confirm cannot double-write.
        let err = confirm(
            &state,
            ConfirmParams {
                pending_id: pending.pending_id,
                actor: "reviewer".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[tokio::test]
    async fn diff_patches_are_unsupported_not_silent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app.py");
        std::fs::write(&target, twenty_lines()).unwrap();
        let state = state_in(dir.path(), true);

        let mut params = range_params(false);
        params.kind = PatchKind::Diff;
        let err = apply(&state, params).await.unwrap_err();

        assert!(matches!(err, DaemonError::Unsupported(_)));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), twenty_lines());
    }

    #[tokio::test]
    async fn diff_patches_never_park_in_the_pending_map() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), twenty_lines()).unwrap();
        let state = state_in(dir.path(), true);

        let mut params = range_params(true);
        params.kind = PatchKind::Diff;
        let err = apply(&state, params).await.unwrap_err();

        // The caller learns immediately instead of at confirm time.
        assert!(matches!(err, DaemonError::Unsupported(_)));
        assert!(state.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_patching_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), twenty_lines()).unwrap();
        let state = state_in(dir.path(), false);

        let err = apply(&state, range_params(false)).await.unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[test]
    fn splice_clamps_out_of_bounds_ranges() {
        let original = "a\nb\nc\n";
        let (updated, replaced) =
            splice_range(original, "X\n", Some(1), Some(99)).unwrap();
        assert_eq!(updated, "a\nX\n");
        assert_eq!(replaced, 2);
    }

    #[test]
    fn splice_preserves_missing_trailing_newline() {
        let original = "a\nb\nc";
        let (updated, _) = splice_range(original, "X", Some(1), Some(1)).unwrap();
        assert_eq!(updated, "a\nX\nc");
    }
}

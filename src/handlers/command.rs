//! Allow-listed command execution through the process runner, tracked
//! in the command registry.

use std::path::PathBuf;

use chrono::Utc;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{CommandExecution, CommandStatus};
use crate::state::DaemonState;

pub async fn handle_run(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<CommandRunParams>(request) {
        Ok(params) => respond(id, run(state, params).await),
        Err(e) => respond::<CommandExecution>(id, Err(e)),
    }
}

async fn run(
    state: &DaemonState,
    params: CommandRunParams,
) -> Result<CommandExecution, DaemonError> {
    if !state.limits.enable_commands {
        return Err(DaemonError::AccessDenied(
            "Command execution is disabled".to_string(),
        ));
    }
    if !state.sandbox.is_command_allowed(&params.command) {
        return Err(DaemonError::AccessDenied(format!(
            "Command not allowed: {}",
            params.command
        )));
    }

    let cwd = resolve_cwd(state, params.cwd.as_deref())?;
    let timeout_ms = params.timeout_ms.unwrap_or(state.limits.timeout_ms);

    // Record the bound actually enforced, not the raw param.
    let execution = CommandExecution::started(
        params.command.clone(),
        params.args.clone(),
        cwd.to_string_lossy().to_string(),
        Some(timeout_ms),
    );
    let execution_id = execution.id.clone();
    state
        .commands
        .write()
        .await
        .insert(execution_id.clone(), execution);

    let outcome = crate::runner::run(
        &params.command,
        &params.args,
        &cwd,
        &Default::default(),
        timeout_ms,
        state.limits.max_output_bytes,
    )
    .await;

    let mut commands = state.commands.write().await;
    let record = commands
        .get_mut(&execution_id)
        .ok_or_else(|| DaemonError::Internal("Command record vanished".to_string()))?;
    record.finished_at = Some(Utc::now());

    match outcome {
        Ok(output) => {
            record.exit_code = Some(output.exit_code);
            record.stdout = output.stdout;
            record.stderr = output.stderr;
            record.status = if output.exit_code == 0 {
                CommandStatus::Completed
            } else {
                CommandStatus::Failed
            };
            let record = record.clone();
            drop(commands);

            state
                .log(
                    LogLevel::Info,
                    "command",
                    format!("{} exited with code {}", params.command, output.exit_code),
                    Some(serde_json::json!({ "executionId": execution_id })),
                )
                .await;
            Ok(record)
        }
        Err(err) => {
            record.status = match err {
                DaemonError::Timeout(_) => CommandStatus::Timeout,
                _ => CommandStatus::Failed,
            };
            record.stderr = err.to_string();
            drop(commands);

            state
                .log(
                    LogLevel::Error,
                    "command",
                    format!("{} failed: {err}", params.command),
                    Some(serde_json::json!({ "executionId": execution_id })),
                )
                .await;
            Err(err)
        }
    }
}

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let mut executions: Vec<CommandExecution> =
        state.commands.read().await.values().cloned().collect();
    executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    respond(request.id, Ok::<_, DaemonError>(executions))
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

#[cfg(test)]
mod tests {
    use super::run;
    use crate::config::Limits;
    use crate::error::DaemonError;
    use crate::protocol::CommandRunParams;
    use crate::sandbox::Sandbox;
    use crate::session::CommandStatus;
    use crate::state::DaemonState;

    fn state_in(dir: &std::path::Path, enable_commands: bool) -> DaemonState {
        DaemonState::new(
            None,
            Limits {
                enable_patches: true,
                enable_commands,
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(dir.to_path_buf(), None, None),
        )
    }

    fn params(command: &str, args: &[&str]) -> CommandRunParams {
        CommandRunParams {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn echo_completes_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path(), true);

        let execution = run(&state, params("echo", &["hi"])).await.unwrap();

        assert_eq!(execution.status, CommandStatus::Completed);
        assert_eq!(execution.exit_code, Some(0));
        assert!(execution.stdout.contains("hi"));
        // Defaulted timeout still shows up as the enforced bound.
        assert_eq!(execution.timeout_ms, Some(5_000));
        assert_eq!(state.commands.read().await.len(), 1);
    }

    #[tokio::test]
    async fn disallowed_command_is_denied_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path(), true);

        let err = run(&state, params("rm", &["-rf", "/"])).await.unwrap_err();

        assert!(matches!(err, DaemonError::AccessDenied(_)));
        assert!(state.commands.read().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_execution_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path(), false);

        let err = run(&state, params("echo", &["hi"])).await.unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn timeout_marks_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path(), true);

        let mut p = params("python3", &["-c", "import time; time.sleep(5)"]);
        p.timeout_ms = Some(100);
        let err = run(&state, p).await.unwrap_err();
        assert!(matches!(err, DaemonError::Timeout(_)));

        let commands = state.commands.read().await;
        let record = commands.values().next().unwrap();
        assert_eq!(record.status, CommandStatus::Timeout);
    }
}

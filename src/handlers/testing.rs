//! Test execution: known runners map to fixed invocations; output is
//! pattern-matched into a count summary on a best-effort basis, with
//! the raw output always preserved in the report.

use chrono::Utc;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{ReportStatus, TestReport, TestSummary};
use crate::state::DaemonState;

/// Runner table: identifier → command + fixed arguments.
const TEST_RUNNERS: &[(&str, &str, &[&str])] = &[
    ("jest", "npx", &["jest", "--colors=false"]),
    ("mocha", "npx", &["mocha", "--no-colors"]),
    ("pytest", "python3", &["-m", "pytest", "-q"]),
    ("cargo", "cargo", &["test"]),
    ("go", "go", &["test", "./..."]),
];

pub async fn handle_run(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<TestRunParams>(request) {
        Ok(params) => respond(id, run(state, params).await),
        Err(e) => respond::<TestReport>(id, Err(e)),
    }
}

async fn run(state: &DaemonState, params: TestRunParams) -> Result<TestReport, DaemonError> {
    let (_, command, base_args) = TEST_RUNNERS
        .iter()
        .find(|(name, _, _)| *name == params.runner)
        .ok_or_else(|| {
            DaemonError::Validation(format!("Unknown test runner: {}", params.runner))
        })?;

    let mut args: Vec<String> = base_args.iter().map(|s| s.to_string()).collect();
    if let Some(target) = &params.target {
        // Targets resolve through the sandbox like any other path.
        let resolved = state.sandbox.resolve_path(target)?;
        args.push(resolved.to_string_lossy().to_string());
    }

    let report_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let timeout_ms = params.timeout_ms.unwrap_or(state.limits.timeout_ms);

    let outcome = crate::runner::run(
        command,
        &args,
        state.sandbox.root(),
        &Default::default(),
        timeout_ms,
        state.limits.max_output_bytes,
    )
    .await;

    let report = match outcome {
        Ok(output) => {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            let summary = parse_test_summary(&params.runner, &combined);
            TestReport {
                id: report_id.clone(),
                runner: params.runner.clone(),
                target: params.target.clone(),
                status: if output.exit_code == 0 {
                    ReportStatus::Completed
                } else {
                    ReportStatus::Failed
                },
                started_at,
                finished_at: Some(Utc::now()),
                summary,
                output: combined,
            }
        }
        Err(err) => {
            state
                .log(
                    LogLevel::Error,
                    "test",
                    format!("{} run failed: {err}", params.runner),
                    None,
                )
                .await;
            return Err(err);
        }
    };

    // Reports are replaced wholesale, never merged.
    state
        .test_reports
        .write()
        .await
        .insert(report_id.clone(), report.clone());

    state
        .log(
            LogLevel::Info,
            "test",
            format!(
                "{}: {} passed, {} failed, {} skipped",
                params.runner, report.summary.passed, report.summary.failed, report.summary.skipped
            ),
            Some(serde_json::json!({ "reportId": report_id })),
        )
        .await;

    Ok(report)
}

/// Best-effort summary extraction. Each runner prints counts as
/// `<n> <keyword>` pairs somewhere in its output; unknown shapes
/// degrade to an all-zero summary.
pub(crate) fn parse_test_summary(runner: &str, output: &str) -> TestSummary {
    let skip_words: &[&str] = match runner {
        "cargo" => &["ignored"],
        "jest" => &["skipped", "todo"],
        _ => &["skipped"],
    };

    let mut summary = TestSummary::default();
    for line in output.lines() {
        let tokens: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|t| !t.is_empty())
            .collect();

        for window in tokens.windows(2) {
            let Ok(count) = window[0].parse::<u32>() else {
                continue;
            };
            let word = window[1].trim_end_matches(|c: char| !c.is_alphanumeric());
            if word == "passed" || word == "passing" {
                summary.passed = count;
            } else if word == "failed" || word == "failing" {
                summary.failed = count;
            } else if skip_words.contains(&word) {
                summary.skipped += count;
            }
        }
    }

    summary.total = summary.passed + summary.failed + summary.skipped;
    summary
}

#[cfg(test)]
mod tests {
    use super::{parse_test_summary, run};
    use crate::config::Limits;
    use crate::error::DaemonError;
    use crate::protocol::TestRunParams;
    use crate::sandbox::Sandbox;
    use crate::state::DaemonState;

    #[test]
    fn parses_jest_summary() {
        let output = "Tests:       2 failed, 1 skipped, 7 passed, 10 total\n";
        let summary = parse_test_summary("jest", output);
        assert_eq!(summary.passed, 7);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total, 10);
    }

    #[test]
    fn parses_pytest_summary() {
        let output = "3 passed, 1 failed, 2 skipped in 0.41s\n";
        let summary = parse_test_summary("pytest", output);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn parses_cargo_summary() {
        let output = "test result: ok. 12 passed; 0 failed; 1 ignored; 0 measured\n";
        let summary = parse_test_summary("cargo", output);
        assert_eq!(summary.passed, 12);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn unmatched_output_degrades_to_zeros() {
        let summary = parse_test_summary("pytest", "some unrelated noise\n");
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn unknown_runner_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = DaemonState::new(
            None,
            Limits {
                enable_patches: true,
                enable_commands: true,
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(dir.path().to_path_buf(), None, None),
        );

        let err = run(
            &state,
            TestRunParams {
                runner: "mystery".to_string(),
                target: None,
                timeout_ms: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));
    }
}

//! Lint execution with per-tool issue extraction. Parsing is a
//! heuristic layer over the captured output; an unrecognized format
//! yields an empty issue list while the raw output stays in the
//! report.

use chrono::Utc;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::LogLevel;
use crate::protocol::*;
use crate::session::{LintIssue, LintReport, ReportStatus};
use crate::state::DaemonState;

/// Tool table: identifier → command, fixed arguments, fix flag.
const LINT_TOOLS: &[(&str, &str, &[&str], Option<&str>)] = &[
    ("eslint", "npx", &["eslint", "--no-color"], Some("--fix")),
    ("flake8", "flake8", &[], None),
    ("pylint", "pylint", &["--output-format=text"], None),
];

pub async fn handle_run(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    match parse_params::<LintRunParams>(request) {
        Ok(params) => respond(id, run(state, params).await),
        Err(e) => respond::<LintReport>(id, Err(e)),
    }
}

async fn run(state: &DaemonState, params: LintRunParams) -> Result<LintReport, DaemonError> {
    let (_, command, base_args, fix_flag) = LINT_TOOLS
        .iter()
        .find(|(name, _, _, _)| *name == params.tool)
        .ok_or_else(|| DaemonError::Validation(format!("Unknown lint tool: {}", params.tool)))?;

    let mut args: Vec<String> = base_args.iter().map(|s| s.to_string()).collect();
    if params.fix {
        let flag = fix_flag.ok_or_else(|| {
            DaemonError::Unsupported(format!("{} has no fix mode", params.tool))
        })?;
        args.push(flag.to_string());
    }
    match &params.target {
        Some(target) => {
            let resolved = state.sandbox.resolve_path(target)?;
            args.push(resolved.to_string_lossy().to_string());
        }
        None => args.push(".".to_string()),
    }

    let started_at = Utc::now();
    let output = crate::runner::run(
        command,
        &args,
        state.sandbox.root(),
        &Default::default(),
        state.limits.timeout_ms,
        state.limits.max_output_bytes,
    )
    .await?;

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let issues = parse_lint_issues(&params.tool, &combined);

    let report = LintReport {
        id: Uuid::new_v4().to_string(),
        tool: params.tool.clone(),
        target: params.target.clone(),
        status: if output.exit_code == 0 {
            ReportStatus::Completed
        } else {
            ReportStatus::Failed
        },
        started_at,
        finished_at: Some(Utc::now()),
        issues,
        output: combined,
    };

    state
        .lint_reports
        .write()
        .await
        .insert(report.id.clone(), report.clone());

    state
        .log(
            LogLevel::Info,
            "lint",
            format!("{}: {} issue(s)", params.tool, report.issues.len()),
            Some(serde_json::json!({ "reportId": report.id })),
        )
        .await;

    Ok(report)
}

/// Extract issues from tool output.
///
/// flake8/pylint emit `file:line:col: message` lines; eslint's stylish
/// format emits a file header followed by indented
/// `line:col  severity  message` rows.
pub(crate) fn parse_lint_issues(tool: &str, output: &str) -> Vec<LintIssue> {
    match tool {
        "eslint" => parse_eslint_stylish(output),
        _ => parse_colon_separated(output),
    }
}

fn parse_colon_separated(output: &str) -> Vec<LintIssue> {
    let mut issues = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.splitn(4, ':').collect();
        if parts.len() < 4 {
            continue;
        }
        let (Ok(line_no), Ok(column)) = (parts[1].trim().parse(), parts[2].trim().parse()) else {
            continue;
        };
        let message = parts[3].trim();
        if message.is_empty() {
            continue;
        }
        issues.push(LintIssue {
            file: parts[0].trim().to_string(),
            line: line_no,
            column: Some(column),
            severity: if message.starts_with('E') {
                "error".to_string()
            } else {
                "warning".to_string()
            },
            message: message.to_string(),
        });
    }
    issues
}

fn parse_eslint_stylish(output: &str) -> Vec<LintIssue> {
    let mut issues = Vec::new();
    let mut current_file = String::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            // File header line.
            current_file = line.trim().to_string();
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || current_file.is_empty() {
            continue;
        }
        let Some((line_no, column)) = tokens[0]
            .split_once(':')
            .and_then(|(l, c)| Some((l.parse().ok()?, c.parse().ok()?)))
        else {
            continue;
        };
        let severity = tokens[1];
        if severity != "error" && severity != "warning" {
            continue;
        }
        issues.push(LintIssue {
            file: current_file.clone(),
            line: line_no,
            column: Some(column),
            severity: severity.to_string(),
            message: tokens[2..].join(" "),
        });
    }
    issues
}

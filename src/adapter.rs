//! Debug adapter strategy
//!
//! The orchestrators drive sessions through the [`DebugAdapter`]
//! trait; the shipped [`SimulatedAdapter`] stands in for real DAP
//! integrations and is also what the tests use. Launch invocations are
//! a data table keyed by runtime kind, so adding a runtime is a table
//! entry, not a new branch at every call site.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::session::{DebugSession, RuntimeKind, SessionStatus, StackFrame};

/// External command a runtime kind is launched with. `{entry}` in the
/// argument template is replaced with the resolved entry point.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
}

/// Launch table. `csharp` has no entry; opening a csharp session
/// fails fast as unsupported instead of hanging on a missing adapter.
const LAUNCH_TABLE: &[(RuntimeKind, &str, &[&str])] = &[
    (RuntimeKind::Node, "node", &["--inspect-brk=127.0.0.1:0", "{entry}"]),
    (
        RuntimeKind::Python,
        "python3",
        &["-m", "debugpy", "--listen", "127.0.0.1:0", "--wait-for-client", "{entry}"],
    ),
    (RuntimeKind::Go, "dlv", &["debug", "{entry}", "--headless", "--listen=127.0.0.1:0"]),
    (
        RuntimeKind::Java,
        "java",
        &["-agentlib:jdwp=transport=dt_socket,server=y,suspend=y", "{entry}"],
    ),
    (RuntimeKind::Cpp, "gdb", &["--interpreter=mi2", "{entry}"]),
    (RuntimeKind::Php, "php", &["-dxdebug.mode=debug", "{entry}"]),
    (RuntimeKind::Ruby, "rdbg", &["--open", "{entry}"]),
    (RuntimeKind::Rust, "rust-gdb", &["--interpreter=mi2", "{entry}"]),
];

/// Resolve the launch invocation for a runtime kind.
pub fn launch_invocation(
    kind: RuntimeKind,
    entry: &str,
    extra_args: &[String],
) -> Result<LaunchSpec, DaemonError> {
    let (_, command, template) = LAUNCH_TABLE
        .iter()
        .find(|(k, _, _)| *k == kind)
        .ok_or_else(|| {
            DaemonError::Unsupported(format!(
                "Runtime kind not supported: {}",
                kind.as_str()
            ))
        })?;

    let mut args: Vec<String> = template
        .iter()
        .map(|a| a.replace("{entry}", entry))
        .collect();
    args.extend(extra_args.iter().cloned());

    Ok(LaunchSpec {
        command: command.to_string(),
        args,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    Into,
    Over,
    Out,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub expression: String,
    pub value: String,
    pub value_type: String,
}

/// Execution-control strategy for one session. Implementations mutate
/// the session record through the guarded transition graph only.
#[async_trait]
pub trait DebugAdapter: Send + Sync {
    /// Resume a paused session.
    async fn resume(&self, session: &mut DebugSession) -> Result<(), DaemonError>;

    /// Step a paused session; ends paused on the next tracked line.
    async fn step(&self, session: &mut DebugSession, mode: StepMode) -> Result<(), DaemonError>;

    /// Pause a running session.
    async fn pause(&self, session: &mut DebugSession) -> Result<(), DaemonError>;

    /// Evaluate an expression in a paused session's current frame.
    async fn evaluate(
        &self,
        session: &DebugSession,
        expression: &str,
    ) -> Result<EvalResult, DaemonError>;
}

/// Stand-in adapter: fixed delays, synthetic line advances and eval
/// values. Keeps the orchestrators honest about the trait surface
/// until real DAP adapters exist.
pub struct SimulatedAdapter {
    step_delay: Duration,
    line_delta: u32,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(100),
            line_delta: 1,
        }
    }

    /// Zero-delay variant for tests.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            step_delay: Duration::ZERO,
            line_delta: 1,
        }
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DebugAdapter for SimulatedAdapter {
    async fn resume(&self, session: &mut DebugSession) -> Result<(), DaemonError> {
        session.transition(SessionStatus::Running)?;
        session.current_frame = None;
        Ok(())
    }

    async fn step(&self, session: &mut DebugSession, _mode: StepMode) -> Result<(), DaemonError> {
        session.transition(SessionStatus::Running)?;
        tokio::time::sleep(self.step_delay).await;
        session.transition(SessionStatus::Paused)?;

        let line = session.current_line.unwrap_or(1) + self.line_delta;
        session.current_line = Some(line);
        session.current_frame = Some(StackFrame {
            id: 1,
            name: "main".to_string(),
            file: session.entry_point.clone(),
            line,
        });
        Ok(())
    }

    async fn pause(&self, session: &mut DebugSession) -> Result<(), DaemonError> {
        session.transition(SessionStatus::Paused)?;
        let line = session.current_line.unwrap_or(1);
        session.current_frame = Some(StackFrame {
            id: 1,
            name: "main".to_string(),
            file: session.entry_point.clone(),
            line,
        });
        Ok(())
    }

    async fn evaluate(
        &self,
        session: &DebugSession,
        expression: &str,
    ) -> Result<EvalResult, DaemonError> {
        if session.status != SessionStatus::Paused {
            return Err(DaemonError::Validation(format!(
                "Session {} is not paused",
                session.id
            )));
        }
        Ok(EvalResult {
            expression: expression.to_string(),
            value: format!("<simulated value of `{expression}`>"),
            value_type: "string".to_string(),
        })
    }
}

use thiserror::Error;

/// Daemon-wide error type. Every handler failure is one of these and
/// maps to a stable wire code via [`DaemonError::code`].
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Missing/invalid argument or an operation attempted from the
    /// wrong state. No side effects occurred.
    #[error("{0}")]
    Validation(String),

    /// Path outside the workspace, disallowed extension, or a command
    /// not on the allow-list.
    #[error("{0}")]
    AccessDenied(String),

    /// Unknown session, breakpoint, report, or pending-action id.
    #[error("{0}")]
    NotFound(String),

    /// An external process did not exit within its timeout.
    #[error("{0}")]
    Timeout(String),

    /// The OS refused to start the process (binary missing,
    /// permission denied). Distinct from a non-zero exit.
    #[error("{0}")]
    Spawn(String),

    /// Explicitly deferred capability (diff patches, the csharp
    /// runtime). Never degrades to a silent no-op.
    #[error("{0}")]
    Unsupported(String),

    /// A git invocation failed.
    #[error("{0}")]
    Git(String),

    #[error("{0}")]
    Internal(String),
}

impl DaemonError {
    /// Machine-readable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::Validation(_) => "invalid_params",
            DaemonError::AccessDenied(_) => "access_denied",
            DaemonError::NotFound(_) => "not_found",
            DaemonError::Timeout(_) => "timeout",
            DaemonError::Spawn(_) => "spawn_error",
            DaemonError::Unsupported(_) => "unsupported",
            DaemonError::Git(_) => "git_error",
            DaemonError::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(e: std::io::Error) -> Self {
        DaemonError::Internal(e.to_string())
    }
}

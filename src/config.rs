use clap::Parser;
use std::path::PathBuf;

/// Workbench daemon - remote debug, test, lint and patch operations
#[derive(Parser, Debug)]
#[command(name = "workbench-daemon")]
pub struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1:4790")]
    pub listen: String,

    /// Auth token (or set WORKBENCH_DAEMON_TOKEN env var)
    #[arg(long, env = "WORKBENCH_DAEMON_TOKEN")]
    pub token: Option<String>,

    /// Workspace root all file and process operations are confined to
    #[arg(long, env = "WORKBENCH_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Allow file patch operations
    #[arg(long, env = "WORKBENCH_ENABLE_PATCHES", default_value_t = true)]
    pub enable_patches: bool,

    /// Allow allow-listed command execution
    #[arg(long, env = "WORKBENCH_ENABLE_COMMANDS", default_value_t = true)]
    pub enable_commands: bool,

    /// Default timeout for external processes, in milliseconds
    #[arg(long, env = "WORKBENCH_TIMEOUT_MS", default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Max bytes of stdout/stderr kept per process (tail-kept)
    #[arg(long, env = "WORKBENCH_MAX_OUTPUT_BYTES", default_value_t = 1_048_576)]
    pub max_output_bytes: usize,

    /// Max size of a file eligible for patching, in bytes
    #[arg(long, env = "WORKBENCH_MAX_FILE_BYTES", default_value_t = 10_485_760)]
    pub max_file_bytes: u64,

    /// Comma-separated command allow-list override
    #[arg(long, env = "WORKBENCH_ALLOWED_COMMANDS")]
    pub allowed_commands: Option<String>,

    /// Comma-separated file extension allow-list override
    #[arg(long, env = "WORKBENCH_ALLOWED_EXTENSIONS")]
    pub allowed_extensions: Option<String>,

    /// Disable auth (dev only)
    #[arg(long)]
    pub insecure_no_auth: bool,
}

impl Args {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn require_auth(&self) -> bool {
        !self.insecure_no_auth
    }
}

/// Immutable runtime limits, read once at startup.
#[derive(Debug, Clone)]
pub struct Limits {
    pub enable_patches: bool,
    pub enable_commands: bool,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub max_file_bytes: u64,
}

impl Limits {
    pub fn from_args(args: &Args) -> Self {
        Self {
            enable_patches: args.enable_patches,
            enable_commands: args.enable_commands,
            timeout_ms: args.timeout_ms,
            max_output_bytes: args.max_output_bytes,
            max_file_bytes: args.max_file_bytes,
        }
    }
}

/// Split a comma-separated override list, dropping empty segments.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_list;

    #[test]
    fn parse_list_trims_and_drops_empty() {
        assert_eq!(parse_list("npm, git ,,cargo"), vec!["npm", "git", "cargo"]);
        assert!(parse_list("").is_empty());
    }
}

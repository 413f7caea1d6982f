//! Workspace sandbox policy
//!
//! Pure validation over the current filesystem state: path resolution
//! confined to the workspace root, allow-lists for file extensions and
//! commands, and a MIME lookup table.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::DaemonError;

/// Extensions that file operations may touch, unless overridden.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "go", "java", "cs", "c", "h", "cpp", "hpp",
    "php", "rb", "rs", "json", "toml", "yaml", "yml", "md", "txt", "html", "css", "sh",
];

/// Commands that may be executed, unless overridden. Deny by default.
const DEFAULT_COMMANDS: &[&str] = &[
    "node", "npm", "npx", "yarn", "pnpm", "python", "python3", "pip", "pytest", "go", "cargo",
    "rustc", "git", "make", "jest", "mocha", "eslint", "flake8", "pylint", "echo", "ls", "cat",
];

/// Commands that get a warning log when run. Informational only; the
/// allow-list above remains the sole enforcement path.
const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "dd", "mkfs", "chmod", "chown", "sudo", "shutdown", "reboot", "kill",
];

const MIME_TABLE: &[(&str, &str)] = &[
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("cjs", "text/javascript"),
    ("ts", "text/typescript"),
    ("jsx", "text/jsx"),
    ("tsx", "text/tsx"),
    ("py", "text/x-python"),
    ("go", "text/x-go"),
    ("java", "text/x-java"),
    ("cs", "text/x-csharp"),
    ("c", "text/x-c"),
    ("h", "text/x-c"),
    ("cpp", "text/x-c++"),
    ("hpp", "text/x-c++"),
    ("php", "text/x-php"),
    ("rb", "text/x-ruby"),
    ("rs", "text/x-rust"),
    ("json", "application/json"),
    ("toml", "application/toml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("sh", "application/x-sh"),
];

/// Workspace-scoped access policy. Built once at startup.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    allowed_commands: Vec<String>,
}

impl Sandbox {
    pub fn new(
        root: PathBuf,
        extensions_override: Option<Vec<String>>,
        commands_override: Option<Vec<String>>,
    ) -> Self {
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            allowed_extensions: extensions_override.unwrap_or_else(|| {
                DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
            }),
            allowed_commands: commands_override
                .unwrap_or_else(|| DEFAULT_COMMANDS.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the workspace root, rejecting paths
    /// that escape it, do not exist, or carry a disallowed extension.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf, DaemonError> {
        let candidate = {
            let p = Path::new(relative);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.root.join(p)
            }
        };

        // Containment is decided lexically first, so a traversal that
        // lands on a nonexistent path is still denied rather than
        // reported as missing.
        if !normalize(&candidate).starts_with(&self.root) {
            return Err(DaemonError::AccessDenied(format!(
                "Path is outside the workspace: {relative}"
            )));
        }

        let resolved = candidate.canonicalize().map_err(|_| {
            DaemonError::NotFound(format!("Path does not exist: {relative}"))
        })?;

        // Re-check after canonicalization; symlinks can escape what
        // the lexical pass admitted.
        if !resolved.starts_with(&self.root) {
            return Err(DaemonError::AccessDenied(format!(
                "Path is outside the workspace: {relative}"
            )));
        }

        if resolved.is_file() {
            let ext = resolved
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if !self.allowed_extensions.iter().any(|a| a == &ext) {
                return Err(DaemonError::AccessDenied(format!(
                    "File extension not allowed: {relative}"
                )));
            }
        }

        Ok(resolved)
    }

    /// Exact-match check against the command allow-list. Logs a
    /// warning for commands on the dangerous list.
    pub fn is_command_allowed(&self, name: &str) -> bool {
        if DANGEROUS_COMMANDS.contains(&name) {
            warn!("Dangerous command requested: {name}");
        }
        self.allowed_commands.iter().any(|c| c == name)
    }

    pub fn mime_for_path(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        MIME_TABLE
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, m)| *m)
            .unwrap_or("text/plain")
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::Sandbox;
    use crate::error::DaemonError;
    use std::path::Path;

    fn sandbox_in(dir: &Path) -> Sandbox {
        Sandbox::new(dir.to_path_buf(), None, None)
    }

    #[test]
    fn resolves_file_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1);\n").unwrap();
        let sandbox = sandbox_in(dir.path());

        let resolved = sandbox.resolve_path("app.js").unwrap();
        assert!(resolved.ends_with("app.js"));
    }

    #[test]
    fn rejects_traversal_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());

        let err = sandbox.resolve_path("../../etc/passwd").unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[test]
    fn traversal_is_denied_even_when_the_target_does_not_exist() {
        // A nested root makes `../../etc/passwd` land on a path that
        // does not exist; the answer must still be access-denied, not
        // not-found.
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        std::fs::create_dir_all(&root).unwrap();
        let sandbox = sandbox_in(&root);

        let err = sandbox.resolve_path("../../etc/passwd").unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[test]
    fn rejects_absolute_path_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());

        let err = sandbox.resolve_path("/etc/passwd").unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());

        let err = sandbox.resolve_path("missing.js").unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[test]
    fn rejects_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("core.bin"), [0u8; 4]).unwrap();
        let sandbox = sandbox_in(dir.path());

        let err = sandbox.resolve_path("core.bin").unwrap_err();
        assert!(matches!(err, DaemonError::AccessDenied(_)));
    }

    #[test]
    fn command_allow_list_is_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());

        assert!(sandbox.is_command_allowed("git"));
        assert!(sandbox.is_command_allowed("echo"));
        assert!(!sandbox.is_command_allowed("rm"));
        assert!(!sandbox.is_command_allowed("gitt"));
    }

    #[test]
    fn command_override_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(
            dir.path().to_path_buf(),
            None,
            Some(vec!["only-this".to_string()]),
        );

        assert!(sandbox.is_command_allowed("only-this"));
        assert!(!sandbox.is_command_allowed("git"));
    }

    #[test]
    fn mime_lookup_falls_back_to_plain_text() {
        assert_eq!(Sandbox::mime_for_path(Path::new("a.rs")), "text/x-rust");
        assert_eq!(Sandbox::mime_for_path(Path::new("a.py")), "text/x-python");
        assert_eq!(Sandbox::mime_for_path(Path::new("a.weird")), "text/plain");
    }
}

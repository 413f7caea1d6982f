//! Git operations via the `git` binary. A missing repository is a
//! recoverable condition: status and diff return empty results, while
//! commit fails with a git error.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use crate::error::DaemonError;
use crate::protocol::{GitCommitResult, GitDiffResult, GitFileStatus, GitStatusResult};

/// Max diff size before truncation (1MB)
const MAX_DIFF_SIZE: usize = 1_000_000;

/// Check if path is a git repository
pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get branch name plus staged/unstaged files with line stats
pub fn status(path: &Path) -> Result<GitStatusResult, DaemonError> {
    if !is_git_repo(path) {
        return Ok(GitStatusResult {
            is_repository: false,
            branch_name: String::new(),
            staged_files: vec![],
            unstaged_files: vec![],
            total_additions: 0,
            total_deletions: 0,
        });
    }

    let branch_output = git(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    let branch_name = String::from_utf8_lossy(&branch_output.stdout)
        .trim()
        .to_string();

    let status_output = git(path, &["status", "--porcelain=v1"])?;
    let (mut staged_files, mut unstaged_files) = parse_porcelain_status(&status_output.stdout);

    let staged_stats = parse_numstat(&git(path, &["diff", "--cached", "--numstat"])?.stdout);
    let unstaged_stats = parse_numstat(&git(path, &["diff", "--numstat"])?.stdout);

    for file in &mut staged_files {
        if let Some((add, del)) = staged_stats.get(&file.path) {
            file.additions = *add;
            file.deletions = *del;
        }
    }
    for file in &mut unstaged_files {
        if let Some((add, del)) = unstaged_stats.get(&file.path) {
            file.additions = *add;
            file.deletions = *del;
        }
    }

    let total_additions = staged_files.iter().map(|f| f.additions).sum::<i32>()
        + unstaged_files.iter().map(|f| f.additions).sum::<i32>();
    let total_deletions = staged_files.iter().map(|f| f.deletions).sum::<i32>()
        + unstaged_files.iter().map(|f| f.deletions).sum::<i32>();

    Ok(GitStatusResult {
        is_repository: true,
        branch_name,
        staged_files,
        unstaged_files,
        total_additions,
        total_deletions,
    })
}

/// Diff text, optionally staged-only or limited to one path, truncated
/// past [`MAX_DIFF_SIZE`].
pub fn diff(path: &Path, staged: bool, file: Option<&str>) -> Result<GitDiffResult, DaemonError> {
    if !is_git_repo(path) {
        return Ok(GitDiffResult {
            is_repository: false,
            diff: String::new(),
            truncated: false,
        });
    }

    let mut args: Vec<&str> = vec!["diff"];
    if staged {
        args.push("--cached");
    }
    if let Some(file) = file {
        args.push("--");
        args.push(file);
    }

    let output = git(path, &args)?;
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let truncated = text.len() > MAX_DIFF_SIZE;
    if truncated {
        text.truncate(MAX_DIFF_SIZE);
    }

    Ok(GitDiffResult {
        is_repository: true,
        diff: text,
        truncated,
    })
}

/// Stage the given paths (everything when empty).
pub fn add(path: &Path, paths: &[String]) -> Result<(), DaemonError> {
    if !is_git_repo(path) {
        return Err(DaemonError::Git("Not a git repository".to_string()));
    }

    let mut args: Vec<&str> = vec!["add"];
    if paths.is_empty() {
        args.push("-A");
    } else {
        args.push("--");
        args.extend(paths.iter().map(|s| s.as_str()));
    }

    let output = git(path, &args)?;
    if !output.status.success() {
        return Err(DaemonError::Git(format!(
            "git add failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Commit staged changes and return the resulting commit hash.
pub fn commit(path: &Path, message: &str) -> Result<GitCommitResult, DaemonError> {
    if !is_git_repo(path) {
        return Err(DaemonError::Git("Not a git repository".to_string()));
    }
    if message.trim().is_empty() {
        return Err(DaemonError::Validation(
            "Commit message must not be empty".to_string(),
        ));
    }

    let output = git(path, &["commit", "-m", message])?;
    if !output.status.success() {
        return Err(DaemonError::Git(format!(
            "git commit failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let hash_output = git(path, &["rev-parse", "HEAD"])?;
    let commit = String::from_utf8_lossy(&hash_output.stdout).trim().to_string();

    Ok(GitCommitResult {
        commit,
        message: message.to_string(),
    })
}

// --- Internal helpers ---

fn git(path: &Path, args: &[&str]) -> Result<std::process::Output, DaemonError> {
    Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .map_err(|e| DaemonError::Git(format!("Failed to run git {}: {e}", args.join(" "))))
}

fn parse_porcelain_status(output: &[u8]) -> (Vec<GitFileStatus>, Vec<GitFileStatus>) {
    let mut staged = Vec::new();
    let mut unstaged = Vec::new();

    let output_str = String::from_utf8_lossy(output);
    for line in output_str.lines() {
        if line.len() < 3 {
            continue;
        }

        let index_status = line.chars().next().unwrap_or(' ');
        let worktree_status = line.chars().nth(1).unwrap_or(' ');
        let path = line[3..].to_string();

        // Staged changes (index column)
        if index_status != ' ' && index_status != '?' {
            staged.push(GitFileStatus {
                path: path.clone(),
                status: status_char_to_string(index_status),
                additions: 0,
                deletions: 0,
            });
        }

        // Unstaged changes (worktree column) or untracked files
        if worktree_status != ' ' {
            unstaged.push(GitFileStatus {
                path,
                status: if index_status == '?' {
                    "untracked".to_string()
                } else {
                    status_char_to_string(worktree_status)
                },
                additions: 0,
                deletions: 0,
            });
        }
    }

    (staged, unstaged)
}

fn status_char_to_string(c: char) -> String {
    match c {
        'M' => "modified",
        'A' => "added",
        'D' => "deleted",
        'R' => "renamed",
        'C' => "copied",
        'U' => "unmerged",
        '?' => "untracked",
        _ => "unknown",
    }
    .to_string()
}

fn parse_numstat(output: &[u8]) -> HashMap<String, (i32, i32)> {
    let mut stats = HashMap::new();
    let output_str = String::from_utf8_lossy(output);

    for line in output_str.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() >= 3 {
            let additions = parts[0].parse::<i32>().unwrap_or(0);
            let deletions = parts[1].parse::<i32>().unwrap_or(0);
            stats.insert(parts[2].to_string(), (additions, deletions));
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::{diff, parse_numstat, parse_porcelain_status, status};

    #[test]
    fn porcelain_splits_staged_and_unstaged() {
        let raw = b"M  staged.rs\n M worktree.rs\n?? new.rs\n";
        let (staged, unstaged) = parse_porcelain_status(raw);

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].path, "staged.rs");
        assert_eq!(staged[0].status, "modified");

        assert_eq!(unstaged.len(), 2);
        assert_eq!(unstaged[0].path, "worktree.rs");
        assert_eq!(unstaged[1].status, "untracked");
    }

    #[test]
    fn numstat_parses_counts() {
        let raw = b"3\t1\tsrc/main.rs\n-\t-\timage.png\n";
        let stats = parse_numstat(raw);
        assert_eq!(stats.get("src/main.rs"), Some(&(3, 1)));
        assert_eq!(stats.get("image.png"), Some(&(0, 0)));
    }

    #[test]
    fn non_repository_yields_empty_results() {
        let dir = tempfile::tempdir().unwrap();

        let s = status(dir.path()).unwrap();
        assert!(!s.is_repository);
        assert!(s.staged_files.is_empty());

        let d = diff(dir.path(), false, None).unwrap();
        assert!(!d.is_repository);
        assert!(d.diff.is_empty());
    }
}

//! Point-in-time facts about the version-control repository.
//!
//! The core consumes the `GitFacts` trait only; the process-backed `GitCli`
//! is the one shipped implementation. The dependency is hard: construction
//! fails when the directory is not a repository, and call sites have no
//! fallback path.

use crate::core::error::AipmError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Commit counts relative to the upstream of the current branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AheadBehind {
    pub ahead: u64,
    pub behind: u64,
    pub has_upstream: bool,
}

/// Pure queries over the external repository. Implementations must not
/// mutate repository state.
pub trait GitFacts {
    fn current_branch(&self) -> Result<String, AipmError>;
    fn all_branches(&self) -> Result<Vec<String>, AipmError>;
    fn is_clean(&self) -> Result<bool, AipmError>;
    fn uncommitted_count(&self) -> Result<u64, AipmError>;
    fn has_staged(&self) -> Result<bool, AipmError>;
    fn ahead_behind(&self) -> Result<AheadBehind, AipmError>;
    fn stash_count(&self) -> Result<u64, AipmError>;
    fn upstream_of(&self, branch: &str) -> Result<Option<String>, AipmError>;
    fn merged_branches(&self, target: &str) -> Result<Vec<String>, AipmError>;
    fn branch_commit(&self, reference: &str) -> Result<String, AipmError>;
    fn branch_creation_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError>;
    fn branch_last_commit_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError>;
}

/// Shell-out implementation over the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    /// Bind to the repository at `root`. Fails at construction time when
    /// `root` is not inside a git work tree or `git` is not runnable.
    pub fn discover(root: &Path) -> Result<Self, AipmError> {
        let cli = GitCli {
            repo_root: root.to_path_buf(),
        };
        let inside = cli.run(&["rev-parse", "--is-inside-work-tree"])?;
        if inside != "true" {
            return Err(AipmError::ExternalFactError(format!(
                "{} is not inside a git work tree",
                root.display()
            )));
        }
        Ok(cli)
    }

    fn run(&self, args: &[&str]) -> Result<String, AipmError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| AipmError::ExternalFactError(format!("git failed to start: {e}")))?;

        if !output.status.success() {
            return Err(AipmError::ExternalFactError(format!(
                "git {}: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like `run`, but a non-zero exit means "no answer" rather than failure.
    fn run_optional(&self, args: &[&str]) -> Result<Option<String>, AipmError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| AipmError::ExternalFactError(format!("git failed to start: {e}")))?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    fn porcelain_lines(&self) -> Result<Vec<String>, AipmError> {
        let raw = self.run(&["status", "--porcelain"])?;
        Ok(raw
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl GitFacts for GitCli {
    fn current_branch(&self) -> Result<String, AipmError> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn all_branches(&self) -> Result<Vec<String>, AipmError> {
        let raw = self.run(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(raw.lines().map(str::to_string).collect())
    }

    fn is_clean(&self) -> Result<bool, AipmError> {
        Ok(self.porcelain_lines()?.is_empty())
    }

    fn uncommitted_count(&self) -> Result<u64, AipmError> {
        Ok(self.porcelain_lines()?.len() as u64)
    }

    fn has_staged(&self) -> Result<bool, AipmError> {
        Ok(self
            .porcelain_lines()?
            .iter()
            .any(|l| !l.starts_with(' ') && !l.starts_with('?')))
    }

    fn ahead_behind(&self) -> Result<AheadBehind, AipmError> {
        let Some(raw) =
            self.run_optional(&["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])?
        else {
            return Ok(AheadBehind::default());
        };
        let mut parts = raw.split_whitespace();
        let ahead = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let behind = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Ok(AheadBehind {
            ahead,
            behind,
            has_upstream: true,
        })
    }

    fn stash_count(&self) -> Result<u64, AipmError> {
        let raw = self.run(&["stash", "list"])?;
        Ok(raw.lines().filter(|l| !l.is_empty()).count() as u64)
    }

    fn upstream_of(&self, branch: &str) -> Result<Option<String>, AipmError> {
        let spec = format!("{branch}@{{upstream}}");
        self.run_optional(&["rev-parse", "--abbrev-ref", &spec])
    }

    fn merged_branches(&self, target: &str) -> Result<Vec<String>, AipmError> {
        let raw = self.run(&[
            "branch",
            "--format=%(refname:short)",
            "--merged",
            target,
        ])?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != target)
            .map(str::to_string)
            .collect())
    }

    fn branch_commit(&self, reference: &str) -> Result<String, AipmError> {
        self.run(&["rev-parse", reference])
    }

    fn branch_creation_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError> {
        let raw = self.run_optional(&["log", "--reverse", "--format=%cI", branch])?;
        Ok(raw
            .and_then(|out| out.lines().next().map(str::to_string))
            .and_then(|line| parse_git_date(&line)))
    }

    fn branch_last_commit_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError> {
        let raw = self.run_optional(&["log", "-1", "--format=%cI", branch])?;
        Ok(raw.and_then(|line| parse_git_date(&line)))
    }
}

fn parse_git_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

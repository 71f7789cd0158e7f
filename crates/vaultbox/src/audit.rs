//! Audit log - one commit per store mutation
//!
//! The store root doubles as a git repository. Git is used purely as an
//! append-only record of who wrote what and when; history is never
//! amended or squashed.

use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

use crate::error::VaultError;

/// Sink for audit entries
pub trait AuditLog {
    /// Create the log's bookkeeping inside the store root
    fn init(&self) -> Result<()>;

    /// Whether the bookkeeping created by `init` is present
    fn is_initialized(&self) -> bool;

    /// Record one entry covering exactly `paths`
    fn commit(&self, paths: &[PathBuf]) -> Result<()>;

    /// Most recent entries, newest first
    fn history(&self, limit: usize) -> Result<Vec<String>>;
}

/// Commit author override
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// Git-backed audit log
pub struct GitAuditLog {
    repo_path: PathBuf,
    hostname: String,
    author: Option<Author>,
}

impl GitAuditLog {
    pub fn new(repo_path: &Path, hostname: &str) -> Self {
        // Absolute, since GIT_DIR is read after `-C` changes directory
        Self {
            repo_path: absolute(repo_path),
            hostname: hostname.to_string(),
            author: None,
        }
    }

    /// Commit as `author` instead of the user's git identity
    pub fn with_author(mut self, author: Author) -> Self {
        self.author = Some(author);
        self
    }

    /// Message recorded for a commit made at the current time
    pub fn message(&self) -> String {
        let t = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        format!("Automated commit at {} on {}", t, self.hostname)
    }

    /// The repository's own git directory
    pub fn git_dir(&self) -> PathBuf {
        self.repo_path.join(".git")
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            bail!(VaultError::AuditLog(format!(
                "No audit log at {} - run 'vaultbox init'",
                self.git_dir().display()
            )));
        }
        Ok(())
    }

    fn git(&self, args: &[&str], paths: &[PathBuf]) -> Result<Output> {
        // Pin the repository so git never falls back to an enclosing one
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.repo_path)
            .env("GIT_DIR", self.git_dir())
            .env("GIT_WORK_TREE", &self.repo_path);

        if let Some(author) = &self.author {
            cmd.arg("-c").arg(format!("user.name={}", author.name));
            cmd.arg("-c").arg(format!("user.email={}", author.email));
        }

        cmd.args(args);

        if !paths.is_empty() {
            cmd.arg("--").args(paths);
        }

        Ok(cmd
            .output()
            .map_err(|e| VaultError::AuditLog(format!("Failed to run git: {}", e)))?)
    }

    /// Run git and fail with `AuditLog` on a non-zero exit
    fn git_ok(&self, args: &[&str], paths: &[PathBuf]) -> Result<Output> {
        let output = self.git(args, paths)?;

        if !output.status.success() {
            bail!(VaultError::AuditLog(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output)
    }
}

impl AuditLog for GitAuditLog {
    fn init(&self) -> Result<()> {
        // Outside `git()`: a GIT_WORK_TREE at init time is saved as core.worktree
        let output = Command::new("git")
            .args(["init", "--quiet"])
            .arg(&self.repo_path)
            .output()
            .map_err(|e| VaultError::AuditLog(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            bail!(VaultError::AuditLog(format!(
                "git init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(path = %self.repo_path.display(), "initialized audit log");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.git_dir().is_dir()
    }

    fn commit(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            bail!(VaultError::AuditLog("Nothing to commit".to_string()));
        }
        self.ensure_initialized()?;

        // Relative to the repo so a symlinked root still matches the worktree
        let paths: Vec<PathBuf> = paths
            .iter()
            .map(|p| {
                let p = absolute(p);
                p.strip_prefix(&self.repo_path)
                    .map(Path::to_path_buf)
                    .unwrap_or(p)
            })
            .collect();
        let message = self.message();

        self.git_ok(&["add"], &paths)?;
        self.git_ok(&["commit", "--quiet", "-m", &message], &paths)?;

        debug!(count = paths.len(), %message, "recorded audit entry");
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<Vec<String>> {
        self.ensure_initialized()?;

        let head = self.git(&["rev-parse", "--verify", "--quiet", "HEAD"], &[])?;
        if !head.status.success() {
            return Ok(vec![]);
        }

        let count = format!("-{}", limit);
        let output = self.git_ok(&["log", &count, "--format=%h %s"], &[])?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

fn absolute(path: &Path) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    }
}

/// Get the local machine's host name
pub fn hostname() -> String {
    Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

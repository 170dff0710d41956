//! Git working copy operations.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tokio::process::Command as TokioCommand;

use super::auth::{build_auth_env, AuthEnv};
use super::parse::{first_line, format_git_error, is_up_to_date};
use super::types::{CommitResult, PullResult};
use crate::config::GitSettings;
use crate::gitops::error::{classify_git_error, GitOpsError, Result};

/// A local working copy tracking one branch of one remote.
#[derive(Debug, Clone)]
pub struct GitRepository {
    repo_path: PathBuf,
    branch: String,
    settings: GitSettings,
}

impl GitRepository {
    pub fn new(repo_path: impl Into<PathBuf>, branch: impl Into<String>, settings: GitSettings) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
            settings,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Clones `url` into the repository path, which must not exist yet.
    pub async fn clone_from(&self, url: &str) -> Result<()> {
        let parent = self
            .repo_path
            .parent()
            .ok_or_else(|| GitOpsError::FileOperation("clone target has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let target = self.repo_path.to_string_lossy().to_string();
        let output = self
            .run_remote(
                parent,
                &[
                    "clone",
                    "--branch",
                    &self.branch,
                    "--single-branch",
                    url,
                    &target,
                ],
            )
            .await?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }

        self.configure_identity()?;
        log::debug!("Cloned {} ({}) into {}", url, self.branch, target);
        Ok(())
    }

    /// Fast-forward pull of the tracked branch.
    pub async fn pull(&self) -> Result<PullResult> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        let output = self
            .run_remote(
                &self.repo_path,
                &["pull", "--ff-only", "origin", &self.branch],
            )
            .await?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }

        Ok(PullResult {
            already_up_to_date: is_up_to_date(&output),
        })
    }

    /// Pushes local commits on the tracked branch.
    pub async fn push(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        let output = self
            .run_remote(&self.repo_path, &["push", "origin", &refspec])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Stages a path (additions, modifications and deletions).
    pub fn stage(&self, relative: &Path) -> Result<()> {
        let path = relative.to_string_lossy();
        self.run_checked(&["add", "--all", "--", &path])?;
        Ok(())
    }

    /// Removes a path from the index. The working tree file may already be gone.
    pub fn unstage_removed(&self, relative: &Path) -> Result<()> {
        let path = relative.to_string_lossy();
        self.run_checked(&["rm", "--cached", "--quiet", "--ignore-unmatch", "--", &path])?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run_git(&["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(GitOpsError::GitOperation(format_git_error(&output))),
        }
    }

    /// Commits whatever is staged. Nothing staged is not an error.
    pub fn commit(&self, message: &str) -> Result<CommitResult> {
        if !self.has_staged_changes()? {
            return Ok(CommitResult {
                commit_hash: None,
                message: "Nothing to commit".to_string(),
            });
        }

        self.run_checked(&["commit", "--quiet", "-m", message])?;
        let hash = self.head_commit()?;
        log::debug!("Committed {} in {}", hash, self.repo_path.display());

        Ok(CommitResult {
            commit_hash: Some(hash),
            message: message.to_string(),
        })
    }

    pub fn head_commit(&self) -> Result<String> {
        let output = self.run_checked(&["rev-parse", "HEAD"])?;
        Ok(first_line(&output))
    }

    fn configure_identity(&self) -> Result<()> {
        self.run_checked(&["config", "user.name", &self.settings.user_name])?;
        self.run_checked(&["config", "user.email", &self.settings.user_email])?;
        Ok(())
    }

    /// Runs a local git command in the repository directory.
    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run_git(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(GitOpsError::GitOperation(format_git_error(&output)))
        }
    }

    /// Runs a network-facing git command with credentials and the
    /// configured timeout.
    async fn run_remote(&self, cwd: &Path, args: &[&str]) -> Result<Output> {
        let auth: AuthEnv = build_auth_env(&self.settings.auth)?;

        let mut cmd = TokioCommand::new("git");
        cmd.current_dir(cwd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let timeout = self.settings.timeout();
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| GitOpsError::GitTimeout(timeout.as_secs()))?
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))?;

        drop(auth);
        Ok(output)
    }
}

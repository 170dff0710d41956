//! Git layer error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Invalid manifest path segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git merge conflict: {0}")]
    GitMergeConflict(String),

    #[error("Git push rejected: {0}")]
    GitPushRejected(String),

    #[error("Git repository not initialized")]
    GitNotInitialized,

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitOpsError::GitNetworkError(_)
                | GitOpsError::GitTimeout(_)
                | GitOpsError::GitPushRejected(_)
                | GitOpsError::GitMergeConflict(_)
        )
    }
}

/// Classifies git stderr into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();
    let trimmed = stderr.trim().to_string();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(trimmed);
    }

    if lower.contains("[rejected]")
        || lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("failed to push some refs")
    {
        return GitOpsError::GitPushRejected(trimmed);
    }

    if lower.contains("merge conflict")
        || lower.contains("not possible to fast-forward")
        || (lower.contains("conflict") && lower.contains("merge"))
    {
        return GitOpsError::GitMergeConflict(trimmed);
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return GitOpsError::GitAuthFailed(trimmed);
    }

    GitOpsError::GitOperation(trimmed)
}

pub type Result<T> = std::result::Result<T, GitOpsError>;

//! Pure data types for git operations.

use serde::{Deserialize, Serialize};

/// Result of committing staged changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    /// `None` when nothing was staged.
    pub commit_hash: Option<String>,
    pub message: String,
}

impl CommitResult {
    pub fn is_empty(&self) -> bool {
        self.commit_hash.is_none()
    }
}

/// Result of a fast-forward pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResult {
    pub already_up_to_date: bool,
}

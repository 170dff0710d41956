//! Job execution errors, classified for the retry decision.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::gitops::GitOpsError;
use crate::render::RenderError;

#[derive(Error, Debug)]
pub enum JobError {
    /// Bad input discovered at execution time; never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    TemplateNotFound(String),

    /// The resource is not in a state this operation can act on.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Render failed: {message}")]
    Render { message: String, retryable: bool },

    #[error("Deploy failed: {message}")]
    Deploy { message: String, retryable: bool },

    /// Store I/O and other infrastructure hiccups.
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Validation(_) | JobError::TemplateNotFound(_) | JobError::Conflict(_) => {
                false
            }
            JobError::Render { retryable, .. } | JobError::Deploy { retryable, .. } => *retryable,
            JobError::Transient(_) => true,
        }
    }
}

impl From<RenderError> for JobError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::TemplateNotFound { .. } => JobError::TemplateNotFound(err.to_string()),
            other => JobError::Render {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

impl From<GitOpsError> for JobError {
    fn from(err: GitOpsError) -> Self {
        JobError::Deploy {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<DatabaseError> for JobError {
    fn from(err: DatabaseError) -> Self {
        JobError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_is_permanent() {
        let err: JobError = RenderError::TemplateNotFound {
            resource_type: "namespace".to_string(),
            flavor: "gold".to_string(),
        }
        .into();
        assert!(matches!(err, JobError::TemplateNotFound(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("TemplateNotFound"));
    }

    #[test]
    fn test_git_classification_carries_over() {
        let network: JobError = GitOpsError::GitNetworkError("could not resolve host".into()).into();
        assert!(network.is_retryable());

        let auth: JobError = GitOpsError::GitAuthFailed("denied".into()).into();
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_template_source_failure_is_transient() {
        let err: JobError = RenderError::Source(GitOpsError::GitTimeout(30)).into();
        assert!(err.is_retryable());
        assert!(JobError::Transient("db".into()).is_retryable());
        assert!(!JobError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_conflict_is_permanent() {
        let err = JobError::Conflict("resource acme/namespace/payments does not exist".into());
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("Conflict: "));
    }
}

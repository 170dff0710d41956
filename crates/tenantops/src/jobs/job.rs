//! Job records and the status machine they move through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::notify::WebhookSubject;
use crate::resources::{resource_key, Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(JobStatus::Submitted),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Edges of the lifecycle graph. `Failed -> InProgress` is the retry
    /// edge and is only taken while the job is not terminal.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::InProgress)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOperation {
    Create,
    Update,
    Delete,
}

impl JobOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOperation::Create => "create",
            JobOperation::Update => "update",
            JobOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(JobOperation::Create),
            "update" => Some(JobOperation::Update),
            "delete" => Some(JobOperation::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller hands in to start a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_type: String,
    pub tenant_id: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub operation: JobOperation,
    #[serde(default)]
    pub spec: Spec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub tenant_id: String,
    pub cluster_id: Option<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub operation: JobOperation,
    pub spec: Spec,
    pub status: JobStatus,
    /// Executions started so far.
    pub attempts: u32,
    pub logs: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Why an update was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job is already terminal ({0})")]
    Terminal(JobStatus),

    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },
}

impl Job {
    /// A fresh `Submitted` job with a new id.
    pub fn from_submission(submission: JobSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: submission.job_type,
            tenant_id: submission.tenant_id,
            cluster_id: submission.cluster_id.filter(|c| !c.is_empty()),
            resource_type: submission.resource_type,
            resource_name: submission.resource_name,
            operation: submission.operation,
            spec: submission.spec,
            status: JobStatus::Submitted,
            attempts: 0,
            logs: vec!["Job submitted".to_string()],
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Completed, or failed with no retry left.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => self.finished_at.is_some(),
            _ => false,
        }
    }

    pub fn resource_key(&self) -> String {
        resource_key(&self.tenant_id, &self.resource_type, &self.resource_name)
    }

    pub fn webhook_subject(&self) -> WebhookSubject<'_> {
        WebhookSubject {
            job_id: &self.id,
            tenant_id: &self.tenant_id,
            resource_type: &self.resource_type,
            resource_name: &self.resource_name,
        }
    }

    /// Applies `update` in place, or refuses it and leaves the job as it was.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(TransitionError::Illegal {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
            match next {
                JobStatus::InProgress => self.attempts += 1,
                JobStatus::Completed => self.finished_at = Some(now),
                JobStatus::Failed if update.terminal => self.finished_at = Some(now),
                _ => {}
            }
        }

        self.logs.extend(update.logs.iter().cloned());
        for (key, value) in &update.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A change to a job: optional status move, log lines to append, metadata
/// keys to merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub logs: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Marks a `Failed` update as final.
    pub terminal: bool,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn merge_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn submission(name: &str) -> JobSubmission {
        JobSubmission {
            job_type: "create_namespace".to_string(),
            tenant_id: "acme".to_string(),
            cluster_id: None,
            resource_type: "namespace".to_string(),
            resource_name: name.to_string(),
            operation: JobOperation::Create,
            spec: Spec::new(),
        }
    }

    #[test]
    fn test_fresh_job() {
        let a = Job::from_submission(submission("payments"));
        let b = Job::from_submission(submission("payments"));
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, JobStatus::Submitted);
        assert_eq!(a.attempts, 0);
        assert!(!a.is_terminal());
        assert_eq!(a.resource_key(), "acme/namespace/payments");
    }

    #[test]
    fn test_transition_graph() {
        use JobStatus::*;
        assert!(Submitted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(InProgress));

        assert!(!Submitted.can_transition_to(Completed));
        assert!(!Submitted.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(Submitted));
    }

    #[test]
    fn test_attempts_and_retry_path() {
        let mut job = Job::from_submission(submission("payments"));
        let now = Utc::now();

        job.apply(&JobUpdate::status(JobStatus::InProgress), now).unwrap();
        assert_eq!(job.attempts, 1);

        job.apply(&JobUpdate::status(JobStatus::Failed).log("boom"), now)
            .unwrap();
        assert!(!job.is_terminal());

        job.apply(&JobUpdate::status(JobStatus::InProgress), now).unwrap();
        assert_eq!(job.attempts, 2);

        job.apply(&JobUpdate::status(JobStatus::Failed).terminal(), now)
            .unwrap();
        assert!(job.is_terminal());
        assert!(job.finished_at.is_some());

        let err = job
            .apply(&JobUpdate::status(JobStatus::InProgress), now)
            .unwrap_err();
        assert_eq!(err, TransitionError::Terminal(JobStatus::Failed));
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_completed_is_immutable() {
        let mut job = Job::from_submission(submission("payments"));
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::InProgress), now).unwrap();
        job.apply(&JobUpdate::status(JobStatus::Completed), now).unwrap();

        let before = job.clone();
        assert!(job.apply(&JobUpdate::default().log("late"), now).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn test_illegal_transition_leaves_job_untouched() {
        let mut job = Job::from_submission(submission("payments"));
        let before = job.clone();
        let err = job
            .apply(
                &JobUpdate::status(JobStatus::Completed).log("skipped ahead"),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert_eq!(job, before);
    }

    #[test]
    fn test_logs_append_and_metadata_merge() {
        let mut job = Job::from_submission(submission("payments"));
        let now = Utc::now();
        job.apply(
            &JobUpdate::default()
                .logs(["one", "two"])
                .meta("a", 1)
                .meta("b", "x"),
            now,
        )
        .unwrap();
        job.apply(&JobUpdate::default().log("three").meta("a", 2), now)
            .unwrap();

        assert_eq!(job.logs, vec!["Job submitted", "one", "two", "three"]);
        assert_eq!(job.metadata.get("a"), Some(&json!(2)));
        assert_eq!(job.metadata.get("b"), Some(&json!("x")));
        assert_eq!(job.status, JobStatus::Submitted);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            JobStatus::Submitted,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
        assert_eq!(JobOperation::parse("delete"), Some(JobOperation::Delete));
        assert_eq!(
            serde_json::to_value(JobStatus::InProgress).unwrap(),
            json!("in_progress")
        );
    }
}

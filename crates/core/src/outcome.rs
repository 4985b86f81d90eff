//! Terminal job outcomes.

use serde::Serialize;

use crate::envelope::ProgressEnvelope;
use crate::error::JobError;
use crate::status::JobStatus;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { result: Option<serde_json::Value> },
    Failed { message: String },
    TimedOut,
    Cancelled,
}

impl JobOutcome {
    /// The outcome an envelope represents, or `None` while the job is
    /// still pending or running.
    pub fn from_envelope(envelope: &ProgressEnvelope) -> Option<Self> {
        match envelope.status {
            JobStatus::Pending | JobStatus::Running => None,
            JobStatus::Completed => Some(Self::Completed {
                result: envelope.result.clone(),
            }),
            JobStatus::Failed => Some(Self::Failed {
                message: envelope.failure_message(),
            }),
            JobStatus::Timeout => Some(Self::TimedOut),
            JobStatus::Cancelled => Some(Self::Cancelled),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
            Self::TimedOut => JobStatus::Timeout,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }

    /// Split into the job result or the terminal error.
    pub fn into_result(self) -> Result<Option<serde_json::Value>, JobError> {
        match self {
            Self::Completed { result } => Ok(result),
            Self::Failed { message } => Err(JobError::Failed { message }),
            Self::TimedOut => Err(JobError::TimedOut),
            Self::Cancelled => Err(JobError::Cancelled),
        }
    }
}

//! The job registry contract.
//!
//! The registry is the remote service that accepts, runs, and reports on
//! jobs. Everything above this trait treats it as a black box addressed
//! only by [`JobId`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use jobwatch_core::envelope::ProgressEnvelope;
use jobwatch_core::error::{SubmissionError, TransportError};
use jobwatch_core::types::{Job, JobId};

/// Raw text frames from an open progress stream.
///
/// The stream ends when the server closes the connection. Decoding is
/// left to the stream transport so malformed frames can be skipped
/// without dropping the connection.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// A request to start a job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Job parameters, forwarded to the registry untouched.
    pub params: serde_json::Value,
    /// Key that lets the registry deduplicate retried submissions.
    pub idempotency_key: String,
}

impl SubmitRequest {
    /// Create a request with a fresh idempotency key.
    pub fn new(params: serde_json::Value) -> Self {
        Self {
            params,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Reuse a caller-provided idempotency key (e.g. when resubmitting
    /// after a crash).
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

/// What the registry did with a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A job was created and is now running in the background.
    Accepted(Job),
    /// The unit of work was empty; the result is already final. Treated
    /// exactly like a job that has completed.
    Empty {
        message: Option<String>,
        result: serde_json::Value,
    },
}

/// Body returned by the registry's start endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl StartResponse {
    pub fn into_submission(self) -> Submission {
        match self.job_id {
            Some(id) => Submission::Accepted(Job::accepted(id)),
            None => Submission::Empty {
                message: self.message,
                result: self.result,
            },
        }
    }
}

/// Remote service that owns job execution and progress.
#[async_trait]
pub trait JobRegistry: Send + Sync + 'static {
    /// Start a job. Fails fast; no job exists on error.
    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError>;

    /// Fetch the current status of a job as a single envelope.
    async fn fetch_status(&self, job_id: &JobId) -> Result<ProgressEnvelope, TransportError>;

    /// Open a push stream of progress frames for a job.
    async fn open_stream(&self, job_id: &JobId) -> Result<FrameStream, TransportError>;

    /// Ask the registry to stop a job. Best-effort: the job may keep
    /// reporting `running` for a while.
    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError>;
}

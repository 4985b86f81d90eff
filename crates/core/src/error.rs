//! Error taxonomy for job submission and progress delivery.
//!
//! * [`SubmissionError`] is fatal and surfaced to the caller immediately.
//! * [`TransportError`] is absorbed by the delivery controller and never
//!   reaches a progress consumer.
//! * [`JobError`] carries the non-successful terminal outcomes.

/// Submitting a job failed; no job id exists and nothing is observed.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The registry could not be reached.
    #[error("Job registry unreachable: {0}")]
    Unreachable(String),

    /// The registry rejected the request (validation, auth, ...).
    #[error("Submission rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The registry accepted the request but the response was unusable.
    #[error("Invalid submission response: {0}")]
    InvalidResponse(String),
}

/// A delivery channel hiccup. Recoverable by reconnecting or polling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish a connection or send a request.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server closed the stream before sending a final envelope.
    #[error("Stream closed before a final envelope")]
    Closed,

    /// The registry answered with a non-2xx status.
    #[error("Registry returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("Failed to decode registry response: {0}")]
    Decode(String),
}

/// A job reached a terminal status other than `completed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job failed: {message}")]
    Failed { message: String },

    #[error("Job timed out")]
    TimedOut,

    #[error("Job cancelled")]
    Cancelled,

    /// The observer stopped following the job before it finished.
    #[error("Observer detached before the job reached a terminal status")]
    Detached,
}

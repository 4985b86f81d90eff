//! Shared data model for job-progress delivery.
//!
//! Everything a progress consumer and a job registry agree on lives
//! here: job identifiers, the [`JobStatus`](status::JobStatus) enum, the
//! normalized [`ProgressEnvelope`](envelope::ProgressEnvelope), terminal
//! [`JobOutcome`](outcome::JobOutcome)s and the error taxonomy.

pub mod envelope;
pub mod error;
pub mod outcome;
pub mod status;
pub mod types;

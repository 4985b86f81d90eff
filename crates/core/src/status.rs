//! Job lifecycle status.
//!
//! Registries are not consistent about spelling, so a handful of wire
//! aliases are accepted. Anything else fails to decode; there is no
//! catch-all variant.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-reported lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "processing", alias = "in_progress")]
    Running,
    #[serde(alias = "done", alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "timed_out")]
    Timeout,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobStatus {
    /// Whether no further envelopes are expected after this status.
    pub fn is_terminal(self) -> bool {
        match self {
            Self::Pending | Self::Running => false,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

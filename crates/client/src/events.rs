//! Lifecycle events emitted by a [`JobObserver`](crate::observer::JobObserver).
//!
//! Each event is published exactly once per qualifying state transition.
//! Transport hiccups never appear here; the only delivery-related event
//! is [`ObserverEvent::Degraded`], which signals slower updates.

use serde::Serialize;

use jobwatch_core::envelope::{ChunkUpdate, ItemError};
use jobwatch_core::outcome::JobOutcome;
use jobwatch_core::status::JobStatus;
use jobwatch_core::types::JobId;

/// A progress-level event for an observed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// Observation of a job began.
    Started { job_id: JobId },

    /// The job moved forward.
    Progress {
        job_id: JobId,
        status: JobStatus,
        /// Completion percentage (0-100), never lower than a previous one.
        percent: u8,
        current_step: Option<String>,
    },

    /// A chunk of the job finished.
    ChunkCompleted { job_id: JobId, update: ChunkUpdate },

    /// The job recorded an error for a single item.
    ItemFailed { job_id: JobId, error: ItemError },

    /// Updates now arrive by polling and may be slower.
    Degraded { job_id: JobId },

    /// The job completed. `job_id` is `None` when the submission was
    /// empty and no job was ever created.
    Completed {
        job_id: Option<JobId>,
        result: Option<serde_json::Value>,
    },

    /// The job failed.
    Failed { job_id: JobId, message: String },

    /// The registry gave up on the job.
    TimedOut { job_id: JobId },

    /// The job was cancelled.
    Cancelled { job_id: JobId },
}

impl ObserverEvent {
    /// The terminal event for `outcome`.
    pub fn terminal(job_id: JobId, outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed { result } => Self::Completed {
                job_id: Some(job_id),
                result,
            },
            JobOutcome::Failed { message } => Self::Failed { job_id, message },
            JobOutcome::TimedOut => Self::TimedOut { job_id },
            JobOutcome::Cancelled => Self::Cancelled { job_id },
        }
    }

    /// Whether this is the last event for its job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::TimedOut { .. } | Self::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = ObserverEvent::Progress {
            job_id: JobId::new("scan-1"),
            status: JobStatus::Running,
            percent: 35,
            current_step: Some("ocr".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["job_id"], "scan-1");
        assert_eq!(json["status"], "running");
        assert_eq!(json["percent"], 35);
    }

    #[test]
    fn terminal_mapping() {
        let id = JobId::new("j");
        assert!(ObserverEvent::terminal(id.clone(), JobOutcome::TimedOut).is_terminal());
        assert_eq!(
            ObserverEvent::terminal(id.clone(), JobOutcome::Cancelled),
            ObserverEvent::Cancelled { job_id: id.clone() }
        );
        assert!(!ObserverEvent::Degraded { job_id: id }.is_terminal());
    }
}

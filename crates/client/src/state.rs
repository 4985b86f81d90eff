//! Progress state machine.
//!
//! [`ObserverState`] folds an ordered sequence of envelopes into the
//! current view of a job. Envelopes arrive without a reorder buffer, so
//! the reducer itself guards against stragglers:
//!
//! * while the job is running, the highest percent seen wins;
//! * a terminal envelope is adopted as-is, even with a lower percent;
//! * after a terminal envelope everything is ignored;
//! * chunk updates and item errors are appended, never replaced.

use serde::Serialize;

use jobwatch_core::envelope::{ChunkUpdate, ItemError, ProgressEnvelope};
use jobwatch_core::outcome::JobOutcome;
use jobwatch_core::status::JobStatus;
use jobwatch_core::types::JobId;

/// Effect of applying one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job was already terminal; nothing changed.
    Ignored,
    /// The view moved forward; the job is still in flight.
    Progressed,
    /// The job just reached a terminal status.
    Terminal(JobOutcome),
}

/// Client-local aggregate for one observed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObserverState {
    job_id: Option<JobId>,
    latest: Option<ProgressEnvelope>,
    chunk_log: Vec<ChunkUpdate>,
    error_log: Vec<ItemError>,
}

impl ObserverState {
    /// Empty state bound to `job_id`.
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::default()
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// The most recently applied envelope (with the percent floor applied).
    pub fn latest(&self) -> Option<&ProgressEnvelope> {
        self.latest.as_ref()
    }

    /// Every chunk update received, in arrival order.
    pub fn chunk_log(&self) -> &[ChunkUpdate] {
        &self.chunk_log
    }

    /// Every item error received, in arrival order.
    pub fn error_log(&self) -> &[ItemError] {
        &self.error_log
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.latest.as_ref().map(|e| e.status)
    }

    pub fn percent(&self) -> u8 {
        self.latest.as_ref().map_or(0, |e| e.progress_percent)
    }

    pub fn is_terminal(&self) -> bool {
        self.latest.as_ref().is_some_and(ProgressEnvelope::is_terminal)
    }

    /// How the job ended, once it has.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.latest.as_ref().and_then(JobOutcome::from_envelope)
    }

    /// Fold one envelope into the state.
    pub fn apply(&mut self, envelope: ProgressEnvelope) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }

        let mut envelope = envelope.normalize();
        self.chunk_log.extend(envelope.chunk_updates.iter().cloned());
        self.error_log.extend(envelope.errors.iter().cloned());

        if let Some(outcome) = JobOutcome::from_envelope(&envelope) {
            self.latest = Some(envelope);
            return Transition::Terminal(outcome);
        }

        if let Some(current) = &self.latest {
            envelope.progress_percent = envelope.progress_percent.max(current.progress_percent);
            if envelope.status == JobStatus::Pending && current.status == JobStatus::Running {
                envelope.status = JobStatus::Running;
            }
        }
        self.latest = Some(envelope);
        Transition::Progressed
    }
}

//! Job observer: the consumer-facing handle for one job at a time.
//!
//! [`JobObserver`] submits or attaches to a job, spawns the delivery
//! controller and a reducer task for it, and exposes the result two
//! ways:
//!
//! * [`JobObserver::view`]: a `watch` receiver always holding the
//!   current [`ObserverState`];
//! * [`JobObserver::subscribe`]: a `broadcast` receiver of
//!   [`ObserverEvent`]s, one per qualifying transition.
//!
//! Delivery tasks belong to the observer and are torn down by
//! [`JobObserver::reset`] or on drop.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jobwatch_core::envelope::ProgressEnvelope;
use jobwatch_core::error::{JobError, SubmissionError, TransportError};
use jobwatch_core::status::JobStatus;
use jobwatch_core::types::JobId;

use crate::config::DeliveryConfig;
use crate::controller::{Delivery, DeliveryController};
use crate::events::ObserverEvent;
use crate::reconnect::ChannelState;
use crate::registry::{JobRegistry, Submission, SubmitRequest};
use crate::state::{ObserverState, Transition};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Buffer between the delivery controller and the reducer.
const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// Observes one job's progress.
///
/// Reusable: starting or attaching to another job resets the handle
/// first.
pub struct JobObserver {
    registry: Arc<dyn JobRegistry>,
    config: DeliveryConfig,
    view_tx: Arc<watch::Sender<ObserverState>>,
    event_tx: broadcast::Sender<ObserverEvent>,
    active: Option<ActiveJob>,
}

/// Resources held for the job currently being observed.
struct ActiveJob {
    job_id: JobId,
    cancel: CancellationToken,
    controller: JoinHandle<()>,
    reducer: JoinHandle<()>,
    channel_state: watch::Receiver<ChannelState>,
}

impl JobObserver {
    pub fn new(registry: Arc<dyn JobRegistry>, config: DeliveryConfig) -> Self {
        let (view_tx, _) = watch::channel(ObserverState::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            config,
            view_tx: Arc::new(view_tx),
            event_tx,
            active: None,
        }
    }

    /// Receiver that always holds the current state.
    pub fn view(&self) -> watch::Receiver<ObserverState> {
        self.view_tx.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ObserverState {
        self.view_tx.borrow().clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.event_tx.subscribe()
    }

    /// Id of the job being observed, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        self.active.as_ref().map(|a| &a.job_id)
    }

    /// Current delivery channel state, for diagnostics.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.active.as_ref().map(|a| *a.channel_state.borrow())
    }

    /// Submit a job and start observing it.
    ///
    /// A [`SubmissionError`] leaves the observer untouched. An empty
    /// submission settles the observer as completed without opening any
    /// transport.
    pub async fn start(&mut self, request: SubmitRequest) -> Result<Submission, SubmissionError> {
        let submission = self.registry.submit(&request).await?;

        match &submission {
            Submission::Accepted(job) => {
                tracing::info!(job_id = %job.id, "Job accepted");
                self.observe(job.id.clone(), false);
            }
            Submission::Empty { message, result } => {
                tracing::info!(message = ?message, "Empty submission, nothing to observe");
                self.settle_empty(message.clone(), result.clone());
            }
        }

        Ok(submission)
    }

    /// Observe a job that was just submitted elsewhere.
    pub fn watch(&mut self, job_id: JobId) {
        self.observe(job_id, false);
    }

    /// Observe an existing job, starting from a status snapshot.
    pub fn attach(&mut self, job_id: JobId) {
        self.observe(job_id, true);
    }

    /// Ask the registry to cancel the current job.
    ///
    /// Local state is not touched: the job keeps reporting its last
    /// status until the registry delivers a cancelled envelope.
    pub async fn cancel(&self) -> Result<(), TransportError> {
        let Some(active) = &self.active else {
            tracing::debug!("Cancel requested with no job under observation");
            return Ok(());
        };
        if self.view_tx.borrow().is_terminal() {
            tracing::debug!(job_id = %active.job_id, "Cancel requested for a finished job");
            return Ok(());
        }

        tracing::info!(job_id = %active.job_id, "Requesting job cancellation");
        self.registry.cancel(&active.job_id).await
    }

    /// Stop delivery and clear all local state.
    pub fn reset(&mut self) {
        self.teardown();
        self.view_tx.send_replace(ObserverState::default());
    }

    /// Wait until the observed job is terminal.
    ///
    /// Returns the job result on completion, the terminal [`JobError`]
    /// otherwise, or [`JobError::Detached`] if the observer is reset or
    /// moved to another job first.
    pub async fn wait(&self) -> Result<Option<serde_json::Value>, JobError> {
        let mut rx = self.view_tx.subscribe();
        let job_id = rx.borrow().job_id().cloned();

        loop {
            {
                let state = rx.borrow_and_update();
                if let Some(outcome) = state.outcome() {
                    return outcome.into_result();
                }
                if job_id.is_none() || state.job_id() != job_id.as_ref() {
                    return Err(JobError::Detached);
                }
            }
            if rx.changed().await.is_err() {
                return Err(JobError::Detached);
            }
        }
    }

    fn observe(&mut self, job_id: JobId, snapshot: bool) {
        self.teardown();
        self.view_tx
            .send_replace(ObserverState::for_job(job_id.clone()));

        let cancel = CancellationToken::new();
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let (state_tx, channel_state) = watch::channel(ChannelState::Connecting);

        let mut controller = DeliveryController::new(
            Arc::clone(&self.registry),
            job_id.clone(),
            self.config.clone(),
            state_tx,
        );
        if snapshot {
            controller = controller.with_snapshot();
        }

        let controller = tokio::spawn(controller.run(delivery_tx, cancel.clone()));
        let reducer = tokio::spawn(run_reducer(
            job_id.clone(),
            delivery_rx,
            Arc::clone(&self.view_tx),
            self.event_tx.clone(),
            cancel.clone(),
        ));

        tracing::info!(job_id = %job_id, snapshot, "Observing job");
        let _ = self.event_tx.send(ObserverEvent::Started {
            job_id: job_id.clone(),
        });

        self.active = Some(ActiveJob {
            job_id,
            cancel,
            controller,
            reducer,
            channel_state,
        });
    }

    fn settle_empty(&mut self, message: Option<String>, result: serde_json::Value) {
        self.teardown();

        let mut envelope = ProgressEnvelope::new(JobStatus::Completed, 100).with_result(result.clone());
        envelope.message = message;
        let mut state = ObserverState::default();
        state.apply(envelope);
        self.view_tx.send_replace(state);

        let _ = self.event_tx.send(ObserverEvent::Completed {
            job_id: None,
            result: Some(result),
        });
    }

    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.controller.abort();
            active.reducer.abort();
            tracing::debug!(job_id = %active.job_id, "Observer torn down");
        }
    }
}

impl Drop for JobObserver {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Apply deliveries in arrival order and publish the results.
async fn run_reducer(
    job_id: JobId,
    mut deliveries: mpsc::Receiver<Delivery>,
    view_tx: Arc<watch::Sender<ObserverState>>,
    event_tx: broadcast::Sender<ObserverEvent>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = deliveries.recv() => delivery,
        };

        match delivery {
            Some(Delivery::Envelope(envelope)) => {
                apply_envelope(&job_id, envelope, &view_tx, &event_tx, &cancel);
            }
            Some(Delivery::Degraded) => {
                if !cancel.is_cancelled() {
                    let _ = event_tx.send(ObserverEvent::Degraded { job_id: job_id.clone() });
                }
            }
            None => break,
        }
    }
}

fn apply_envelope(
    job_id: &JobId,
    envelope: ProgressEnvelope,
    view_tx: &watch::Sender<ObserverState>,
    event_tx: &broadcast::Sender<ObserverEvent>,
    cancel: &CancellationToken,
) {
    let mut transition = Transition::Ignored;
    let mut events = Vec::new();

    view_tx.send_if_modified(|state| {
        if cancel.is_cancelled() || state.job_id() != Some(job_id) {
            return false;
        }

        let chunks_before = state.chunk_log().len();
        let errors_before = state.error_log().len();
        transition = state.apply(envelope);
        if transition == Transition::Ignored {
            return false;
        }

        events.extend(
            state.chunk_log()[chunks_before..]
                .iter()
                .map(|update| ObserverEvent::ChunkCompleted {
                    job_id: job_id.clone(),
                    update: update.clone(),
                }),
        );
        events.extend(
            state.error_log()[errors_before..]
                .iter()
                .map(|error| ObserverEvent::ItemFailed {
                    job_id: job_id.clone(),
                    error: error.clone(),
                }),
        );
        if let Some(latest) = state.latest() {
            events.push(ObserverEvent::Progress {
                job_id: job_id.clone(),
                status: latest.status,
                percent: latest.progress_percent,
                current_step: latest.current_step.clone(),
            });
        }
        true
    });

    if let Transition::Terminal(outcome) = transition {
        tracing::info!(job_id = %job_id, status = %outcome.status(), "Job reached terminal status");
        events.push(ObserverEvent::terminal(job_id.clone(), outcome));
    }

    if cancel.is_cancelled() {
        return;
    }
    for event in events {
        let _ = event_tx.send(event);
    }
}

//! Reconnection / fallback controller for one job.
//!
//! Owns the job's delivery channel: opens the push stream, reopens it
//! with linear backoff when it drops, and after
//! [`ReconnectPolicy::max_attempts`](crate::reconnect::ReconnectPolicy)
//! failed reopens switches to polling for the rest of the job. Only one
//! transport is ever open at a time. Envelopes from whichever transport
//! is active are forwarded, in arrival order, on a single channel, and
//! the switch to polling is announced on that same channel.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use jobwatch_core::envelope::ProgressEnvelope;
use jobwatch_core::types::JobId;

use crate::config::DeliveryConfig;
use crate::poll::{run_poll, PollOutcome};
use crate::reconnect::ChannelState;
use crate::registry::{FrameStream, JobRegistry};
use crate::stream::{run_stream, StreamOutcome};

/// One item on the ordered channel from the controller to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// An envelope from the active transport.
    Envelope(ProgressEnvelope),
    /// Streaming was abandoned; the envelopes that follow come from polling.
    Degraded,
}

/// Result of one attempt to open the push stream.
enum Opened {
    Stream(FrameStream),
    Failed,
    Cancelled,
}

/// Drives delivery for a single job id.
pub struct DeliveryController {
    registry: Arc<dyn JobRegistry>,
    job_id: JobId,
    config: DeliveryConfig,
    snapshot: bool,
    state_tx: watch::Sender<ChannelState>,
}

impl DeliveryController {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        job_id: JobId,
        config: DeliveryConfig,
        state_tx: watch::Sender<ChannelState>,
    ) -> Self {
        Self {
            registry,
            job_id,
            config,
            snapshot: false,
            state_tx,
        }
    }

    /// Fetch one status snapshot before opening the stream. Used when
    /// attaching to a job that may already be far along or finished.
    pub fn with_snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }

    /// Run until a final envelope is forwarded or `cancel` fires.
    pub async fn run(self, tx: mpsc::Sender<Delivery>, cancel: CancellationToken) {
        if self.snapshot && self.deliver_snapshot(&tx, &cancel).await {
            self.set_state(ChannelState::Terminated);
            return;
        }

        let mut state = ChannelState::Connecting;
        loop {
            self.set_state(state);
            state = match state {
                ChannelState::Connecting | ChannelState::Reconnecting(_) => {
                    match self.open_stream(state, &cancel).await {
                        Opened::Cancelled => return,
                        Opened::Stream(frames) => {
                            self.set_state(state.on_stream_open());
                            match run_stream(frames, &self.job_id, &tx, &cancel).await {
                                StreamOutcome::Final => ChannelState::Terminated,
                                StreamOutcome::Cancelled => return,
                                StreamOutcome::Dropped(_) => ChannelState::Streaming
                                    .on_stream_failure(&self.config.reconnect),
                            }
                        }
                        Opened::Failed => state.on_stream_failure(&self.config.reconnect),
                    }
                }
                ChannelState::Degraded => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        attempts = self.config.reconnect.max_attempts,
                        "Progress stream abandoned, falling back to polling",
                    );
                    if tx.send(Delivery::Degraded).await.is_err() {
                        return;
                    }
                    match run_poll(
                        self.registry.as_ref(),
                        &self.job_id,
                        self.config.poll_interval,
                        &tx,
                        &cancel,
                    )
                    .await
                    {
                        PollOutcome::Terminal => ChannelState::Terminated,
                        PollOutcome::Cancelled => return,
                    }
                }
                // Stream sessions run inline above, so `state` only holds
                // `Streaming` if nothing is left to deliver.
                ChannelState::Streaming | ChannelState::Terminated => {
                    tracing::debug!(job_id = %self.job_id, "Delivery terminated");
                    return;
                }
            };
        }
    }

    /// Wait out the backoff for `state` (if any) and try to open the
    /// stream.
    async fn open_stream(&self, state: ChannelState, cancel: &CancellationToken) -> Opened {
        if let ChannelState::Reconnecting(attempt) = state {
            let delay = self.config.reconnect.delay_for(attempt);
            tracing::info!(
                job_id = %self.job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting progress stream",
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Opened::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Opened::Cancelled,
            result = self.registry.open_stream(&self.job_id) => result,
        };

        match result {
            Ok(frames) => {
                tracing::info!(job_id = %self.job_id, "Progress stream open");
                Opened::Stream(frames)
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to open progress stream");
                Opened::Failed
            }
        }
    }

    /// Forward the current status once. Returns `true` if it was terminal.
    async fn deliver_snapshot(
        &self,
        tx: &mpsc::Sender<Delivery>,
        cancel: &CancellationToken,
    ) -> bool {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = self.registry.fetch_status(&self.job_id) => result,
        };

        match result {
            Ok(envelope) => {
                let envelope = envelope.normalize();
                let terminal = envelope.is_terminal();
                if tx.send(Delivery::Envelope(envelope)).await.is_err() {
                    return false;
                }
                terminal
            }
            Err(e) => {
                tracing::debug!(job_id = %self.job_id, error = %e, "Initial status snapshot failed");
                false
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(job_id = %self.job_id, from = ?current, to = ?state, "Delivery state change");
            *current = state;
            true
        });
    }
}

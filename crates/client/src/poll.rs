//! Polling transport, the degraded-mode fallback.
//!
//! Fetches the job status on a fixed cadence until a terminal status is
//! seen. A failed poll is logged and retried on the next tick; it never
//! ends the loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use jobwatch_core::types::JobId;

use crate::controller::Delivery;
use crate::registry::JobRegistry;

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A terminal envelope was forwarded.
    Terminal,
    /// The observer was torn down (or stopped listening).
    Cancelled,
}

/// Poll `job_id` every `interval` until it reaches a terminal status.
///
/// The first poll happens immediately.
pub async fn run_poll(
    registry: &dyn JobRegistry,
    job_id: &JobId,
    interval: Duration,
    tx: &mpsc::Sender<Delivery>,
    cancel: &CancellationToken,
) -> PollOutcome {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        job_id = %job_id,
        interval_ms = interval.as_millis() as u64,
        "Polling job status",
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            response = registry.fetch_status(job_id) => response,
        };

        match response {
            Ok(envelope) => {
                let envelope = envelope.normalize();
                let terminal = envelope.is_terminal();
                tracing::debug!(
                    job_id = %job_id,
                    status = %envelope.status,
                    percent = envelope.progress_percent,
                    "Polled progress",
                );
                if tx.send(Delivery::Envelope(envelope)).await.is_err() {
                    return PollOutcome::Cancelled;
                }
                if terminal {
                    return PollOutcome::Terminal;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Status poll failed, retrying next tick");
            }
        }
    }
}

//! Push-stream transport.
//!
//! Reads raw frames from an open progress stream, decodes them into
//! [`ProgressEnvelope`](jobwatch_core::envelope::ProgressEnvelope)s and forwards
//! them on the delivery channel. A malformed frame is logged and
//! skipped. Connection-level trouble is returned to the caller as
//! [`StreamOutcome::Dropped`] and never forwarded to consumers.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jobwatch_core::envelope::parse_envelope;
use jobwatch_core::error::TransportError;
use jobwatch_core::types::JobId;

use crate::controller::Delivery;
use crate::registry::FrameStream;

/// Why a stream session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A final envelope was forwarded. Do not reconnect.
    Final,
    /// The connection broke before a final envelope.
    Dropped(TransportError),
    /// The observer was torn down (or stopped listening).
    Cancelled,
}

/// Drive one stream session until it ends.
///
/// The frame stream is dropped (closing the connection) when this
/// returns.
pub async fn run_stream(
    mut frames: FrameStream,
    job_id: &JobId,
    tx: &mpsc::Sender<Delivery>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(text)) => match parse_envelope(&text) {
                Ok(envelope) => {
                    let terminal = envelope.is_terminal();
                    tracing::debug!(
                        job_id = %job_id,
                        status = %envelope.status,
                        percent = envelope.progress_percent,
                        "Stream progress",
                    );
                    if tx.send(Delivery::Envelope(envelope)).await.is_err() {
                        return StreamOutcome::Cancelled;
                    }
                    if terminal {
                        tracing::info!(job_id = %job_id, "Final envelope received, closing stream");
                        return StreamOutcome::Final;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        raw_message = %text,
                        "Skipping malformed progress frame",
                    );
                }
            },
            Some(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Progress stream receive error");
                return StreamOutcome::Dropped(e);
            }
            None => {
                tracing::info!(job_id = %job_id, "Progress stream closed without a final envelope");
                return StreamOutcome::Dropped(TransportError::Closed);
            }
        }
    }
}

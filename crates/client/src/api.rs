//! HTTP + WebSocket implementation of [`JobRegistry`].
//!
//! Submission, status and cancellation go over plain HTTP using
//! [`reqwest`]; progress streams are WebSocket connections opened with
//! `tokio-tungstenite`, one per job.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use jobwatch_core::envelope::ProgressEnvelope;
use jobwatch_core::error::{SubmissionError, TransportError};
use jobwatch_core::types::JobId;

use crate::config::{ClientConfig, Endpoints};
use crate::registry::{FrameStream, JobRegistry, StartResponse, Submission, SubmitRequest};

/// Header carrying the submission idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Upper bound on any single HTTP request to the registry.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before resending a submit that never reached the registry.
pub const DEFAULT_SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Registry client for a single job service.
pub struct HttpJobRegistry {
    client: reqwest::Client,
    api_url: String,
    ws_url: String,
    endpoints: Endpoints,
    submit_retries: u32,
    submit_retry_delay: Duration,
    request_timeout: Duration,
}

impl HttpJobRegistry {
    /// Create a client for the service at `api_url` / `ws_url`.
    ///
    /// * `api_url` - HTTP base URL, e.g. `http://host:8000`.
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(api_url: String, ws_url: String, endpoints: Endpoints) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, ws_url, endpoints)
    }

    /// Create a client reusing an existing [`reqwest::Client`] (useful
    /// for connection pooling across several registries).
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        ws_url: String,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            client,
            api_url,
            ws_url,
            endpoints,
            submit_retries: 0,
            submit_retry_delay: DEFAULT_SUBMIT_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.api_url.clone(),
            config.ws_url.clone(),
            config.endpoints.clone(),
        )
        .with_submit_retries(config.submit_retries)
        .with_submit_retry_delay(config.submit_retry_delay)
        .with_request_timeout(config.request_timeout)
    }

    /// Resend a submit that never reached the server up to `retries`
    /// more times, with the same idempotency key.
    pub fn with_submit_retries(mut self, retries: u32) -> Self {
        self.submit_retries = retries;
        self
    }

    pub fn with_submit_retry_delay(mut self, delay: Duration) -> Self {
        self.submit_retry_delay = delay;
        self
    }

    /// Fail any HTTP request that takes longer than `timeout`. A hung
    /// status request then counts as one failed poll.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn http_url(&self, template: &str, job_id: &JobId) -> String {
        format!("{}{}", self.api_url, Endpoints::render(template, job_id))
    }

    // ---- private helpers ----

    /// Turn a non-2xx response into [`TransportError::Status`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobRegistry for HttpJobRegistry {
    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let url = format!("{}{}", self.api_url, self.endpoints.start);
        let mut attempt = 0u32;

        let response = loop {
            let sent = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .header(IDEMPOTENCY_KEY_HEADER, &request.idempotency_key)
                .json(&request.params)
                .send()
                .await;

            match sent {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt < self.submit_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        idempotency_key = %request.idempotency_key,
                        "Submit did not reach the registry, retrying",
                    );
                    tokio::time::sleep(self.submit_retry_delay).await;
                }
                Err(e) => return Err(SubmissionError::Unreachable(e.to_string())),
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(status = status.as_u16(), body = %body, "Submission rejected");
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<StartResponse>()
            .await
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;
        Ok(body.into_submission())
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<ProgressEnvelope, TransportError> {
        let response = self
            .client
            .get(self.http_url(&self.endpoints.status, job_id))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Self::ensure_success(response)
            .await?
            .json::<ProgressEnvelope>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn open_stream(&self, job_id: &JobId) -> Result<FrameStream, TransportError> {
        let url = format!(
            "{}{}",
            self.ws_url,
            Endpoints::render(&self.endpoints.stream, job_id)
        );

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            TransportError::Connection(format!("Failed to open progress stream at {url}: {e}"))
        })?;

        tracing::debug!(job_id = %job_id, url = %url, "WebSocket handshake complete");
        Ok(text_frames(ws_stream))
    }

    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.http_url(&self.endpoints.cancel, job_id))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Reduce a WebSocket to its text frames.
///
/// Binary and control frames are skipped; a close frame ends the
/// stream; a receive error is yielded once and then the stream ends.
fn text_frames<S>(ws_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(Some(ws_stream), |state| async move {
        let Some(mut ws_stream) = state else {
            return None;
        };
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => return Some((Ok(text), Some(ws_stream))),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Progress stream closed by server");
                    return None;
                }
                Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Pings are answered by tungstenite; nothing else is used.
                }
                Some(Err(e)) => {
                    return Some((Err(TransportError::Protocol(e.to_string())), None));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

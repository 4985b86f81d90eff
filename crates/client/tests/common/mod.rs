//! Shared test fixtures: an in-memory, scripted [`JobRegistry`].
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use jobwatch_client::config::DeliveryConfig;
use jobwatch_client::reconnect::ReconnectPolicy;
use jobwatch_client::registry::{FrameStream, JobRegistry, Submission, SubmitRequest};
use jobwatch_core::envelope::ProgressEnvelope;
use jobwatch_core::error::{SubmissionError, TransportError};
use jobwatch_core::status::JobStatus;
use jobwatch_core::types::JobId;

/// How one `open_stream` call behaves.
pub enum StreamScript {
    /// The handshake fails.
    Refuse,
    /// The stream yields these frames, then the server closes it.
    Frames(Vec<Result<String, TransportError>>),
    /// The stream yields whatever the test pushes into the sender.
    Live(mpsc::UnboundedReceiver<Result<String, TransportError>>),
}

/// Registry whose every answer is scripted by the test.
///
/// Unscripted stream opens are refused and unscripted polls fail, so a
/// test only has to describe the happy path it cares about.
#[derive(Default)]
pub struct ScriptedRegistry {
    submissions: Mutex<VecDeque<Result<Submission, SubmissionError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    polls: Mutex<VecDeque<Result<ProgressEnvelope, TransportError>>>,
    pub submit_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub cancelled: Mutex<Vec<JobId>>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submit(&self, result: Result<Submission, SubmissionError>) -> &Self {
        self.submissions.lock().unwrap().push_back(result);
        self
    }

    pub fn on_stream(&self, script: StreamScript) -> &Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    /// Script a stream that delivers `envelopes` and then closes.
    pub fn on_stream_envelopes(&self, envelopes: &[ProgressEnvelope]) -> &Self {
        let frames = envelopes
            .iter()
            .map(|e| Ok(serde_json::to_string(e).unwrap()))
            .collect();
        self.on_stream(StreamScript::Frames(frames))
    }

    /// Script a stream the test feeds by hand.
    pub fn on_live_stream(&self) -> mpsc::UnboundedSender<Result<String, TransportError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_stream(StreamScript::Live(rx));
        tx
    }

    pub fn on_poll(&self, result: Result<ProgressEnvelope, TransportError>) -> &Self {
        self.polls.lock().unwrap().push_back(result);
        self
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRegistry for ScriptedRegistry {
    async fn submit(&self, _request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SubmissionError::Unreachable("no scripted submission".into())))
    }

    async fn fetch_status(&self, _job_id: &JobId) -> Result<ProgressEnvelope, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("no scripted status".into())))
    }

    async fn open_stream(&self, _job_id: &JobId) -> Result<FrameStream, TransportError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Frames(frames)) => Ok(futures::stream::iter(frames).boxed()),
            Some(StreamScript::Live(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            })
            .boxed()),
            Some(StreamScript::Refuse) | None => {
                Err(TransportError::Connection("connection refused".into()))
            }
        }
    }

    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError> {
        self.cancelled.lock().unwrap().push(job_id.clone());
        Ok(())
    }
}

pub fn running(percent: u8) -> ProgressEnvelope {
    ProgressEnvelope::new(JobStatus::Running, percent)
}

pub fn completed(percent: u8) -> ProgressEnvelope {
    ProgressEnvelope::new(JobStatus::Completed, percent).finalized()
}

pub fn frame(envelope: &ProgressEnvelope) -> Result<String, TransportError> {
    Ok(serde_json::to_string(envelope).unwrap())
}

/// Fast delivery settings for tests that run on paused time.
pub fn test_delivery() -> DeliveryConfig {
    DeliveryConfig {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 3,
        },
        poll_interval: Duration::from_millis(500),
    }
}

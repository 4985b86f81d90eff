//! End-to-end behaviour of [`JobObserver`] against a scripted registry.
//!
//! Timer-driven tests run on paused time so backoff and poll intervals
//! elapse instantly and deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use tokio::sync::broadcast;

use jobwatch_client::events::ObserverEvent;
use jobwatch_client::observer::JobObserver;
use jobwatch_client::registry::{Submission, SubmitRequest};
use jobwatch_core::envelope::{ChunkSummary, ChunkUpdate, ProgressEnvelope};
use jobwatch_core::error::{JobError, SubmissionError, TransportError};
use jobwatch_core::status::JobStatus;
use jobwatch_core::types::{Job, JobId};

use common::{completed, frame, running, test_delivery, ScriptedRegistry, StreamScript};

fn drain(events: &mut broadcast::Receiver<ObserverEvent>) -> Vec<ObserverEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn progress_percents(events: &[ObserverEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ObserverEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_submission_completes_without_any_transport() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_submit(Ok(Submission::Empty {
        message: Some("no documents to scan".into()),
        result: json!([]),
    }));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    let submission = observer.start(SubmitRequest::new(json!({}))).await.unwrap();

    assert_matches!(submission, Submission::Empty { .. });
    let state = observer.state();
    assert_eq!(state.status(), Some(JobStatus::Completed));
    assert_eq!(state.percent(), 100);
    assert_eq!(observer.wait().await, Ok(Some(json!([]))));
    assert_eq!(registry.stream_opens(), 0);
    assert_eq!(registry.status_calls(), 0);
    assert_matches!(
        drain(&mut events).as_slice(),
        [ObserverEvent::Completed { job_id: None, .. }]
    );
}

#[tokio::test]
async fn submission_error_creates_no_observation() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_submit(Err(SubmissionError::Rejected {
        status: 422,
        body: "missing project_id".into(),
    }));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    let result = observer.start(SubmitRequest::new(json!({"documents": [1]}))).await;

    assert_matches!(result, Err(SubmissionError::Rejected { status: 422, .. }));
    assert!(observer.job_id().is_none());
    assert_eq!(observer.state().job_id(), None);
    assert!(drain(&mut events).is_empty());
    assert_eq!(registry.stream_opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn accepted_submission_streams_to_completion() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_submit(Ok(Submission::Accepted(Job::accepted(JobId::new("scan-1")))));
    registry.on_stream_envelopes(&[
        running(20).with_step("ocr"),
        completed(100).with_result(json!({"rows": 42})),
    ]);
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    observer.start(SubmitRequest::new(json!({"documents": [1, 2]}))).await.unwrap();

    assert_eq!(observer.job_id(), Some(&JobId::new("scan-1")));
    assert_eq!(observer.wait().await, Ok(Some(json!({"rows": 42}))));
    let events = drain(&mut events);
    assert_matches!(events.first(), Some(ObserverEvent::Started { .. }));
    assert_matches!(events.last(), Some(ObserverEvent::Completed { job_id: Some(_), .. }));
    assert_eq!(registry.stream_opens(), 1);
    assert_eq!(registry.status_calls(), 0);
}

// ---------------------------------------------------------------------------
// Reconnection and fallback
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stream_drop_then_polling_finishes_without_regression() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_stream_envelopes(&[running(10), running(35), running(70)]);
    // Every reopen is refused, so the observer degrades to polling.
    registry.on_poll(Ok(running(70))).on_poll(Ok(completed(100)));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    observer.watch(JobId::new("scan-2"));
    let result = observer.wait().await;

    assert_eq!(result, Ok(None));
    let state = observer.state();
    assert_eq!(state.status(), Some(JobStatus::Completed));
    assert_eq!(state.percent(), 100);

    let events = drain(&mut events);
    let percents = progress_percents(&events);
    assert_eq!(percents, vec![10, 35, 70, 70, 100]);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert!(events.iter().any(|e| matches!(e, ObserverEvent::Degraded { .. })));
    assert_eq!(registry.stream_opens(), 4);
    assert_eq!(registry.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn degrades_after_exactly_max_attempts_and_never_streams_again() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry
        .on_stream(StreamScript::Refuse)
        .on_stream(StreamScript::Refuse)
        .on_stream(StreamScript::Refuse)
        .on_stream(StreamScript::Refuse);
    // Would succeed if the controller ever tried streaming again.
    registry.on_stream_envelopes(&[completed(100)]);
    registry
        .on_poll(Err(TransportError::Connection("blip".into())))
        .on_poll(Ok(running(50)))
        .on_poll(Ok(completed(100)));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();
    let started = tokio::time::Instant::now();

    observer.watch(JobId::new("scan-3"));

    loop {
        match events.recv().await.unwrap() {
            ObserverEvent::Degraded { .. } => break,
            ObserverEvent::Progress { .. } => panic!("no progress expected before degrading"),
            _ => {}
        }
    }
    // Linear backoff: 100ms + 200ms + 300ms before the last refused reopen.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600), "degraded after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "degraded after {elapsed:?}");
    // Initial open plus three reopens.
    assert_eq!(registry.stream_opens(), 4);

    assert_eq!(observer.wait().await, Ok(None));
    assert_eq!(registry.stream_opens(), 4);
    // The failed poll was retried rather than treated as terminal.
    assert_eq!(registry.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn degraded_is_announced_even_when_first_poll_is_terminal() {
    let registry = Arc::new(ScriptedRegistry::new());
    for _ in 0..4 {
        registry.on_stream(StreamScript::Refuse);
    }
    registry.on_poll(Ok(completed(100)));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    observer.watch(JobId::new("scan-quick"));

    assert_eq!(observer.wait().await, Ok(None));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let events = drain(&mut events);
    let degraded = events
        .iter()
        .position(|e| matches!(e, ObserverEvent::Degraded { .. }))
        .expect("degraded event");
    let completed_at = events
        .iter()
        .position(|e| matches!(e, ObserverEvent::Completed { .. }))
        .expect("completed event");
    assert!(degraded < completed_at);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ObserverEvent::Degraded { .. }))
            .count(),
        1
    );
    assert_eq!(registry.stream_opens(), 4);
    assert_eq!(registry.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_reopen_resumes_streaming() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_stream_envelopes(&[running(10)]);
    registry.on_stream(StreamScript::Refuse);
    registry.on_stream_envelopes(&[running(30), completed(100)]);
    let mut observer = JobObserver::new(registry.clone(), test_delivery());

    observer.watch(JobId::new("scan-4"));

    assert_eq!(observer.wait().await, Ok(None));
    assert_eq!(registry.stream_opens(), 3);
    assert_eq!(registry.status_calls(), 0);
}

// ---------------------------------------------------------------------------
// Terminal outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timeout_is_reported_distinctly() {
    let registry = Arc::new(ScriptedRegistry::new());
    let mut timed_out = running(60);
    timed_out.timeout = true;
    registry.on_stream_envelopes(&[running(30), timed_out]);
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut events = observer.subscribe();

    observer.watch(JobId::new("extract-1"));

    assert_eq!(observer.wait().await, Err(JobError::TimedOut));
    assert_eq!(observer.state().status(), Some(JobStatus::Timeout));
    assert_matches!(drain(&mut events).last(), Some(ObserverEvent::TimedOut { .. }));
}

#[tokio::test(start_paused = true)]
async fn failure_carries_the_envelope_message() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_stream_envelopes(&[
        running(30),
        ProgressEnvelope::new(JobStatus::Failed, 30).with_message("unsupported file type"),
    ]);
    let mut observer = JobObserver::new(registry.clone(), test_delivery());

    observer.watch(JobId::new("extract-2"));

    assert_eq!(
        observer.wait().await,
        Err(JobError::Failed {
            message: "unsupported file type".into()
        })
    );
}

// ---------------------------------------------------------------------------
// Cancellation contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_does_not_force_local_state() {
    let registry = Arc::new(ScriptedRegistry::new());
    let stream = registry.on_live_stream();
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut view = observer.view();

    observer.watch(JobId::new("playbook-1"));
    stream.send(frame(&running(40))).unwrap();
    view.wait_for(|s| s.percent() == 40).await.unwrap();

    observer.cancel().await.unwrap();

    assert_eq!(
        registry.cancelled.lock().unwrap().as_slice(),
        &[JobId::new("playbook-1")]
    );
    assert_eq!(observer.state().status(), Some(JobStatus::Running));

    // The job keeps running for a grace period.
    stream.send(frame(&running(45))).unwrap();
    view.wait_for(|s| s.percent() == 45).await.unwrap();
    assert_eq!(observer.state().status(), Some(JobStatus::Running));

    stream
        .send(frame(&ProgressEnvelope::new(JobStatus::Cancelled, 45).finalized()))
        .unwrap();
    assert_eq!(observer.wait().await, Err(JobError::Cancelled));
    assert_eq!(observer.state().status(), Some(JobStatus::Cancelled));
}

// ---------------------------------------------------------------------------
// Chunk aggregation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn replayed_chunk_is_logged_but_not_double_counted() {
    let registry = Arc::new(ScriptedRegistry::new());
    let chunk_three = ChunkUpdate {
        chunk_index: 3,
        total_chunks: 8,
        method: "ocr".into(),
        rows_found: 12,
        status: "done".into(),
    };
    let replayed = running(50)
        .with_chunks(ChunkSummary {
            total: 8,
            done: 4,
            rows_so_far: 48,
        })
        .with_chunk_updates(vec![chunk_three.clone()]);
    // The first connection drops right after chunk 3; the reconnect
    // replays it.
    registry.on_stream_envelopes(&[replayed.clone()]);
    let stream = registry.on_live_stream();
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut view = observer.view();

    observer.watch(JobId::new("scan-5"));
    stream.send(frame(&replayed)).unwrap();
    view.wait_for(|s| s.chunk_log().len() == 2).await.unwrap();

    let state = observer.state();
    assert_eq!(state.chunk_log(), &[chunk_three.clone(), chunk_three]);
    assert_eq!(state.latest().and_then(|e| e.chunks).map(|c| c.done), Some(4));

    stream.send(frame(&completed(100))).unwrap();
    assert_eq!(observer.wait().await, Ok(None));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_stops_delivery_and_clears_state() {
    let registry = Arc::new(ScriptedRegistry::new());
    let stream = registry.on_live_stream();
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut view = observer.view();
    let mut events = observer.subscribe();

    observer.watch(JobId::new("scan-6"));
    stream.send(frame(&running(10))).unwrap();
    view.wait_for(|s| s.percent() == 10).await.unwrap();
    drain(&mut events);

    observer.reset();

    assert_eq!(observer.state().job_id(), None);
    assert!(observer.job_id().is_none());
    assert_eq!(observer.wait().await, Err(JobError::Detached));

    let _ = stream.send(frame(&running(90)));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(observer.state().percent(), 0);
    assert!(drain(&mut events).is_empty());
    // The aborted stream task released its connection.
    assert!(stream.is_closed());
}

#[tokio::test]
async fn reused_handle_observes_a_new_job_from_scratch() {
    let registry = Arc::new(ScriptedRegistry::new());
    let first = registry.on_live_stream();
    let second = registry.on_live_stream();
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut view = observer.view();

    observer.watch(JobId::new("scan-a"));
    first
        .send(frame(&running(80).with_chunk_updates(vec![ChunkUpdate {
            chunk_index: 0,
            total_chunks: 1,
            method: "text".into(),
            rows_found: 1,
            status: "done".into(),
        }])))
        .unwrap();
    view.wait_for(|s| s.percent() == 80).await.unwrap();

    observer.watch(JobId::new("scan-b"));
    let state = observer.state();
    assert_eq!(state.job_id(), Some(&JobId::new("scan-b")));
    assert_eq!(state.percent(), 0);
    assert!(state.chunk_log().is_empty());

    second.send(frame(&running(5))).unwrap();
    view.wait_for(|s| s.percent() == 5).await.unwrap();
    assert_eq!(observer.state().job_id(), Some(&JobId::new("scan-b")));
}

#[tokio::test]
async fn dropping_the_observer_releases_the_stream() {
    let registry = Arc::new(ScriptedRegistry::new());
    let stream = registry.on_live_stream();
    let mut observer = JobObserver::new(registry.clone(), test_delivery());
    let mut view = observer.view();

    observer.watch(JobId::new("scan-7"));
    stream.send(frame(&running(10))).unwrap();
    view.wait_for(|s| s.percent() == 10).await.unwrap();

    drop(observer);
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    assert!(stream.is_closed());
}

#[tokio::test]
async fn attach_to_finished_job_uses_snapshot_only() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_poll(Ok(completed(100).with_result(json!({"rows": 5}))));
    let mut observer = JobObserver::new(registry.clone(), test_delivery());

    observer.attach(JobId::new("scan-8"));

    assert_eq!(observer.wait().await, Ok(Some(json!({"rows": 5}))));
    assert_eq!(registry.status_calls(), 1);
    assert_eq!(registry.stream_opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn attach_with_failed_snapshot_falls_through_to_stream() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_poll(Err(TransportError::Connection("blip".into())));
    registry.on_stream_envelopes(&[running(60), completed(100)]);
    let mut observer = JobObserver::new(registry.clone(), test_delivery());

    observer.attach(JobId::new("scan-9"));

    assert_eq!(observer.wait().await, Ok(None));
    assert_eq!(registry.status_calls(), 1);
    assert_eq!(registry.stream_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn two_observers_of_one_job_keep_independent_state() {
    let registry = Arc::new(ScriptedRegistry::new());
    registry.on_stream_envelopes(&[running(25), completed(100)]);
    let stream = registry.on_live_stream();
    let mut fast = JobObserver::new(registry.clone(), test_delivery());
    let mut slow = JobObserver::new(registry.clone(), test_delivery());
    let mut slow_view = slow.view();

    fast.watch(JobId::new("shared"));
    assert_eq!(fast.wait().await, Ok(None));

    slow.watch(JobId::new("shared"));
    stream.send(frame(&running(25))).unwrap();
    slow_view.wait_for(|s| s.percent() == 25).await.unwrap();

    assert_eq!(fast.state().status(), Some(JobStatus::Completed));
    assert_eq!(slow.state().status(), Some(JobStatus::Running));
}

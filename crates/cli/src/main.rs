mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobwatch_client::{
    ClientConfig, HttpJobRegistry, JobObserver, JobRegistry, ObserverEvent, SubmitRequest,
};
use jobwatch_core::types::JobId;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch=info,jobwatch_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("Failed to load jobwatch configuration")?;
    let registry = HttpJobRegistry::from_config(&config);

    match cli.command {
        Command::Start {
            params,
            idempotency_key,
        } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let mut request = SubmitRequest::new(params);
            if let Some(key) = idempotency_key {
                request = request.with_idempotency_key(key);
            }
            tracing::info!(idempotency_key = %request.idempotency_key, "Submitting job");

            let mut observer = JobObserver::new(Arc::new(registry), config.delivery);
            let events = observer.subscribe();
            if let Err(e) = observer.start(request).await {
                tracing::error!(error = %e, "Submission failed");
                return Ok(ExitCode::FAILURE);
            }
            follow(&observer, events).await
        }
        Command::Watch { job_id } => {
            let mut observer = JobObserver::new(Arc::new(registry), config.delivery);
            let events = observer.subscribe();
            observer.attach(JobId::new(job_id));
            follow(&observer, events).await
        }
        Command::Cancel { job_id } => {
            let job_id = JobId::new(job_id);
            registry
                .cancel(&job_id)
                .await
                .with_context(|| format!("Failed to cancel job {job_id}"))?;
            tracing::info!(job_id = %job_id, "Cancellation requested");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print events until the job is terminal, then map the outcome to an
/// exit code.
async fn follow(
    observer: &JobObserver,
    mut events: broadcast::Receiver<ObserverEvent>,
) -> anyhow::Result<ExitCode> {
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event output fell behind");
                    if observer.state().is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                tracing::info!("Interrupted, requesting cancellation");
                if let Err(e) = observer.cancel().await {
                    tracing::warn!(error = %e, "Cancel request failed");
                }
            }
        }
    }

    match observer.wait().await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!(error = %e, "Job did not complete");
            Ok(ExitCode::FAILURE)
        }
    }
}

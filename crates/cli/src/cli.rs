use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Submit background jobs and follow their progress. Events print as JSON lines.")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Submit a job and follow it until it finishes. Ctrl+C requests cancellation.
    Start {
        /// Job parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,

        /// Reuse this idempotency key instead of generating one.
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Attach to a job that is already running and follow it.
    Watch {
        job_id: String,
    },
    /// Ask the registry to cancel a job. The job may keep running briefly.
    Cancel {
        job_id: String,
    },
}

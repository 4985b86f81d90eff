use std::time::Duration;

use jobwatch_core::types::JobId;

use crate::reconnect::ReconnectPolicy;

/// Placeholder replaced with the job id in endpoint templates.
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_SUBMIT_RETRIES: u32 = 1;
const DEFAULT_SUBMIT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Path templates for the registry endpoints.
///
/// Each template may contain [`JOB_ID_PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub start: String,
    pub status: String,
    pub stream: String,
    pub cancel: String,
}

impl Endpoints {
    /// Substitute the job id into a path template.
    pub fn render(template: &str, job_id: &JobId) -> String {
        template.replace(JOB_ID_PLACEHOLDER, job_id.as_str())
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            start: "/jobs".into(),
            status: "/jobs/{job_id}".into(),
            stream: "/jobs/{job_id}/stream".into(),
            cancel: "/jobs/{job_id}/cancel".into(),
        }
    }
}

/// Tunables for one observed job's delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub reconnect: ReconnectPolicy,
    /// Fixed cadence of the polling fallback.
    pub poll_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL of the registry, without a trailing slash.
    pub api_url: String,
    /// WebSocket base URL used for progress streams.
    pub ws_url: String,
    pub endpoints: Endpoints,
    pub delivery: DeliveryConfig,
    /// Extra attempts for a submit that failed before reaching the server.
    pub submit_retries: u32,
    pub submit_retry_delay: Duration,
    /// Upper bound on each HTTP request.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default                          |
    /// |------------------------------------|----------------------------------|
    /// | `JOBWATCH_API_URL`                 | required                         |
    /// | `JOBWATCH_WS_URL`                  | API URL with `http` -> `ws`      |
    /// | `JOBWATCH_START_PATH`              | `/jobs`                          |
    /// | `JOBWATCH_STATUS_PATH`             | `/jobs/{job_id}`                 |
    /// | `JOBWATCH_STREAM_PATH`             | `/jobs/{job_id}/stream`          |
    /// | `JOBWATCH_CANCEL_PATH`             | `/jobs/{job_id}/cancel`          |
    /// | `JOBWATCH_RECONNECT_BASE_DELAY_MS` | `1000`                           |
    /// | `JOBWATCH_RECONNECT_MAX_ATTEMPTS`  | `3`                              |
    /// | `JOBWATCH_POLL_INTERVAL_MS`        | `2000`                           |
    /// | `JOBWATCH_SUBMIT_RETRIES`          | `1`                              |
    /// | `JOBWATCH_SUBMIT_RETRY_DELAY_MS`   | `500`                            |
    /// | `JOBWATCH_REQUEST_TIMEOUT_MS`      | `10000`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("JOBWATCH_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("JOBWATCH_API_URL"))?;

        let ws_url = lookup("JOBWATCH_WS_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| derive_ws_url(&api_url));

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            start: lookup("JOBWATCH_START_PATH").unwrap_or(defaults.start),
            status: lookup("JOBWATCH_STATUS_PATH").unwrap_or(defaults.status),
            stream: lookup("JOBWATCH_STREAM_PATH").unwrap_or(defaults.stream),
            cancel: lookup("JOBWATCH_CANCEL_PATH").unwrap_or(defaults.cancel),
        };

        let policy = ReconnectPolicy::default();
        let base_delay_ms = parse_or(
            &lookup,
            "JOBWATCH_RECONNECT_BASE_DELAY_MS",
            policy.base_delay.as_millis() as u64,
        )?;
        let max_attempts = parse_or(
            &lookup,
            "JOBWATCH_RECONNECT_MAX_ATTEMPTS",
            policy.max_attempts,
        )?;
        let poll_interval_ms =
            parse_or(&lookup, "JOBWATCH_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "JOBWATCH_POLL_INTERVAL_MS",
                value: "0".into(),
            });
        }
        let submit_retries = parse_or(&lookup, "JOBWATCH_SUBMIT_RETRIES", DEFAULT_SUBMIT_RETRIES)?;
        let submit_retry_delay_ms = parse_or(
            &lookup,
            "JOBWATCH_SUBMIT_RETRY_DELAY_MS",
            DEFAULT_SUBMIT_RETRY_DELAY_MS,
        )?;
        let request_timeout_ms =
            parse_or(&lookup, "JOBWATCH_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "JOBWATCH_REQUEST_TIMEOUT_MS",
                value: "0".into(),
            });
        }

        Ok(Self {
            api_url,
            ws_url,
            endpoints,
            delivery: DeliveryConfig {
                reconnect: ReconnectPolicy {
                    base_delay: Duration::from_millis(base_delay_ms),
                    max_attempts,
                },
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            submit_retries,
            submit_retry_delay: Duration::from_millis(submit_retry_delay_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`.
fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

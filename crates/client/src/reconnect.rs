//! Linear-backoff reconnection policy and delivery channel states.
//!
//! When a progress stream drops, the controller retries with delays of
//! `base_delay × n` for attempt `n`. After `max_attempts` consecutive
//! failed reopens it gives up on streaming for that job and falls back
//! to polling for good.

use std::time::Duration;

use serde::Serialize;

/// Reopen attempts before degrading to polling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; attempt `n` waits `base_delay × n`.
    pub base_delay: Duration,
    /// Consecutive failed reopens tolerated before degrading.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reopen attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Where a job's delivery channel currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum ChannelState {
    /// Opening the first stream connection.
    Connecting,
    /// A stream connection is open and delivering.
    Streaming,
    /// Waiting to make reopen attempt `n`.
    Reconnecting(u32),
    /// Streaming abandoned; progress arrives via polling.
    Degraded,
    /// A final envelope was delivered.
    Terminated,
}

impl ChannelState {
    /// Next state after a stream failed to open or dropped.
    pub fn on_stream_failure(self, policy: &ReconnectPolicy) -> Self {
        match self {
            Self::Connecting | Self::Streaming if policy.max_attempts == 0 => Self::Degraded,
            Self::Connecting | Self::Streaming => Self::Reconnecting(1),
            Self::Reconnecting(n) if n < policy.max_attempts => Self::Reconnecting(n + 1),
            Self::Reconnecting(_) => Self::Degraded,
            Self::Degraded => Self::Degraded,
            Self::Terminated => Self::Terminated,
        }
    }

    /// Next state after a stream opened successfully.
    pub fn on_stream_open(self) -> Self {
        match self {
            Self::Connecting | Self::Reconnecting(_) | Self::Streaming => Self::Streaming,
            Self::Degraded => Self::Degraded,
            Self::Terminated => Self::Terminated,
        }
    }

    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }
}

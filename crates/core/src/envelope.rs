//! Progress envelope type and wire decoding.
//!
//! Both delivery transports (push stream and status polling) produce the
//! same [`ProgressEnvelope`]. Raw registry payloads are decoded leniently
//! (field aliases, `null` arrays) and then passed through
//! [`ProgressEnvelope::normalize`] so downstream code only ever sees the
//! canonical shape.

use serde::{Deserialize, Deserializer, Serialize};

use crate::status::JobStatus;
use crate::types::string_or_number;

/// Message attached when a registry marks an envelope final without a
/// terminal status.
pub const UNTERMINATED_FINAL_MESSAGE: &str = "job ended without a terminal status";

/// Fallback failure text when the registry gives no detail.
const DEFAULT_FAILURE_MESSAGE: &str = "job failed";

/// Aggregate chunk counters reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub total: u32,
    pub done: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows_so_far: u64,
}

/// Completion report for a single chunk of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUpdate {
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Extraction method the job used for this chunk.
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows_found: u64,
    /// Chunk-level status as reported (e.g. `"done"`). Free-form; it
    /// never drives the job state machine.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

/// A per-item error the job recorded without failing as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(deserialize_with = "string_or_number")]
    pub item_id: String,
    pub error: String,
}

/// One unit of progress information for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub status: JobStatus,
    /// Completion percentage, clamped to `0..=100` on decode.
    #[serde(alias = "progress", alias = "percent", deserialize_with = "percent")]
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<ChunkSummary>,
    /// Chunks finished since the previous envelope, in completion order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub chunk_updates: Vec<ChunkUpdate>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<ItemError>,
    /// No further envelopes follow this one.
    #[serde(default, rename = "final", deserialize_with = "null_as_default")]
    pub is_final: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timeout: bool,
    /// Opaque job result, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEnvelope {
    /// Create an envelope with only the required fields set.
    pub fn new(status: JobStatus, progress_percent: u8) -> Self {
        Self {
            status,
            progress_percent,
            current_step: None,
            chunks: None,
            chunk_updates: Vec::new(),
            errors: Vec::new(),
            is_final: false,
            timeout: false,
            result: None,
            message: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn with_chunks(mut self, chunks: ChunkSummary) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn with_chunk_updates(mut self, updates: Vec<ChunkUpdate>) -> Self {
        self.chunk_updates = updates;
        self
    }

    pub fn with_errors(mut self, errors: Vec<ItemError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Mark this envelope as the last one for its job.
    pub fn finalized(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Bring a decoded envelope into canonical form.
    ///
    /// * `timeout` forces `status = timeout`.
    /// * `final` without a terminal status becomes `failed`.
    /// * A terminal status forces `final`.
    /// * `completed` forces 100%.
    /// * `chunks.done` is capped at `chunks.total`.
    ///
    /// Normalizing twice is a no-op.
    pub fn normalize(mut self) -> Self {
        if self.timeout {
            self.status = JobStatus::Timeout;
        }
        if self.is_final && !self.status.is_terminal() {
            self.status = JobStatus::Failed;
            if self.message.is_none() {
                self.message = Some(UNTERMINATED_FINAL_MESSAGE.to_string());
            }
        }
        if self.status.is_terminal() {
            self.is_final = true;
        }
        if self.status == JobStatus::Completed {
            self.progress_percent = 100;
        }
        self.progress_percent = self.progress_percent.min(100);
        if let Some(chunks) = self.chunks.as_mut() {
            chunks.done = chunks.done.min(chunks.total);
        }
        self
    }

    /// Whether this envelope ends the job's envelope sequence.
    pub fn is_terminal(&self) -> bool {
        self.is_final || self.status.is_terminal()
    }

    /// Human-readable failure text: the envelope message, else the last
    /// item error, else a generic fallback.
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.errors.last().map(|e| e.error.clone()))
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string())
    }
}

/// Decode a raw registry message and normalize it.
///
/// Returns `Err` for malformed JSON, a missing `status`, or an unknown
/// status value. Callers on the push stream should log and skip.
pub fn parse_envelope(text: &str) -> Result<ProgressEnvelope, serde_json::Error> {
    serde_json::from_str::<ProgressEnvelope>(text).map(ProgressEnvelope::normalize)
}

fn percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, 100.0) as u8)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

//! Canonical job record and status transition rules.
//!
//! Jobs are introduced by the HTTP submission API (as a job descriptor)
//! and then kept current by streamed progress events. The status graph
//! is a DAG:
//!
//! ```text
//! pending ──► processing ──► complete | failed | cancelled
//!    │            ▲  │
//!    │            └──┘ (progress updates)
//!    └──────────────────► complete | failed | cancelled
//! ```
//!
//! `pending` may jump straight to a terminal state because intermediate
//! events can be lost in transit. Nothing ever leaves a terminal state.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{InputId, JobId, Timestamp};

/// Lower bound of the progress percentage.
pub const MIN_PROGRESS: f64 = 0.0;

/// Upper bound of the progress percentage.
pub const MAX_PROGRESS: f64 = 100.0;

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    #[serde(alias = "completed")]
    Complete,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire status, accepting the `completed` / `canceled` spellings.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "complete" | "completed" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(CoreError::UnknownName {
                kind: "job status",
                name: other.to_string(),
            }),
        }
    }

    /// `true` for `complete`, `failed` and `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Re-applying the same status is always allowed (duplicate or
    /// progress-only updates).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Processing => next.is_terminal(),
            Self::Complete | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative record of one backend job.
///
/// Deserializes directly from the job descriptor returned by the
/// submission API; fields the descriptor omits take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(alias = "job_id", alias = "jobID")]
    pub id: JobId,
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub status: JobStatus,
    /// Completion percentage (0-100).
    #[serde(default)]
    pub progress: f64,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: Timestamp,
    #[serde(default)]
    pub input_files: Vec<InputId>,
    /// Error reported by the backend for a failed or cancelled job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a pending job with no inputs.
    pub fn new(id: impl Into<JobId>, operation_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation_type: operation_type.into(),
            status: JobStatus::Pending,
            progress: MIN_PROGRESS,
            created_at: chrono::Utc::now(),
            input_files: Vec::new(),
            error: None,
        }
    }

    /// Attach input file references.
    pub fn with_inputs(mut self, inputs: Vec<InputId>) -> Self {
        self.input_files = inputs;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Clamp a reported percentage into `0..=100`. `NaN` becomes 0.
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_PROGRESS;
    }
    value.clamp(MIN_PROGRESS, MAX_PROGRESS)
}

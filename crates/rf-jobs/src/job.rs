//! Job records and the partial updates the orchestrator applies to them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rf_core::{Dimensions, Fit, JobId, OutputFormat, VideoQuality};
use rf_imaging::{CropStrategy, TierUsed};
use serde::{Deserialize, Serialize};

/// Platform identifier mapped to the format names requested on it.
pub type RequestedWork = BTreeMap<String, Vec<String>>;

/// Lifecycle state of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Placeholder before submission. Never observed once `submit` returns.
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a job in this state may move to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uploading, Self::Processing)
                | (Self::Uploading, Self::Failed)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploading => write!(f, "uploading"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one successful format task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatResult {
    pub platform: String,
    pub format: String,
    pub dimensions: Dimensions,
    pub file_size: u64,
    /// Artifact reference, `"<job_id>/<file name>"`.
    pub file_path: String,
    /// True when an optimizer tier produced the artifact.
    pub optimized: bool,
    /// Optimizer tier used. `None` for video outputs.
    #[serde(default)]
    pub tier_used: Option<TierUsed>,
    #[serde(default)]
    pub compression_ratio: Option<f64>,
    #[serde(default)]
    pub quality_used: Option<u8>,
    #[serde(default)]
    pub crop_strategy: Option<CropStrategy>,
    /// Set when a placeholder stands in for an output that could not be made.
    #[serde(default)]
    pub degraded: bool,
}

/// One user submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub original_file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub requested_work: RequestedWork,
    pub status: JobStatus,
    pub progress: u8,
    pub results: Vec<FormatResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Number of format tasks this job runs.
    pub fn total_formats(&self) -> usize {
        total_formats(&self.requested_work)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The result whose artifact reference is `file_path`, if any.
    pub fn result_for(&self, file_path: &str) -> Option<&FormatResult> {
        self.results.iter().find(|r| r.file_path == file_path)
    }
}

pub(crate) fn total_formats(work: &RequestedWork) -> usize {
    work.values().map(Vec::len).sum()
}

/// Fields captured at creation. Everything else is initialised by the store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub requested_work: RequestedWork,
}

/// Per-job processing choices made at submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    pub output_format: OutputFormat,
    /// Ask the optimizer for its lossless settings.
    pub lossless: bool,
    pub fit: Fit,
    pub video_quality: VideoQuality,
}

/// A partial update. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub push_result: Option<FormatResult>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    /// Terminal success. The store sets progress to 100.
    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, result: FormatResult) -> Self {
        self.push_result = Some(result);
        self
    }
}

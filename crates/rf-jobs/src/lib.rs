//! # rf-jobs
//!
//! The job engine: job records and their store, progress arithmetic, the
//! per-format task runner, the orchestrator that drives a job to a terminal
//! state, and artifact lookup for downloads.

pub mod artifacts;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod store;

pub use artifacts::{Artifact, ArtifactStore, LocalArtifactStore};
pub use job::{FormatResult, Job, JobStatus, JobUpdate, NewJob, RequestedWork, SubmitOptions};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Upload};
pub use progress::{phase_b_progress, ProgressTracker};
pub use runner::{FormatTaskRunner, SourceMedia, TaskError, TaskInput};
pub use store::{JobStore, MemoryJobStore};

//! Job record storage.
//!
//! [`JobStore`] is the CRUD contract the orchestrator writes through.
//! [`MemoryJobStore`] keeps records for the lifetime of the process.
//!
//! The store enforces the record invariants itself, so a buggy caller
//! cannot produce an inconsistent job:
//!
//! - `updated_at` strictly increases on every mutation;
//! - a terminal job accepts no further update (`Error::Conflict`);
//! - progress never decreases and is 100 only for completed jobs;
//! - results never outnumber the requested formats;
//! - `error` is only set together with the `failed` status.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rf_core::{Error, JobId, Result};

use crate::job::{total_formats, Job, JobStatus, JobUpdate, NewJob};

/// CRUD over job records with partial-merge updates.
pub trait JobStore: Send + Sync {
    /// Insert a new job in `processing` state at progress 0.
    fn create(&self, new: NewJob) -> Result<Job>;

    fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Merge `update` into the job. `Ok(None)` when the id is unknown.
    fn update(&self, id: JobId, update: JobUpdate) -> Result<Option<Job>>;

    /// All jobs, newest first.
    fn list(&self) -> Result<Vec<Job>>;
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Wall-clock time, nudged forward so that no two stamps are equal.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// In-process [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, new: NewJob) -> Result<Job> {
        let mut inner = self.inner.write();
        let now = inner.tick();
        let job = Job {
            id: JobId::new(),
            original_file_name: new.original_file_name,
            file_size: new.file_size,
            mime_type: new.mime_type,
            requested_work: new.requested_work,
            status: JobStatus::Processing,
            progress: 0,
            results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.inner.read().jobs.get(&id).cloned())
    }

    fn update(&self, id: JobId, update: JobUpdate) -> Result<Option<Job>> {
        let mut inner = self.inner.write();
        let Some(current) = inner.jobs.get(&id) else {
            return Ok(None);
        };
        let mut job = merge(current, update)?;
        job.updated_at = inner.tick();
        inner.jobs.insert(id, job.clone());
        Ok(Some(job))
    }

    fn list(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.inner.read().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

/// Apply `update` to a copy of `current`, checking every record invariant.
fn merge(current: &Job, update: JobUpdate) -> Result<Job> {
    if current.is_terminal() {
        return Err(Error::Conflict(format!(
            "job {} is {} and accepts no further updates",
            current.id, current.status
        )));
    }

    let mut job = current.clone();

    if let Some(status) = update.status {
        if !job.status.can_transition_to(status) {
            return Err(Error::Conflict(format!(
                "job {} cannot move from {} to {status}",
                job.id, job.status
            )));
        }
        job.status = status;
    }

    if let Some(error) = update.error {
        if job.status != JobStatus::Failed {
            return Err(Error::Validation(
                "error may only be recorded on a failed job".into(),
            ));
        }
        job.error = Some(error);
    }

    if let Some(progress) = update.progress {
        job.progress = job.progress.max(progress.min(100));
    }
    job.progress = match job.status {
        JobStatus::Completed => 100,
        _ => job.progress.min(99),
    };

    if let Some(result) = update.push_result {
        let total = total_formats(&job.requested_work);
        if job.results.len() >= total {
            return Err(Error::Conflict(format!(
                "job {} already holds {total} results",
                job.id
            )));
        }
        job.results.push(result);
    }

    Ok(job)
}

//! Artifact lookup for downloads.
//!
//! An artifact is addressed by its job id and the reference stored in
//! [`FormatResult::file_path`](crate::job::FormatResult). Only artifacts a job
//! actually lists are served, and references that try to leave the job
//! directory are rejected before touching the filesystem.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rf_core::{Error, JobId, Result};

use crate::store::JobStore;

/// A resolved artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
    pub size: u64,
}

/// Resolves artifact references to files.
pub trait ArtifactStore: Send + Sync {
    fn resolve(&self, job_id: JobId, file_ref: &str) -> Result<Artifact>;
}

/// Artifacts stored under `<output_dir>/<job_id>/`.
pub struct LocalArtifactStore {
    output_dir: PathBuf,
    jobs: Arc<dyn JobStore>,
}

impl LocalArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            output_dir: output_dir.into(),
            jobs,
        }
    }

    /// Resolve and open for streaming.
    pub async fn open(&self, job_id: JobId, file_ref: &str) -> Result<(Artifact, tokio::fs::File)> {
        let artifact = self.resolve(job_id, file_ref)?;
        let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("artifact", file_ref),
            _ => Error::from(e),
        })?;
        Ok((artifact, file))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn resolve(&self, job_id: JobId, file_ref: &str) -> Result<Artifact> {
        let file_name = file_name_of(job_id, file_ref)?;

        let job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| Error::not_found("job", job_id))?;
        let reference = format!("{job_id}/{file_name}");
        if job.result_for(&reference).is_none() {
            return Err(Error::not_found("artifact", reference));
        }

        let path = self.output_dir.join(job_id.to_string()).join(&file_name);
        let size = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(Error::not_found("artifact", reference)),
        };

        Ok(Artifact {
            content_type: content_type(&path),
            path,
            file_name,
            size,
        })
    }
}

/// Accepts `"<job_id>/<file>"` or a bare `"<file>"`. Anything else,
/// including absolute paths and `..`, is a validation error.
fn file_name_of(job_id: JobId, file_ref: &str) -> Result<String> {
    let prefix = format!("{job_id}/");
    let rest = file_ref.strip_prefix(&prefix).unwrap_or(file_ref);

    let mut components = Path::new(rest).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Validation("artifact name is not valid UTF-8".into())),
        _ => Err(Error::Validation(format!("invalid artifact reference: {file_ref}"))),
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("avif") => "image/avif",
        Some(ext) => rf_core::mime_from_extension(ext).unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}

//! Job status and artifact download handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rf_core::JobId;
use rf_jobs::Job;
use tokio_util::io::ReaderStream;

use super::parse_id;
use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/jobs
pub async fn list_jobs(State(ctx): State<AppContext>) -> Result<Json<Vec<Job>>, AppError> {
    Ok(Json(ctx.orchestrator.list_jobs()?))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let id: JobId = parse_id(&id, "job")?;
    Ok(Json(ctx.orchestrator.get_job(id)?))
}

/// GET /api/jobs/{id}/download/{*file}
///
/// Streams one artifact. The file may be given bare or as the full
/// `<job_id>/<file>` reference stored on the result.
pub async fn download(
    State(ctx): State<AppContext>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id: JobId = parse_id(&id, "job")?;
    let (artifact, handle) = ctx.artifacts.open(id, &file).await?;

    tracing::debug!(job_id = %id, file = %artifact.file_name, size = artifact.size, "serving artifact");

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_LENGTH, artifact.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response())
}

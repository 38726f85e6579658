//! Multipart upload handler.
//!
//! Fields:
//! - `file` (required): the media file.
//! - `formats` (required): JSON object of platform to format names.
//! - `output_format`, `lossless`, `fit`, `video_quality` (optional).
//!
//! The file is streamed to the upload directory before the job is
//! submitted. If the submission is rejected the file is removed again.

use std::path::Path;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rf_core::Error;
use rf_jobs::{RequestedWork, SubmitOptions, Upload};
use tokio::io::AsyncWriteExt;

use crate::context::AppContext;
use crate::error::AppError;

/// POST /api/upload
pub async fn upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut stored: Option<Upload> = None;
    let mut formats: Option<RequestedWork> = None;
    let mut options = SubmitOptions::default();

    let parsed: rf_core::Result<()> = async {
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    if stored.is_some() {
                        return Err(Error::Validation("only one file may be uploaded".into()));
                    }
                    stored = Some(store_file(&ctx.config.server.upload_dir, field).await?);
                }
                "formats" => {
                    let text = field.text().await.map_err(bad_multipart)?;
                    let work: RequestedWork = serde_json::from_str(&text)
                        .map_err(|e| Error::Validation(format!("formats must be a JSON object: {e}")))?;
                    formats = Some(work);
                }
                "output_format" => options.output_format = text_of(field).await?.parse()?,
                "fit" => options.fit = text_of(field).await?.parse()?,
                "video_quality" => options.video_quality = text_of(field).await?.parse()?,
                "lossless" => options.lossless = parse_flag(&text_of(field).await?)?,
                other => tracing::debug!(field = other, "ignoring unknown upload field"),
            }
        }
        Ok(())
    }
    .await;

    let outcome = match (parsed, stored.as_ref(), formats) {
        (Err(e), _, _) => Err(e),
        (Ok(()), None, _) => Err(Error::Validation("no file uploaded".into())),
        (Ok(()), Some(_), None) => Err(Error::Validation("no formats selected".into())),
        (Ok(()), Some(upload), Some(work)) => {
            ctx.orchestrator.submit(upload.clone(), work, options).await
        }
    };

    match outcome {
        Ok(job) => Ok((StatusCode::CREATED, Json(job))),
        Err(e) => {
            if let Some(upload) = stored {
                let _ = tokio::fs::remove_file(&upload.path).await;
            }
            Err(e.into())
        }
    }
}

async fn store_file(upload_dir: &Path, mut field: Field<'_>) -> rf_core::Result<Upload> {
    let original = field
        .file_name()
        .map(str::to_string)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Validation("file field has no file name".into()))?;

    let mime_type = match field.content_type() {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => Path::new(&original)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(rf_core::mime_from_extension)
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    tokio::fs::create_dir_all(upload_dir).await?;
    let path = upload_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), sanitize(&original)));

    let mut file = tokio::fs::File::create(&path).await?;
    let mut written = 0u64;
    let copied: rf_core::Result<()> = async {
        while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;
    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }

    tracing::info!(file = %original, mime = %mime_type, bytes = written, "upload stored");

    Ok(Upload {
        path,
        original_file_name: original,
        mime_type,
    })
}

async fn text_of(field: Field<'_>) -> rf_core::Result<String> {
    field.text().await.map_err(bad_multipart)
}

fn parse_flag(value: &str) -> rf_core::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Validation(format!("invalid boolean: {other}"))),
    }
}

/// Keep the last path component and replace anything outside `[A-Za-z0-9._-]`.
fn sanitize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

fn bad_multipart(e: MultipartError) -> Error {
    Error::Validation(format!("malformed multipart body: {e}"))
}

//! Format task runner: one (platform, format) conversion end to end.
//!
//! Images are cropped and resampled in-process, then handed to the
//! optimizer chain as decoded pixels. Videos go to the [`Transcoder`], with
//! a crop aimed by stills sampled from the source. Every failure leaves
//! this module as a [`TaskError`], which the orchestrator logs and counts
//! without failing the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, GenericImageView};
use rf_av::{TranscodeRequest, Transcoder};
use rf_core::config::VideoConfig;
use rf_core::{Dimensions, Error, Fit, FormatSpec, ImageEncoding, JobId, MediaKind, Result};
use rf_imaging::render::{placeholder, render};
use rf_imaging::{
    AttentionMap, BaselineEncoder, CropResolver, OptimizeRequest, OptimizerChain, SourceImage,
    SubjectHint,
};

use crate::job::{FormatResult, SubmitOptions};

/// A format task failed. The job continues.
#[derive(Debug, thiserror::Error)]
#[error("{platform}/{format}: {cause}")]
pub struct TaskError {
    pub platform: String,
    pub format: String,
    #[source]
    pub cause: Error,
}

impl TaskError {
    pub fn new(platform: impl Into<String>, format: impl Into<String>, cause: Error) -> Self {
        Self {
            platform: platform.into(),
            format: format.into(),
            cause,
        }
    }
}

impl From<TaskError> for Error {
    fn from(e: TaskError) -> Self {
        Error::task(e.platform, e.format, e.cause.to_string())
    }
}

// ---------------------------------------------------------------------------
// TaskInput
// ---------------------------------------------------------------------------

/// Source data shared by every task of a job.
pub enum SourceMedia {
    Image {
        /// The upload, as read from disk.
        bytes: Bytes,
        image: Arc<DynamicImage>,
        attention: Option<Arc<AttentionMap>>,
        /// Some pixel is not fully opaque.
        transparent: bool,
    },
    Video {
        /// Energy summed over sampled stills, once sampling ran.
        attention: Option<Arc<AttentionMap>>,
    },
}

/// Everything a task needs besides its [`FormatSpec`].
pub struct TaskInput {
    pub job_id: JobId,
    pub path: PathBuf,
    pub mime_type: String,
    pub file_size: u64,
    /// Directory the job's artifacts are written to.
    pub output_dir: PathBuf,
    pub options: SubmitOptions,
    pub source: SourceMedia,
}

impl TaskInput {
    /// Read the upload once for all tasks. Images are decoded here.
    ///
    /// Fails when the file cannot be read or decoded.
    pub async fn prepare(
        job_id: JobId,
        path: &Path,
        mime_type: &str,
        output_root: &Path,
        options: SubmitOptions,
    ) -> Result<Self> {
        let kind = MediaKind::from_mime(mime_type)
            .ok_or_else(|| Error::Validation(format!("unsupported media type: {mime_type}")))?;

        let (file_size, source) = match kind {
            MediaKind::Image => {
                let bytes = Bytes::from(tokio::fs::read(path).await?);
                let raw = bytes.clone();
                let (image, attention, transparent) = tokio::task::spawn_blocking(move || {
                    let image = image::load_from_memory(&raw)
                        .map_err(|e| Error::Validation(format!("cannot decode image: {e}")))?;
                    let attention = AttentionMap::from_image(&image);
                    let transparent = has_transparency(&image);
                    Ok::<_, Error>((image, attention, transparent))
                })
                .await
                .map_err(|e| Error::Internal(format!("decode task panicked: {e}")))??;
                (
                    bytes.len() as u64,
                    SourceMedia::Image {
                        bytes,
                        image: Arc::new(image),
                        attention: attention.map(Arc::new),
                        transparent,
                    },
                )
            }
            MediaKind::Video => (
                tokio::fs::metadata(path).await?.len(),
                SourceMedia::Video { attention: None },
            ),
        };

        Ok(Self {
            job_id,
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            file_size,
            output_dir: output_root.join(job_id.to_string()),
            options,
            source,
        })
    }

    /// Encoded upload bytes, for image sources.
    pub fn image_bytes(&self) -> Option<&[u8]> {
        match &self.source {
            SourceMedia::Image { bytes, .. } => Some(bytes),
            SourceMedia::Video { .. } => None,
        }
    }

    /// Encoding worth retrying when an artifact outgrows the upload: the
    /// source's own, when it is PNG or JPEG. Lossless requests never fall
    /// back.
    fn fallback_encoding(&self) -> Option<ImageEncoding> {
        if self.options.lossless {
            return None;
        }
        ImageEncoding::from_mime(&self.mime_type)
            .filter(|e| matches!(e, ImageEncoding::Png | ImageEncoding::Jpeg))
    }

    /// Write an artifact into the job directory and return its reference
    /// and size.
    async fn write_artifact(&self, file_name: &str, bytes: &[u8]) -> Result<(String, u64)> {
        tokio::fs::write(self.output_dir.join(file_name), bytes).await?;
        Ok((format!("{}/{file_name}", self.job_id), bytes.len() as u64))
    }
}

/// Whether any pixel is less than fully opaque. Formats like GIF decode to
/// RGBA even when nothing is transparent.
fn has_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    match img.as_rgba8() {
        Some(rgba) => rgba.pixels().any(|p| p.0[3] < u8::MAX),
        None => img.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX),
    }
}

// ---------------------------------------------------------------------------
// FormatTaskRunner
// ---------------------------------------------------------------------------

pub struct FormatTaskRunner {
    chain: OptimizerChain,
    transcoder: Arc<dyn Transcoder>,
    video: VideoConfig,
    placeholder_on_failure: bool,
}

impl FormatTaskRunner {
    pub fn new(chain: OptimizerChain, transcoder: Arc<dyn Transcoder>, video: VideoConfig) -> Self {
        Self {
            chain,
            transcoder,
            video,
            placeholder_on_failure: false,
        }
    }

    /// Substitute a gray placeholder image when a transcode fails.
    pub fn with_placeholder_on_failure(mut self, enabled: bool) -> Self {
        self.placeholder_on_failure = enabled;
        self
    }

    /// Pull stills from a video source, record their combined attention on
    /// `input`, and return the encoded stills for subject analysis.
    ///
    /// Sampling is best-effort. Any failure leaves video crops centered.
    pub async fn sample_video(&self, input: &mut TaskInput) -> Vec<Vec<u8>> {
        let SourceMedia::Video { attention } = &mut input.source else {
            return Vec::new();
        };
        if self.video.sample_frames == 0 {
            return Vec::new();
        }

        let frames = match self
            .transcoder
            .sample_frames(&input.path, self.video.sample_frames)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(
                    job_id = %input.job_id,
                    error = %e,
                    "frame sampling failed; video crops stay centered"
                );
                return Vec::new();
            }
        };

        let stills = frames.clone();
        let merged = tokio::task::spawn_blocking(move || {
            AttentionMap::merge(
                stills
                    .iter()
                    .filter_map(|bytes| image::load_from_memory(bytes).ok())
                    .filter_map(|frame| AttentionMap::from_image(&frame)),
            )
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(job_id = %input.job_id, error = %e, "attention task panicked");
            None
        });

        tracing::debug!(
            job_id = %input.job_id,
            frames = frames.len(),
            attention = merged.is_some(),
            "video frames sampled"
        );
        *attention = merged.map(Arc::new);
        frames
    }

    /// Produce one format.
    pub async fn run(
        &self,
        input: &TaskInput,
        spec: &FormatSpec,
        hint: Option<&SubjectHint>,
    ) -> std::result::Result<FormatResult, TaskError> {
        let outcome = match &input.source {
            SourceMedia::Image {
                image,
                attention,
                transparent,
                ..
            } => {
                self.run_image(input, spec, image, *transparent, attention.as_deref(), hint)
                    .await
            }
            SourceMedia::Video { attention } => {
                self.run_video(input, spec, attention.as_deref(), hint).await
            }
        };
        outcome.map_err(|cause| TaskError::new(&spec.platform, &spec.name, cause))
    }

    async fn run_image(
        &self,
        input: &TaskInput,
        spec: &FormatSpec,
        image: &Arc<DynamicImage>,
        transparent: bool,
        attention: Option<&AttentionMap>,
        hint: Option<&SubjectHint>,
    ) -> Result<FormatResult> {
        let (w, h) = image.dimensions();
        let plan = CropResolver::new(Dimensions::new(w, h))
            .with_attention(attention)
            .resolve(spec.dimensions, hint, input.options.fit);

        tracing::debug!(
            job_id = %input.job_id,
            platform = %spec.platform,
            format = %spec.name,
            strategy = %plan.strategy,
            window = ?plan.window,
            "crop resolved"
        );

        let source = image.clone();
        let frame = tokio::task::spawn_blocking(move || render(&source, &plan))
            .await
            .map_err(|e| Error::Internal(format!("render task panicked: {e}")))?;

        let format = input
            .options
            .output_format
            .resolve(&input.mime_type, transparent);
        let outcome = self
            .chain
            .optimize(OptimizeRequest {
                input: SourceImage::Decoded(Arc::new(frame)),
                original_size: input.file_size,
                format,
                lossless: input.options.lossless,
                resize: None,
                fallback: input.fallback_encoding(),
            })
            .await;

        let file_name = format!("{}.{}", spec.file_stem(), outcome.format.extension());
        let (file_path, file_size) = input.write_artifact(&file_name, &outcome.bytes).await?;

        Ok(FormatResult {
            platform: spec.platform.clone(),
            format: spec.name.clone(),
            dimensions: spec.dimensions,
            file_size,
            file_path,
            optimized: outcome.optimized(),
            tier_used: Some(outcome.tier_used),
            compression_ratio: Some(outcome.compression_ratio),
            quality_used: outcome.quality_used,
            crop_strategy: Some(plan.strategy),
            degraded: false,
        })
    }

    async fn run_video(
        &self,
        input: &TaskInput,
        spec: &FormatSpec,
        attention: Option<&AttentionMap>,
        hint: Option<&SubjectHint>,
    ) -> Result<FormatResult> {
        // Letterboxing is not offered for video; the frame is always filled.
        let plan = match self.transcoder.probe(&input.path).await {
            Ok(source) => Some(
                CropResolver::new(source)
                    .with_attention(attention)
                    .resolve(spec.dimensions, hint, Fit::Cover),
            ),
            Err(e) => {
                tracing::warn!(
                    job_id = %input.job_id,
                    error = %e,
                    "probe failed; letting the transcoder fill the frame"
                );
                None
            }
        };

        let request = TranscodeRequest {
            dimensions: spec.dimensions,
            crf: self.video.crf(input.options.video_quality),
            crop: plan.map(|p| p.window),
        };
        let file_name = format!("{}.mp4", spec.file_stem());
        let output = input.output_dir.join(&file_name);

        match self.transcoder.transcode(&input.path, &output, &request).await {
            Ok(()) => {
                let file_size = tokio::fs::metadata(&output).await?.len();
                let compression_ratio = if input.file_size == 0 {
                    0.0
                } else {
                    (input.file_size as f64 - file_size as f64) / input.file_size as f64
                };
                Ok(FormatResult {
                    platform: spec.platform.clone(),
                    format: spec.name.clone(),
                    dimensions: spec.dimensions,
                    file_size,
                    file_path: format!("{}/{file_name}", input.job_id),
                    optimized: false,
                    tier_used: None,
                    compression_ratio: Some(compression_ratio),
                    quality_used: None,
                    crop_strategy: plan.map(|p| p.strategy),
                    degraded: false,
                })
            }
            Err(e) if self.placeholder_on_failure => {
                tracing::warn!(
                    job_id = %input.job_id,
                    platform = %spec.platform,
                    format = %spec.name,
                    error = %e,
                    "transcode failed; writing placeholder image"
                );
                self.write_placeholder(input, spec).await
            }
            Err(e) => Err(e),
        }
    }

    async fn write_placeholder(&self, input: &TaskInput, spec: &FormatSpec) -> Result<FormatResult> {
        let dims = spec.dimensions;
        let encoded = tokio::task::spawn_blocking(move || {
            BaselineEncoder::encode_image(&placeholder(dims), ImageEncoding::Jpeg, false)
        })
        .await
        .map_err(|e| Error::Internal(format!("placeholder task panicked: {e}")))??;

        let file_name = format!("{}.{}", spec.file_stem(), ImageEncoding::Jpeg.extension());
        let (file_path, file_size) = input.write_artifact(&file_name, &encoded.bytes).await?;

        Ok(FormatResult {
            platform: spec.platform.clone(),
            format: spec.name.clone(),
            dimensions: dims,
            file_size,
            file_path,
            optimized: false,
            tier_used: None,
            compression_ratio: None,
            quality_used: encoded.quality_used,
            crop_strategy: None,
            degraded: true,
        })
    }
}

//! Video transcoding capability and its ffmpeg adapter.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rf_core::config::VideoConfig;
use rf_core::{CropWindow, Dimensions};

use crate::command::ToolCommand;
use crate::scratch::Scratch;
use crate::tools::{ToolRegistry, FFMPEG, FFPROBE};

/// Per-frame deadline when pulling stills.
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampled stills are scaled down to at most this width.
const FRAME_MAX_WIDTH: u32 = 640;

/// Parameters for rendering one output format from a source video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// Exact output frame size.
    pub dimensions: Dimensions,
    /// x264 constant rate factor.
    pub crf: u32,
    /// Source region to keep. `None` lets the encoder center-crop.
    pub crop: Option<CropWindow>,
}

/// An out-of-process video transcoder.
///
/// Spawn failures and non-zero exits surface as [`rf_core::Error::Tool`].
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Display dimensions of the source's first video stream.
    async fn probe(&self, input: &Path) -> rf_core::Result<Dimensions>;

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        request: &TranscodeRequest,
    ) -> rf_core::Result<()>;

    /// Up to `count` PNG stills spread over the source, for crop analysis.
    ///
    /// Transcoders that cannot pull frames return none, which leaves video
    /// crops centered.
    async fn sample_frames(&self, _input: &Path, _count: usize) -> rf_core::Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}

/// [`Transcoder`] backed by the ffmpeg and ffprobe binaries.
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
    config: VideoConfig,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>, config: VideoConfig) -> Self {
        Self { tools, config }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(&self, input: &Path) -> rf_core::Result<Dimensions> {
        let ffprobe = self.tools.require(FFPROBE)?;
        crate::probe::probe_dimensions(ffprobe, input).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        request: &TranscodeRequest,
    ) -> rf_core::Result<()> {
        let ffmpeg = self.tools.require(FFMPEG)?;

        let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
        cmd.args(build_args(input, output, request, &self.config))
            .timeout(self.config.timeout());

        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            dimensions = %request.dimensions,
            crf = request.crf,
            crop = ?request.crop,
            "Transcoding video"
        );

        cmd.execute().await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(rf_core::Error::tool(
                FFMPEG,
                format!("no output written to {}", output.display()),
            ));
        }
        Ok(())
    }

    async fn sample_frames(&self, input: &Path, count: usize) -> rf_core::Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let ffprobe = self.tools.require(FFPROBE)?;
        let ffmpeg = self.tools.require(FFMPEG)?;
        let duration = crate::probe::probe_duration(ffprobe, input).await?;

        let scratch = Scratch::new()?;
        let mut frames = Vec::with_capacity(count);
        for (i, offset) in sample_offsets(duration, count).into_iter().enumerate() {
            let still = scratch.file(&format!("frame_{i:02}.png"));
            let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
            cmd.args(frame_args(input, offset, &still)).timeout(FRAME_TIMEOUT);

            if let Err(e) = cmd.execute().await {
                tracing::warn!(input = %input.display(), offset, error = %e, "frame sample failed");
                continue;
            }
            match tokio::fs::read(&still).await {
                Ok(bytes) if !bytes.is_empty() => frames.push(bytes),
                _ => tracing::warn!(input = %input.display(), offset, "frame sample wrote nothing"),
            }
        }

        tracing::debug!(
            input = %input.display(),
            duration,
            sampled = frames.len(),
            "Sampled video frames"
        );
        Ok(frames)
    }
}

/// Evenly spaced timestamps strictly inside `(0, duration)`, skipping the
/// very start and end where fades and title cards sit.
pub fn sample_offsets(duration: f64, count: usize) -> Vec<f64> {
    if count == 0 || !duration.is_finite() || duration <= 0.0 {
        return Vec::new();
    }
    let step = duration / (count + 1) as f64;
    (1..=count).map(|i| step * i as f64).collect()
}

fn frame_args(input: &Path, offset: f64, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-v".into(),
        "error".into(),
        "-y".into(),
        "-ss".into(),
        format!("{offset:.3}"),
        "-i".into(),
        input.to_string_lossy().into(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        format!("scale='min({FRAME_MAX_WIDTH},iw)':-2"),
        "-f".into(),
        "image2".into(),
        "-c:v".into(),
        "png".into(),
        output.to_string_lossy().into(),
    ]
}

/// Video filter chain: explicit crop then scale, or scale-to-fill then a
/// centered crop when no window was resolved.
pub fn video_filter(request: &TranscodeRequest) -> String {
    let Dimensions { width, height } = request.dimensions;
    match request.crop {
        Some(c) => format!(
            "crop={}:{}:{}:{},scale={width}:{height},setsar=1",
            c.width, c.height, c.x, c.y
        ),
        None => format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height},setsar=1"
        ),
    }
}

fn build_args(
    input: &Path,
    output: &Path,
    request: &TranscodeRequest,
    config: &VideoConfig,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into(),
        "-vf".into(),
        video_filter(request),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        config.preset.clone(),
        "-crf".into(),
        request.crf.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        config.audio_bitrate.clone(),
        "-movflags".into(),
        "+faststart".into(),
    ];
    args.push(output.to_string_lossy().into());
    args
}

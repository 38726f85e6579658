//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON. Every section
//! defaults sensibly, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{FormatCatalog, FormatSpec};
use crate::error::Result;
use crate::media::VideoQuality;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub optimizer: OptimizerConfig,
    pub analysis: AnalysisConfig,
    pub jobs: JobsConfig,
    pub video: VideoConfig,
    /// Replaces the built-in format catalog when present.
    pub catalog: Option<Vec<FormatSpec>>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, missing, or unparsable.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Build the format catalog this config describes.
    pub fn format_catalog(&self) -> Result<FormatCatalog> {
        match &self.catalog {
            Some(specs) => FormatCatalog::from_specs(specs.clone()),
            None => Ok(FormatCatalog::builtin()),
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.server.upload_dir == self.server.output_dir {
            warnings.push("server.upload_dir and server.output_dir are the same directory".into());
        }

        if self.optimizer.advanced_enabled && self.tools.optimizer_path.is_none() {
            warnings.push(
                "optimizer.advanced_enabled is set but tools.optimizer_path is missing; \
                 only the baseline encoder will run"
                    .into(),
            );
        }

        if self.optimizer.advanced_timeout_secs == 0 {
            warnings.push("optimizer.advanced_timeout_secs is 0; the advanced tier always times out".into());
        }

        if self.analysis.enabled && self.analysis.endpoint.is_none() {
            warnings.push("analysis is enabled but analysis.endpoint is not set".into());
        }

        if self.jobs.max_parallel_tasks == 0 {
            warnings.push("jobs.max_parallel_tasks is 0; treating it as 1".into());
        }

        for (name, crf) in [
            ("crf_high", self.video.crf_high),
            ("crf_medium", self.video.crf_medium),
            ("crf_low", self.video.crf_low),
        ] {
            if crf > 51 {
                warnings.push(format!("video.{name} {crf} is outside the x264 range 0-51"));
            }
        }

        if let Err(e) = self.format_catalog() {
            warnings.push(format!("catalog is invalid and will be ignored: {e}"));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server and storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            upload_dir: PathBuf::from("./data/uploads"),
            output_dir: PathBuf::from("./data/output"),
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

/// Paths to external CLI tools. `None` means "look on PATH".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// External optimizer invoked as `<tool> <input> <output> <options_json>`.
    pub optimizer_path: Option<PathBuf>,
}

/// Optimizer fallback chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub advanced_enabled: bool,
    pub advanced_timeout_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            advanced_enabled: true,
            advanced_timeout_secs: 15,
        }
    }
}

impl OptimizerConfig {
    pub fn advanced_timeout(&self) -> Duration {
        Duration::from_secs(self.advanced_timeout_secs)
    }
}

/// Vision-based subject analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Format tasks of one job that may run at the same time.
    pub max_parallel_tasks: usize,
    /// Write a gray placeholder image when a video transcode fails.
    pub video_placeholder_on_failure: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 2,
            video_placeholder_on_failure: false,
        }
    }
}

/// Video transcode defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub preset: String,
    pub crf_high: u32,
    pub crf_medium: u32,
    pub crf_low: u32,
    pub audio_bitrate: String,
    pub timeout_secs: u64,
    /// Frames pulled from a video to aim its crop. `0` disables sampling
    /// and video crops stay centered.
    pub sample_frames: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            preset: "medium".into(),
            crf_high: 18,
            crf_medium: 23,
            crf_low: 28,
            audio_bitrate: "128k".into(),
            timeout_secs: 600,
            sample_frames: 5,
        }
    }
}

impl VideoConfig {
    /// CRF value for a quality preset.
    pub fn crf(&self, quality: VideoQuality) -> u32 {
        match quality {
            VideoQuality::High => self.crf_high,
            VideoQuality::Medium => self.crf_medium,
            VideoQuality::Low => self.crf_low,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

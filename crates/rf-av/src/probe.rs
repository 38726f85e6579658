//! Frame-size probing with ffprobe.
//!
//! Only the first video stream's display dimensions matter to the crop
//! resolver, so this asks ffprobe for exactly that and accounts for
//! rotation metadata (phone footage is often stored landscape with a 90°
//! rotation flag).

use std::path::Path;
use std::time::Duration;

use rf_core::Dimensions;
use serde::Deserialize;

use crate::command::ToolCommand;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Probe the display dimensions of the first video stream of `input`.
pub async fn probe_dimensions(ffprobe: &Path, input: &Path) -> rf_core::Result<Dimensions> {
    let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
        "-of",
        "json",
    ])
    .arg(input.to_string_lossy())
    .timeout(PROBE_TIMEOUT);

    let output = cmd.execute().await?;
    parse_dimensions(&output.stdout)
}

/// Probe the container duration of `input`, in seconds.
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> rf_core::Result<f64> {
    let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
    cmd.args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(input.to_string_lossy())
        .timeout(PROBE_TIMEOUT);

    let output = cmd.execute().await?;
    parse_duration(&output.stdout)
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct DurationOutput {
    format: Option<DurationSection>,
}

#[derive(Debug, Deserialize)]
struct DurationSection {
    /// ffprobe prints numbers in this section as strings.
    duration: Option<String>,
}

/// Parse ffprobe JSON into a positive, finite duration.
pub(crate) fn parse_duration(json: &str) -> rf_core::Result<f64> {
    let parsed: DurationOutput = serde_json::from_str(json)
        .map_err(|e| rf_core::Error::tool("ffprobe", format!("JSON parse error: {e}")))?;

    parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| rf_core::Error::tool("ffprobe", "container reports no duration"))
}

/// Parse ffprobe JSON into display dimensions.
pub(crate) fn parse_dimensions(json: &str) -> rf_core::Result<Dimensions> {
    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| rf_core::Error::tool("ffprobe", format!("JSON parse error: {e}")))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| rf_core::Error::tool("ffprobe", "no video stream found"))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(rf_core::Error::tool("ffprobe", "video stream has no dimensions"));
    };

    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .or_else(|| stream.tags.rotate.as_deref().and_then(|r| r.parse().ok()))
        .unwrap_or(0);

    if rotation.rem_euclid(180) == 90 {
        Ok(Dimensions::new(height, width))
    } else {
        Ok(Dimensions::new(width, height))
    }
}

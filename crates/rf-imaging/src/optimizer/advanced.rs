//! Advanced tier: an external optimizer process.
//!
//! The tool is invoked as `<tool> <input> <output> <options_json>` and prints
//! a JSON report on stdout:
//!
//! ```json
//! {"success": true, "original_size": 120034, "optimized_size": 40211,
//!  "compression_ratio": 66.5, "quality_used": 80}
//! ```
//!
//! A non-zero exit, `"success": false`, an unreadable report, or a missing
//! output file are all tier failures. The deadline is enforced by the chain;
//! dropping the future kills the child.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use rf_av::{Scratch, ToolCommand};
use rf_core::Dimensions;
use serde::{Deserialize, Serialize};

use super::{EncodeRequest, Encoded, Encoder, ResizeSpec};

const NAME: &str = "advanced";

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Target quality for the advanced tier, lower for larger inputs.
pub fn adaptive_quality(original_size: u64, lossless: bool) -> u8 {
    if lossless {
        return 100;
    }
    match original_size {
        s if s > 5 * MIB => 70,
        s if s > 2 * MIB => 75,
        s if s > 500 * KIB => 80,
        _ => 85,
    }
}

#[derive(Debug, Serialize)]
struct ToolOptions {
    format: String,
    quality: u8,
    lossless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ToolReport {
    success: bool,
    /// Percent saved.
    compression_ratio: Option<f64>,
    /// A number, or a label such as `"lossless"`.
    quality_used: Option<serde_json::Value>,
    error: Option<String>,
}

/// [`Encoder`] that shells out to an external optimizer.
#[derive(Debug, Clone)]
pub struct ExternalOptimizer {
    program: PathBuf,
}

impl ExternalOptimizer {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Encoder for ExternalOptimizer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn encode(&self, input: Bytes, request: &EncodeRequest) -> rf_core::Result<Encoded> {
        let scratch = Scratch::new()?;
        let input_ext = image::guess_format(&input)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin");
        let input_path = scratch.write(&format!("input.{input_ext}"), &input).await?;
        let output_path = scratch.file(&format!("output.{}", request.format.extension()));

        let (max_width, max_height) = match request.resize {
            Some(spec) => {
                let target = resize_target(spec, &input)?;
                (Some(target.width), Some(target.height))
            }
            None => (None, None),
        };
        let options = ToolOptions {
            format: request.format.to_string(),
            quality: adaptive_quality(request.original_size, request.lossless),
            lossless: request.lossless,
            max_width,
            max_height,
        };
        let options_json = serde_json::to_string(&options)
            .map_err(|e| rf_core::Error::encode(NAME, format!("options encode failed: {e}")))?;

        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.arg(input_path.to_string_lossy())
            .arg(output_path.to_string_lossy())
            .arg(options_json);
        let output = cmd.execute().await?;

        let report = parse_report(&output.stdout)?;
        if !report.success {
            return Err(rf_core::Error::encode(
                NAME,
                report.error.unwrap_or_else(|| "optimizer reported failure".into()),
            ));
        }

        let bytes = tokio::fs::read(&output_path).await.map_err(|e| {
            rf_core::Error::encode(NAME, format!("optimizer wrote no output: {e}"))
        })?;

        Ok(Encoded {
            bytes,
            quality_used: report
                .quality_used
                .as_ref()
                .and_then(serde_json::Value::as_u64)
                .and_then(|q| u8::try_from(q).ok()),
            compression_ratio: report.compression_ratio.map(|pct| pct / 100.0),
            format: None,
        })
    }
}

/// Output bounds for a resize. A percentage needs the native size, which is
/// read from the image header without decoding pixels.
fn resize_target(spec: ResizeSpec, input: &[u8]) -> rf_core::Result<Dimensions> {
    if let ResizeSpec::Exact(d) = spec {
        return Ok(d);
    }
    let (w, h) = image::ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .ok_or_else(|| rf_core::Error::encode(NAME, "cannot read input dimensions for resize"))?;
    Ok(spec.target(Dimensions::new(w, h)))
}

/// Parse the tool's report, skipping any log lines before the JSON object.
fn parse_report(stdout: &str) -> rf_core::Result<ToolReport> {
    let start = stdout
        .find('{')
        .ok_or_else(|| rf_core::Error::encode(NAME, "optimizer printed no report"))?;
    serde_json::from_str(&stdout[start..])
        .map_err(|e| rf_core::Error::encode(NAME, format!("unreadable optimizer report: {e}")))
}

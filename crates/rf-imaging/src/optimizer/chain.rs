//! The optimizer fallback chain.
//!
//! Tiers run in order. A tier fails when its encoder errors, returns empty
//! output, or misses its deadline; the next tier then runs. No tier is
//! retried. The last tier is the in-process baseline encoder, so for any
//! decodable input the chain returns an artifact.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rf_core::config::OptimizerConfig;
use rf_core::ImageEncoding;
use serde::{Deserialize, Serialize};

use super::{serialize_png, BaselineEncoder, EncodeRequest, Encoder, ExternalOptimizer, ResizeSpec, SourceImage};

/// Position of a tier in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Advanced,
    Baseline,
}

/// Which tier produced the artifact. `None` means every tier failed and the
/// input bytes were passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierUsed {
    Advanced,
    Baseline,
    None,
}

impl From<TierKind> for TierUsed {
    fn from(kind: TierKind) -> Self {
        match kind {
            TierKind::Advanced => TierUsed::Advanced,
            TierKind::Baseline => TierUsed::Baseline,
        }
    }
}

impl std::fmt::Display for TierUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierUsed::Advanced => write!(f, "advanced"),
            TierUsed::Baseline => write!(f, "baseline"),
            TierUsed::None => write!(f, "none"),
        }
    }
}

/// One attempt level.
#[derive(Clone)]
pub struct Tier {
    pub kind: TierKind,
    pub encoder: Arc<dyn Encoder>,
    /// Deadline for this tier. `None` waits as long as the encoder takes.
    pub timeout: Option<Duration>,
}

/// Input of one optimization.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub input: SourceImage,
    /// Size of the user's upload. Compression is reported against this.
    pub original_size: u64,
    pub format: ImageEncoding,
    pub lossless: bool,
    pub resize: Option<ResizeSpec>,
    /// Encoding to retry when the output is larger than the upload.
    pub fallback: Option<ImageEncoding>,
}

/// Result of one optimization.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub tier_used: TierUsed,
    pub bytes: Vec<u8>,
    pub format: ImageEncoding,
    /// Fraction of the original size saved. Negative when the output grew.
    pub compression_ratio: f64,
    pub quality_used: Option<u8>,
    /// Failures of the tiers that did not produce the artifact.
    pub error: Option<String>,
}

impl OptimizationOutcome {
    pub fn optimized(&self) -> bool {
        self.tier_used != TierUsed::None
    }
}

/// Ordered list of tiers ending in the baseline encoder.
#[derive(Clone)]
pub struct OptimizerChain {
    tiers: Vec<Tier>,
}

impl OptimizerChain {
    /// A chain containing only the baseline tier.
    pub fn baseline_only() -> Self {
        Self::with_baseline(Arc::new(BaselineEncoder::new()))
    }

    /// A chain whose terminal tier is `baseline`.
    pub fn with_baseline(baseline: Arc<dyn Encoder>) -> Self {
        Self {
            tiers: vec![Tier {
                kind: TierKind::Baseline,
                encoder: baseline,
                timeout: None,
            }],
        }
    }

    /// Put an advanced tier in front of the existing tiers.
    pub fn with_advanced(mut self, encoder: Arc<dyn Encoder>, timeout: Duration) -> Self {
        self.tiers.insert(
            0,
            Tier {
                kind: TierKind::Advanced,
                encoder,
                timeout: Some(timeout),
            },
        );
        self
    }

    /// Build the production chain: the external optimizer, when enabled and
    /// installed, in front of the baseline encoder.
    pub fn from_config(tools: &rf_av::ToolRegistry, config: &OptimizerConfig) -> Self {
        let chain = Self::baseline_only();
        if !config.advanced_enabled {
            return chain;
        }
        match tools.require(rf_av::tools::OPTIMIZER) {
            Ok(path) => chain.with_advanced(
                Arc::new(ExternalOptimizer::new(path.to_path_buf())),
                config.advanced_timeout(),
            ),
            Err(e) => {
                tracing::info!(error = %e, "advanced optimizer unavailable; using baseline only");
                chain
            }
        }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Run the tiers in order until one produces output.
    pub async fn optimize(&self, request: OptimizeRequest) -> OptimizationOutcome {
        let encode_request = EncodeRequest {
            format: request.format,
            lossless: request.lossless,
            resize: request.resize,
            original_size: request.original_size,
            fallback: request.fallback,
        };
        let mut failures: Vec<String> = Vec::new();

        for tier in &self.tiers {
            let attempt = match &request.input {
                SourceImage::Encoded(bytes) => tier.encoder.encode(bytes.clone(), &encode_request),
                SourceImage::Decoded(image) => {
                    tier.encoder.encode_pixels(image.clone(), &encode_request)
                }
            };
            let result = match tier.timeout {
                Some(deadline) => match tokio::time::timeout(deadline, attempt).await {
                    Ok(r) => r,
                    Err(_) => Err(rf_core::Error::encode(
                        tier.encoder.name(),
                        format!("timed out after {deadline:?}"),
                    )),
                },
                None => attempt.await,
            };

            match result {
                Ok(encoded) if !encoded.bytes.is_empty() => {
                    let compression_ratio = encoded
                        .compression_ratio
                        .unwrap_or_else(|| ratio(request.original_size, encoded.bytes.len()));
                    tracing::debug!(
                        tier = ?tier.kind,
                        encoder = tier.encoder.name(),
                        bytes = encoded.bytes.len(),
                        compression_ratio,
                        "optimizer tier succeeded"
                    );
                    return OptimizationOutcome {
                        tier_used: tier.kind.into(),
                        bytes: encoded.bytes,
                        format: encoded.format.unwrap_or(request.format),
                        compression_ratio,
                        quality_used: encoded.quality_used,
                        error: (!failures.is_empty()).then(|| failures.join("; ")),
                    };
                }
                Ok(_) => {
                    tracing::warn!(tier = ?tier.kind, encoder = tier.encoder.name(), "optimizer tier returned empty output");
                    failures.push(format!("{}: empty output", tier.encoder.name()));
                }
                Err(e) => {
                    tracing::warn!(tier = ?tier.kind, encoder = tier.encoder.name(), error = %e, "optimizer tier failed");
                    failures.push(format!("{}: {e}", tier.encoder.name()));
                }
            }
        }

        tracing::error!(errors = ?failures, "every optimizer tier failed; passing input through");
        let (bytes, format) = match request.input {
            SourceImage::Encoded(bytes) => {
                let format = sniff(&bytes).unwrap_or(request.format);
                (bytes.to_vec(), format)
            }
            SourceImage::Decoded(image) => match serialize_png(image).await {
                Ok(bytes) => (bytes.to_vec(), ImageEncoding::Png),
                Err(e) => {
                    failures.push(format!("pass-through: {e}"));
                    (Vec::new(), request.format)
                }
            },
        };
        OptimizationOutcome {
            tier_used: TierUsed::None,
            compression_ratio: ratio(request.original_size, bytes.len()),
            format,
            bytes,
            quality_used: None,
            error: Some(failures.join("; ")),
        }
    }
}

/// Encoding of bytes that are passed through untouched.
fn sniff(bytes: &[u8]) -> Option<ImageEncoding> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some(ImageEncoding::Jpeg),
        image::ImageFormat::Png => Some(ImageEncoding::Png),
        image::ImageFormat::WebP => Some(ImageEncoding::Webp),
        image::ImageFormat::Avif => Some(ImageEncoding::Avif),
        _ => None,
    }
}

fn ratio(original: u64, output: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - output as f64) / original as f64
}

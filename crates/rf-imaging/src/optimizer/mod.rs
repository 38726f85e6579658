//! Image optimization: the shared [`Encoder`] capability, its two
//! implementations, and the [`OptimizerChain`] that orders them.

mod advanced;
mod baseline;
mod chain;

pub use advanced::{adaptive_quality, ExternalOptimizer};
pub use baseline::{baseline_params, BaselineEncoder, BaselineParams};
pub use chain::{OptimizationOutcome, OptimizeRequest, OptimizerChain, Tier, TierKind, TierUsed};

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use rf_core::{Dimensions, ImageEncoding};

/// Lower and upper bound of a percentage resize.
pub const RESIZE_PERCENT_MIN: u8 = 50;
pub const RESIZE_PERCENT_MAX: u8 = 95;

/// Requested change of pixel dimensions before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSpec {
    /// Resize to exactly these dimensions.
    Exact(Dimensions),
    /// Scale both axes to this percentage of the native size. Values outside
    /// `50..=95` are clamped.
    Percent(u8),
}

impl ResizeSpec {
    /// Dimensions this spec produces from a source of `native` size.
    pub fn target(&self, native: Dimensions) -> Dimensions {
        match *self {
            ResizeSpec::Exact(d) => d,
            ResizeSpec::Percent(p) => {
                let p = p.clamp(RESIZE_PERCENT_MIN, RESIZE_PERCENT_MAX) as f64 / 100.0;
                let scale = |v: u32| ((v as f64 * p).round() as u32).max(1);
                Dimensions::new(scale(native.width), scale(native.height))
            }
        }
    }
}

/// Image handed to the optimizer chain.
#[derive(Debug, Clone)]
pub enum SourceImage {
    /// An encoded file, such as the upload itself.
    Encoded(Bytes),
    /// Pixels already in memory, such as a rendered crop.
    Decoded(Arc<DynamicImage>),
}

/// What one encoder invocation should produce.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub format: ImageEncoding,
    pub lossless: bool,
    pub resize: Option<ResizeSpec>,
    /// Size of the user's original upload, used for adaptive quality.
    pub original_size: u64,
    /// Encoding to retry when the output came out larger than the original
    /// upload. The smaller of the two is kept.
    pub fallback: Option<ImageEncoding>,
}

/// Encoder output.
#[derive(Debug, Clone, Default)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub quality_used: Option<u8>,
    /// Fraction saved, when the encoder measures it itself.
    pub compression_ratio: Option<f64>,
    /// Set when the encoder wrote the fallback encoding instead of the
    /// requested one.
    pub format: Option<ImageEncoding>,
}

/// Something that turns image bytes into encoded image bytes.
///
/// Failures are [`rf_core::Error::Encode`] (or [`rf_core::Error::Tool`] for
/// out-of-process encoders); the chain absorbs both.
#[async_trait]
pub trait Encoder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn encode(&self, input: Bytes, request: &EncodeRequest) -> rf_core::Result<Encoded>;

    /// Encode pixels that are already decoded.
    ///
    /// The default serializes them to PNG and calls [`Encoder::encode`].
    /// Encoders that work on pixels directly override it.
    async fn encode_pixels(
        &self,
        image: Arc<DynamicImage>,
        request: &EncodeRequest,
    ) -> rf_core::Result<Encoded> {
        let bytes = serialize_png(image).await?;
        self.encode(bytes, request).await
    }
}

/// Lossless PNG serialization of decoded pixels, off the async runtime.
pub async fn serialize_png(image: Arc<DynamicImage>) -> rf_core::Result<Bytes> {
    tokio::task::spawn_blocking(move || {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| rf_core::Error::encode("png", e.to_string()))?;
        Ok(Bytes::from(buf.into_inner()))
    })
    .await
    .map_err(|e| rf_core::Error::encode("png", format!("serialize task panicked: {e}")))?
}

//! Built-in encoder on top of the `image` and `webp` crates.
//!
//! This is the terminal tier of the optimizer chain. It has no external
//! process, so it succeeds for any input the `image` decoders can read.
//!
//! | Format | lossless | lossy |
//! |---|---|---|
//! | JPEG | quality 95 | quality 80 |
//! | PNG | best compression, adaptive filter | default compression |
//! | WebP | lossless mode | quality 80, 85 with alpha |
//! | AVIF | quality 90, speed 4 | quality 60, speed 8 |
//!
//! When the request names a fallback encoding and the output is larger than
//! the original upload, the image is encoded again in the fallback and the
//! smaller result wins.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rf_core::{Dimensions, ImageEncoding};

use super::{EncodeRequest, Encoded, Encoder};

const NAME: &str = "baseline";

/// Lossy WebP quality for images with an alpha channel. Edges against
/// transparency show artifacts sooner.
const WEBP_ALPHA_QUALITY: u8 = 85;

/// Encoder settings picked from the quality table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineParams {
    /// Encoder quality, `None` for formats without a quality knob.
    pub quality: Option<u8>,
    /// Encoder effort. For PNG, anything above 5 selects best compression.
    /// For AVIF, lower is slower and better.
    pub effort: u8,
}

/// The per-format quality table.
pub fn baseline_params(format: ImageEncoding, lossless: bool) -> BaselineParams {
    match (format, lossless) {
        (ImageEncoding::Jpeg, true) => BaselineParams { quality: Some(95), effort: 0 },
        (ImageEncoding::Jpeg, false) => BaselineParams { quality: Some(80), effort: 0 },
        (ImageEncoding::Png, true) => BaselineParams { quality: None, effort: 9 },
        (ImageEncoding::Png, false) => BaselineParams { quality: None, effort: 5 },
        (ImageEncoding::Webp, true) => BaselineParams { quality: Some(100), effort: 0 },
        (ImageEncoding::Webp, false) => BaselineParams { quality: Some(80), effort: 0 },
        (ImageEncoding::Avif, true) => BaselineParams { quality: Some(90), effort: 4 },
        (ImageEncoding::Avif, false) => BaselineParams { quality: Some(60), effort: 8 },
    }
}

/// Decode, resize, and encode in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineEncoder;

impl BaselineEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode an already-decoded image with the quality table.
    pub fn encode_image(
        img: &DynamicImage,
        format: ImageEncoding,
        lossless: bool,
    ) -> rf_core::Result<Encoded> {
        let params = baseline_params(format, lossless);
        let fail = |e: String| rf_core::Error::encode(NAME, format!("{format} encode failed: {e}"));

        let (bytes, quality_used) = match format {
            ImageEncoding::Jpeg => {
                let quality = params.quality.unwrap_or(80);
                let mut out = Cursor::new(Vec::new());
                DynamicImage::ImageRgb8(flatten_on_white(img))
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
                    .map_err(|e| fail(e.to_string()))?;
                (out.into_inner(), params.quality)
            }
            ImageEncoding::Png => {
                let compression = if params.effort > 5 {
                    CompressionType::Best
                } else {
                    CompressionType::Default
                };
                let mut out = Cursor::new(Vec::new());
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut out,
                    compression,
                    PngFilter::Adaptive,
                ))
                .map_err(|e| fail(e.to_string()))?;
                (out.into_inner(), params.quality)
            }
            ImageEncoding::Webp => {
                let quality = match params.quality {
                    Some(_) if !lossless && img.color().has_alpha() => WEBP_ALPHA_QUALITY,
                    Some(q) => q,
                    None => 80,
                };
                let rgba = img.to_rgba8();
                let (w, h) = rgba.dimensions();
                let encoded = webp::Encoder::from_rgba(rgba.as_raw(), w, h)
                    .encode_simple(lossless, quality as f32)
                    .map_err(|e| fail(format!("{e:?}")))?;
                (encoded.to_vec(), Some(quality))
            }
            ImageEncoding::Avif => {
                let quality = params.quality.unwrap_or(60);
                let mut out = Cursor::new(Vec::new());
                DynamicImage::ImageRgba8(img.to_rgba8())
                    .write_with_encoder(AvifEncoder::new_with_speed_quality(
                        &mut out,
                        params.effort,
                        quality,
                    ))
                    .map_err(|e| fail(e.to_string()))?;
                (out.into_inner(), params.quality)
            }
        };

        Ok(Encoded {
            bytes,
            quality_used,
            compression_ratio: None,
            format: None,
        })
    }

    /// Resize per the request, encode, and try the fallback encoding when
    /// the output grew past the original upload.
    fn encode_decoded(img: &DynamicImage, request: &EncodeRequest) -> rf_core::Result<Encoded> {
        let resized = request.resize.and_then(|spec| {
            let (w, h) = img.dimensions();
            let native = Dimensions::new(w, h);
            let target = spec.target(native);
            (target != native).then(|| img.resize_exact(target.width, target.height, FilterType::Lanczos3))
        });
        let img = resized.as_ref().unwrap_or(img);

        let encoded = Self::encode_image(img, request.format, request.lossless)?;

        let Some(fallback) = request.fallback.filter(|f| *f != request.format) else {
            return Ok(encoded);
        };
        if request.original_size == 0 || encoded.bytes.len() as u64 <= request.original_size {
            return Ok(encoded);
        }

        match Self::encode_image(img, fallback, request.lossless) {
            Ok(retry) if retry.bytes.len() < encoded.bytes.len() => {
                tracing::info!(
                    requested = %request.format,
                    fallback = %fallback,
                    original = request.original_size,
                    requested_bytes = encoded.bytes.len(),
                    fallback_bytes = retry.bytes.len(),
                    "output grew; keeping the smaller fallback encoding"
                );
                Ok(Encoded {
                    format: Some(fallback),
                    ..retry
                })
            }
            Ok(_) => Ok(encoded),
            Err(e) => {
                tracing::debug!(fallback = %fallback, error = %e, "fallback encode failed");
                Ok(encoded)
            }
        }
    }
}

#[async_trait]
impl Encoder for BaselineEncoder {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn encode(&self, input: Bytes, request: &EncodeRequest) -> rf_core::Result<Encoded> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&input)
                .map_err(|e| rf_core::Error::encode(NAME, format!("decode failed: {e}")))?;
            Self::encode_decoded(&img, &request)
        })
        .await
        .map_err(|e| rf_core::Error::encode(NAME, format!("encode task panicked: {e}")))?
    }

    async fn encode_pixels(
        &self,
        image: Arc<DynamicImage>,
        request: &EncodeRequest,
    ) -> rf_core::Result<Encoded> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::encode_decoded(&image, &request))
            .await
            .map_err(|e| rf_core::Error::encode(NAME, format!("encode task panicked: {e}")))?
    }
}

/// Composite transparency onto white. JPEG has no alpha channel.
pub(crate) fn flatten_on_white(img: &DynamicImage) -> image::RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let (w, h) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ResizeSpec;
    use image::{ImageFormat, RgbImage};

    fn sample(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x * y) % 256) as u8])
        }))
    }

    fn sample_png(w: u32, h: u32) -> Bytes {
        let mut buf = Cursor::new(Vec::new());
        sample(w, h).write_to(&mut buf, ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    fn flat(w: u32, h: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([40, 90, 200]))))
    }

    fn request(format: ImageEncoding, lossless: bool, resize: Option<ResizeSpec>) -> EncodeRequest {
        EncodeRequest {
            format,
            lossless,
            resize,
            original_size: 0,
            fallback: None,
        }
    }

    #[test]
    fn lossy_quality_is_lower_than_lossless() {
        for format in [ImageEncoding::Jpeg, ImageEncoding::Webp, ImageEncoding::Avif] {
            let lossless = baseline_params(format, true).quality.unwrap();
            let lossy = baseline_params(format, false).quality.unwrap();
            assert!(lossy < lossless, "{format}: {lossy} !< {lossless}");
        }
    }

    #[tokio::test]
    async fn encodes_jpeg_with_table_quality() {
        let out = BaselineEncoder
            .encode(sample_png(64, 48), &request(ImageEncoding::Jpeg, false, None))
            .await
            .unwrap();
        assert_eq!(out.quality_used, Some(80));
        assert_eq!(out.format, None);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn percent_resize_applies_clamped_scale() {
        let out = BaselineEncoder
            .encode(
                sample_png(100, 80),
                &request(ImageEncoding::Png, true, Some(ResizeSpec::Percent(20))),
            )
            .await
            .unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (50, 40));
    }

    #[tokio::test]
    async fn webp_output_is_webp() {
        let out = BaselineEncoder
            .encode(sample_png(32, 32), &request(ImageEncoding::Webp, false, None))
            .await
            .unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::WebP);
        assert_eq!(image::load_from_memory(&out.bytes).unwrap().dimensions(), (32, 32));
    }

    #[test]
    fn lossy_webp_differs_from_lossless() {
        let img = sample(96, 96);
        let lossy = BaselineEncoder::encode_image(&img, ImageEncoding::Webp, false).unwrap();
        let lossless = BaselineEncoder::encode_image(&img, ImageEncoding::Webp, true).unwrap();

        assert_eq!(lossy.quality_used, Some(80));
        assert_eq!(lossless.quality_used, Some(100));
        assert!(lossy.quality_used < lossless.quality_used);
        assert_ne!(lossy.bytes, lossless.bytes);
    }

    #[test]
    fn lossy_webp_with_alpha_keeps_more_quality() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(16, 16, |x, _| {
            Rgba([200, 30, 30, if x < 8 { 0 } else { 255 }])
        }));
        let out = BaselineEncoder::encode_image(&img, ImageEncoding::Webp, false).unwrap();
        assert_eq!(out.quality_used, Some(WEBP_ALPHA_QUALITY));
    }

    #[tokio::test]
    async fn pixels_are_encoded_without_a_decode() {
        let out = BaselineEncoder
            .encode_pixels(flat(40, 20), &request(ImageEncoding::Png, false, Some(ResizeSpec::Percent(50))))
            .await
            .unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn grown_output_switches_to_smaller_fallback() {
        // A flat frame is a few hundred bytes as JPEG but tiny as PNG.
        let req = EncodeRequest {
            original_size: 1,
            fallback: Some(ImageEncoding::Png),
            ..request(ImageEncoding::Jpeg, false, None)
        };
        let out = BaselineEncoder.encode_pixels(flat(64, 64), &req).await.unwrap();
        assert_eq!(out.format, Some(ImageEncoding::Png));
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn larger_fallback_is_discarded() {
        let req = EncodeRequest {
            original_size: 1,
            fallback: Some(ImageEncoding::Jpeg),
            ..request(ImageEncoding::Png, false, None)
        };
        let out = BaselineEncoder.encode_pixels(flat(64, 64), &req).await.unwrap();
        assert_eq!(out.format, None);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn fallback_is_skipped_when_output_did_not_grow() {
        let req = EncodeRequest {
            original_size: 10 * 1024 * 1024,
            fallback: Some(ImageEncoding::Png),
            ..request(ImageEncoding::Jpeg, false, None)
        };
        let out = BaselineEncoder.encode_pixels(flat(64, 64), &req).await.unwrap();
        assert_eq!(out.format, None);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn undecodable_input_is_encode_error() {
        let err = BaselineEncoder
            .encode(
                Bytes::from_static(b"definitely not an image"),
                &request(ImageEncoding::Jpeg, false, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, rf_core::Error::Encode { .. }));
    }

    #[test]
    fn flatten_paints_transparent_pixels_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        let flat = flatten_on_white(&img);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
    }
}

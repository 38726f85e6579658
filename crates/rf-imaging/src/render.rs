//! Pixel work for one target: crop, resample, sharpen, or letterbox.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rf_core::Dimensions;

use crate::crop::{CropPlan, CropStrategy};

/// Unsharp mask applied after downscaling.
const SHARPEN_SIGMA: f32 = 0.5;
const SHARPEN_THRESHOLD: i32 = 1;

/// Produce the target frame described by `plan`.
///
/// The output is always exactly `plan.target`.
pub fn render(img: &DynamicImage, plan: &CropPlan) -> DynamicImage {
    let target = plan.target;
    if target.is_empty() {
        return img.clone();
    }

    if plan.strategy == CropStrategy::Letterbox {
        return letterbox(img, target);
    }

    let w = plan.window;
    let cropped = img.crop_imm(w.x, w.y, w.width, w.height);
    let resized = if cropped.dimensions() == (target.width, target.height) {
        cropped
    } else {
        cropped.resize_exact(target.width, target.height, FilterType::Lanczos3)
    };
    resized.unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}

/// Scale to fit inside `target` and center on a white canvas.
fn letterbox(img: &DynamicImage, target: Dimensions) -> DynamicImage {
    let fitted = img.resize(target.width, target.height, FilterType::Lanczos3);
    let (fw, fh) = fitted.dimensions();
    let mut canvas = RgbaImage::from_pixel(target.width, target.height, Rgba([255, 255, 255, 255]));
    let x = (target.width.saturating_sub(fw) / 2) as i64;
    let y = (target.height.saturating_sub(fh) / 2) as i64;
    image::imageops::overlay(&mut canvas, &fitted.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

/// Flat mid-gray frame, used as a stand-in when a video cannot be produced.
pub fn placeholder(dimensions: Dimensions) -> DynamicImage {
    let w = dimensions.width.max(1);
    let h = dimensions.height.max(1);
    DynamicImage::ImageRgb8(image::RgbImage::from_pixel(w, h, image::Rgb([128, 128, 128])))
}

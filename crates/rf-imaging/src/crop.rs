//! Crop resolution for a target aspect ratio.
//!
//! The window is always the largest rectangle of the target aspect ratio
//! that fits the source ("zoom to fill"), so one axis is fixed and the
//! other is free. The free axis is positioned by, in order of preference:
//!
//! 1. the subject hint's bounding-box midpoint (or focal point),
//! 2. the attention map, when the caller computed one from the pixels,
//! 3. the center of the source.
//!
//! Resolution cannot fail. The returned window always lies inside the source.

use image::{DynamicImage, GenericImageView};
use rf_core::{CropWindow, Dimensions, Fit};
use serde::{Deserialize, Serialize};

use crate::analysis::SubjectHint;

/// How a crop window was positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropStrategy {
    Subject,
    Attention,
    Center,
    /// The whole source, padded to the target frame.
    Letterbox,
}

impl std::fmt::Display for CropStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subject => write!(f, "subject"),
            Self::Attention => write!(f, "attention"),
            Self::Center => write!(f, "center"),
            Self::Letterbox => write!(f, "letterbox"),
        }
    }
}

/// A resolved crop: which part of the source becomes the target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    pub window: CropWindow,
    pub target: Dimensions,
    pub strategy: CropStrategy,
}

// ---------------------------------------------------------------------------
// AttentionMap
// ---------------------------------------------------------------------------

/// Gradient energy of an image summed per column and per row.
///
/// Computed on a thumbnail, so the profiles are shorter than the source
/// axes; [`AttentionMap::best_offset`] rescales.
#[derive(Debug, Clone)]
pub struct AttentionMap {
    columns: Vec<f64>,
    rows: Vec<f64>,
}

impl AttentionMap {
    /// Longest edge of the thumbnail the energy is measured on.
    const MAX_EDGE: u32 = 256;

    /// Measure an image. Returns `None` for tiny or perfectly flat images,
    /// where there is nothing to aim at.
    pub fn from_image(img: &DynamicImage) -> Option<Self> {
        let (w, h) = img.dimensions();
        if w < 3 || h < 3 {
            return None;
        }
        let small = if w.max(h) > Self::MAX_EDGE {
            img.thumbnail(Self::MAX_EDGE, Self::MAX_EDGE)
        } else {
            img.clone()
        };
        let luma = small.to_luma8();
        let (sw, sh) = luma.dimensions();

        let mut columns = vec![0.0; sw as usize];
        let mut rows = vec![0.0; sh as usize];
        let px = |x: u32, y: u32| luma.get_pixel(x, y).0[0] as f64;

        for y in 1..sh.saturating_sub(1) {
            for x in 1..sw.saturating_sub(1) {
                let energy = (px(x + 1, y) - px(x - 1, y)).abs() + (px(x, y + 1) - px(x, y - 1)).abs();
                columns[x as usize] += energy;
                rows[y as usize] += energy;
            }
        }

        if columns.iter().sum::<f64>() <= f64::EPSILON {
            return None;
        }
        Some(Self { columns, rows })
    }

    /// Sum maps measured on frames of one source. Maps measured at a
    /// different thumbnail size than the first are skipped.
    pub fn merge(maps: impl IntoIterator<Item = AttentionMap>) -> Option<Self> {
        let mut maps = maps.into_iter();
        let mut merged = maps.next()?;
        for map in maps {
            if map.columns.len() != merged.columns.len() || map.rows.len() != merged.rows.len() {
                continue;
            }
            for (sum, v) in merged.columns.iter_mut().zip(&map.columns) {
                *sum += v;
            }
            for (sum, v) in merged.rows.iter_mut().zip(&map.rows) {
                *sum += v;
            }
        }
        Some(merged)
    }

    /// Offset (in source pixels) of the window of `window_len` along an axis
    /// of `source_len` that holds the most energy. Ties go to the offset
    /// nearest the center.
    fn best_offset(profile: &[f64], source_len: u32, window_len: u32) -> Option<u32> {
        let n = profile.len();
        if n == 0 || source_len == 0 || window_len >= source_len {
            return None;
        }
        let scale = n as f64 / source_len as f64;
        let win = ((window_len as f64 * scale).round() as usize).clamp(1, n);
        if win >= n {
            return None;
        }

        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0);
        for v in profile {
            prefix.push(prefix[prefix.len() - 1] + v);
        }

        let center = (n - win) as f64 / 2.0;
        let mut best = 0usize;
        let mut best_sum = f64::MIN;
        for start in 0..=(n - win) {
            let sum = prefix[start + win] - prefix[start];
            let closer = (start as f64 - center).abs() < (best as f64 - center).abs();
            if sum > best_sum + 1e-9 || ((sum - best_sum).abs() <= 1e-9 && closer) {
                best = start;
                best_sum = sum;
            }
        }

        let offset = (best as f64 / scale).round() as u32;
        Some(offset.min(source_len - window_len))
    }
}

// ---------------------------------------------------------------------------
// CropResolver
// ---------------------------------------------------------------------------

/// Resolves crop windows against one source image or video frame.
#[derive(Debug, Clone)]
pub struct CropResolver<'a> {
    source: Dimensions,
    attention: Option<&'a AttentionMap>,
}

impl<'a> CropResolver<'a> {
    pub fn new(source: Dimensions) -> Self {
        Self {
            source,
            attention: None,
        }
    }

    /// Use pixel energy when no subject hint is available.
    pub fn with_attention(mut self, attention: Option<&'a AttentionMap>) -> Self {
        self.attention = attention;
        self
    }

    pub fn resolve(&self, target: Dimensions, hint: Option<&SubjectHint>, fit: Fit) -> CropPlan {
        let source = Dimensions::new(self.source.width.max(1), self.source.height.max(1));
        let full = CropWindow {
            x: 0,
            y: 0,
            width: source.width,
            height: source.height,
        };

        if fit == Fit::Contain {
            return CropPlan {
                window: full,
                target,
                strategy: CropStrategy::Letterbox,
            };
        }
        if target.is_empty() {
            return CropPlan {
                window: full,
                target,
                strategy: CropStrategy::Center,
            };
        }

        let (width, height) = window_size(source, target);

        if let Some((cx, cy)) = hint.and_then(subject_center) {
            let x = place(cx / 100.0 * source.width as f64, width, source.width);
            let y = place(cy / 100.0 * source.height as f64, height, source.height);
            return CropPlan {
                window: CropWindow { x, y, width, height },
                target,
                strategy: CropStrategy::Subject,
            };
        }

        if let Some(map) = self.attention {
            let x = AttentionMap::best_offset(&map.columns, source.width, width);
            let y = AttentionMap::best_offset(&map.rows, source.height, height);
            if x.is_some() || y.is_some() {
                return CropPlan {
                    window: CropWindow {
                        x: x.unwrap_or((source.width - width) / 2),
                        y: y.unwrap_or((source.height - height) / 2),
                        width,
                        height,
                    },
                    target,
                    strategy: CropStrategy::Attention,
                };
            }
        }

        CropPlan {
            window: CropWindow {
                x: (source.width - width) / 2,
                y: (source.height - height) / 2,
                width,
                height,
            },
            target,
            strategy: CropStrategy::Center,
        }
    }
}

/// Largest window of the target's aspect ratio inside `source`.
fn window_size(source: Dimensions, target: Dimensions) -> (u32, u32) {
    let target_ratio = target.ratio();
    if target_ratio > source.ratio() {
        let h = (source.width as f64 / target_ratio).round() as u32;
        (source.width, h.clamp(1, source.height))
    } else {
        let w = (source.height as f64 * target_ratio).round() as u32;
        (w.clamp(1, source.width), source.height)
    }
}

/// Offset that centers a window of `len` on `center`, clamped to the axis.
fn place(center: f64, len: u32, axis: u32) -> u32 {
    let max = axis.saturating_sub(len) as f64;
    (center - len as f64 / 2.0).round().clamp(0.0, max) as u32
}

fn subject_center(hint: &SubjectHint) -> Option<(f64, f64)> {
    if let Some(bbox) = hint.usable_box() {
        return Some(bbox.center());
    }
    hint.focal_point
        .filter(|p| (0.0..=100.0).contains(&p.x) && (0.0..=100.0).contains(&p.y))
        .map(|p| (p.x, p.y))
}

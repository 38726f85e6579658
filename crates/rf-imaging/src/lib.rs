//! # rf-imaging
//!
//! Image-side capabilities of the job engine.
//!
//! - **Optimizer fallback chain** ([`OptimizerChain`]) tries the external
//!   advanced optimizer under a deadline, then falls back to the built-in
//!   [`BaselineEncoder`], and reports which tier produced the artifact.
//! - **Subject analysis** ([`analysis`]) asks a vision service for a
//!   bounding box. Every failure degrades to "no hint".
//! - **Crop resolution** ([`CropResolver`]) turns target dimensions plus an
//!   optional hint into an in-bounds crop window.
//! - **Rendering** ([`render`]) applies a crop plan to decoded pixels.

pub mod analysis;
pub mod crop;
pub mod optimizer;
pub mod render;

pub use analysis::{
    analyze_subject, BoundingBox, FocalPoint, HttpVisionAnalyzer, NoopAnalyzer, SubjectAnalyzer,
    SubjectHint,
};
pub use crop::{AttentionMap, CropPlan, CropResolver, CropStrategy};
pub use optimizer::{
    BaselineEncoder, EncodeRequest, Encoded, Encoder, ExternalOptimizer, OptimizationOutcome,
    OptimizeRequest, OptimizerChain, ResizeSpec, SourceImage, Tier, TierKind, TierUsed,
};

//! Focus quality measurement
//!
//! Crops are normalized to a fixed canvas so scale and exposure drop out, then
//! scored by Laplacian variance after multi-frame averaging.

pub mod normalize;
pub mod sharpness;

pub use normalize::{clahe, resize_area, to_gray, CropNormalizer, NormalizedCrop};
pub use sharpness::{laplacian_score, FrameScorer, SharpnessProbe};

//! Laplacian-variance sharpness scoring

use super::normalize::{CropNormalizer, NormalizedCrop};
use crate::config::ScoringConfig;
use crate::device::FrameSource;
use crate::errors::FocusError;
use crate::types::BoundingBox;
use image::{ImageBuffer, Luma};
use imageproc::filter::filter3x3;
use std::sync::Arc;
use std::time::Duration;

const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Scores the current focus position over a region.
pub trait SharpnessProbe: Send + Sync {
    /// Focus quality in `[0, 1]` from `frames` fresh frames.
    fn score(&self, bbox: &BoundingBox, frames: u32) -> Result<f64, FocusError>;
}

/// Score an averaged crop: requantize to 8 bits, take the variance of the
/// Laplacian response and map it through the calibration divisor.
pub fn laplacian_score(crop: &NormalizedCrop, divisor: f64) -> f64 {
    let (w, h) = crop.dimensions();
    let quantized: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_fn(w, h, |x, y| {
        let v = crop.get_pixel(x, y)[0];
        // truncation, like a float-to-u8 cast of the scaled crop
        Luma([(v * 255.0).clamp(0.0, 255.0).floor()])
    });

    if w == 0 || h == 0 {
        return 0.0;
    }
    // filter3x3 replicates the border; the divisor was calibrated against a
    // reflect-101 border, so filter a padded copy and keep the interior
    let filtered: ImageBuffer<Luma<f32>, Vec<f32>> =
        filter3x3(&pad_reflect101(&quantized), &LAPLACIAN);
    let response: Vec<f32> = (1..=h)
        .flat_map(|y| (1..=w).map(move |x| (x, y)))
        .map(|(x, y)| filtered.get_pixel(x, y)[0])
        .collect();
    let n = response.len() as f64;
    let mean = response.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = response
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    let score = variance / divisor;
    let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };

    crate::assert_invariant!(
        (0.0..=1.0).contains(&score),
        "Sharpness score must lie in [0, 1]",
        "laplacian_score"
    );
    score
}

/// Copy of `image` with a 1 px border mirrored about the edge pixel
/// (`dcb|abcd|cba` without repeating the edge).
pub fn pad_reflect101(image: &NormalizedCrop) -> NormalizedCrop {
    let (w, h) = image.dimensions();
    let reflect = |i: i64, n: u32| -> u32 {
        let last = n as i64 - 1;
        let r = if i < 0 { -i } else if i > last { 2 * last - i } else { i };
        r.clamp(0, last.max(0)) as u32
    };
    ImageBuffer::from_fn(w + 2, h + 2, |x, y| {
        *image.get_pixel(reflect(x as i64 - 1, w), reflect(y as i64 - 1, h))
    })
}

/// Pixel-wise mean of equally sized crops.
pub fn average_crops(crops: &[NormalizedCrop]) -> Option<NormalizedCrop> {
    let first = crops.first()?;
    let (w, h) = first.dimensions();
    let mut acc = vec![0f32; (w * h) as usize];
    for crop in crops {
        for (a, v) in acc.iter_mut().zip(crop.as_raw()) {
            *a += v;
        }
    }
    let n = crops.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    ImageBuffer::from_raw(w, h, acc)
}

/// Multi-frame scorer over a shared frame source.
///
/// Frames are normalized and averaged before the Laplacian is taken, so
/// flicker and sensor noise cancel instead of inflating the edge response.
pub struct FrameScorer {
    source: Arc<dyn FrameSource>,
    normalizer: CropNormalizer,
    divisor: f64,
    frame_delay: Duration,
}

impl FrameScorer {
    pub fn new(source: Arc<dyn FrameSource>, config: &ScoringConfig) -> Self {
        Self {
            source,
            normalizer: CropNormalizer::from_config(config),
            divisor: config.laplacian_divisor,
            frame_delay: Duration::from_millis(config.frame_delay_ms),
        }
    }

    pub fn normalizer(&self) -> &CropNormalizer {
        &self.normalizer
    }
}

impl SharpnessProbe for FrameScorer {
    fn score(&self, bbox: &BoundingBox, frames: u32) -> Result<f64, FocusError> {
        let frames = frames.max(1);
        let mut crops = Vec::with_capacity(frames as usize);
        for _ in 0..frames {
            let frame = self.source.capture()?;
            crops.push(self.normalizer.normalize(&frame.image, bbox));
            if !self.frame_delay.is_zero() {
                std::thread::sleep(self.frame_delay);
            }
        }

        let averaged = average_crops(&crops)
            .ok_or_else(|| FocusError::CaptureFailed("no frames to score".to_string()))?;
        Ok(laplacian_score(&averaged, self.divisor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop_from(f: impl Fn(u32, u32) -> f32) -> NormalizedCrop {
        NormalizedCrop::from_fn(64, 32, |x, y| Luma([f(x, y)]))
    }

    #[test]
    fn test_flat_crops_score_zero() {
        assert_eq!(laplacian_score(&crop_from(|_, _| 0.0), 25000.0), 0.0);
        assert_eq!(laplacian_score(&crop_from(|_, _| 1.0), 25000.0), 0.0);
    }

    #[test]
    fn test_checkerboard_saturates() {
        let board = crop_from(|x, y| ((x + y) % 2) as f32);
        assert_eq!(laplacian_score(&board, 25000.0), 1.0);
    }

    #[test]
    fn test_sharper_scores_higher() {
        let sharp = crop_from(|x, _| if (x / 4) % 2 == 0 { 0.1 } else { 0.9 });
        let soft = crop_from(|x, _| 0.5 + 0.2 * ((x as f32) * std::f32::consts::PI / 4.0).sin());
        assert!(laplacian_score(&sharp, 25000.0) > laplacian_score(&soft, 25000.0));
    }

    #[test]
    fn test_degenerate_divisor_stays_bounded() {
        let board = crop_from(|x, y| ((x + y) % 2) as f32);
        assert_eq!(laplacian_score(&board, 0.0), 0.0);
        assert_eq!(laplacian_score(&board, -1.0), 0.0);
    }

    #[test]
    fn test_reflect101_padding() {
        let ramp = NormalizedCrop::from_fn(3, 2, |x, y| Luma([(x + 10 * y) as f32]));
        let padded = pad_reflect101(&ramp);
        assert_eq!(padded.dimensions(), (5, 4));
        let row = |y: u32| (0..5).map(|x| padded.get_pixel(x, y)[0]).collect::<Vec<_>>();
        assert_eq!(row(0), vec![11.0, 10.0, 11.0, 12.0, 11.0]);
        assert_eq!(row(1), vec![1.0, 0.0, 1.0, 2.0, 1.0]);
        assert_eq!(row(3), vec![1.0, 0.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_corner_response_uses_mirrored_border() {
        // a lone bright corner: -1020 at the corner, 255 at its two neighbours
        let corner = NormalizedCrop::from_fn(4, 4, |x, y| Luma([if x + y == 0 { 1.0 } else { 0.0 }]));
        let score = laplacian_score(&corner, 1e6);
        assert!((score - 72137.109375 / 1e6).abs() < 1e-9, "score = {}", score);
    }

    #[test]
    fn test_average_crops() {
        let a = crop_from(|_, _| 0.2);
        let b = crop_from(|_, _| 0.6);
        let avg = average_crops(&[a, b]).unwrap();
        assert!((avg.get_pixel(5, 5)[0] - 0.4).abs() < 1e-6);
        assert!(average_crops(&[]).is_none());
    }
}

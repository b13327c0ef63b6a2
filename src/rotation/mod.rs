//! Grid rotation estimation and deskew
//!
//! A regular pixel grid concentrates spectral energy along the directions
//! perpendicular to its lines. Integrating the log spectrum over an annulus
//! into one-degree angular bins turns that into a peak in a 180-bin profile,
//! robust to the ridge being broad instead of point-like.

pub mod deskew;
pub mod spectrum;

pub use deskew::{deskew, needs_deskew};
pub use spectrum::{hann, spectrum_region, LogSpectrum};

use crate::config::RotationConfig;
use image::RgbImage;

#[derive(Debug, Clone, Default)]
pub struct RotationEstimator {
    config: RotationConfig,
}

impl RotationEstimator {
    pub fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn spectrum(&self, frame: &RgbImage, cx: u32, cy: u32) -> LogSpectrum {
        LogSpectrum::compute(frame, cx, cy, self.config.crop_size)
    }

    /// Grid angle in degrees within `[-45, 45]`, or `None` when the crop
    /// around `(cx, cy)` shows no dominant orientation.
    pub fn estimate(&self, frame: &RgbImage, cx: u32, cy: u32) -> Option<f64> {
        self.estimate_from_spectrum(&self.spectrum(frame, cx, cy))
    }

    pub fn estimate_from_spectrum(&self, spectrum: &LogSpectrum) -> Option<f64> {
        let profile = self.angular_profile(spectrum)?;
        let smoothed = moving_average(&profile, self.config.smoothing);

        let (peak_bin, peak) = smoothed
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        let n = smoothed.len() as f64;
        let mean = smoothed.iter().sum::<f64>() / n;
        let std = (smoothed.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();

        if std <= 0.0 || peak - mean < self.config.prominence_sigma * std {
            log::debug!("no prominent spectral peak (peak {:.3}, mean {:.3}, std {:.3})", peak, mean, std);
            return None;
        }
        if peak - mean < self.config.min_peak_contrast {
            log::debug!("spectral peak too shallow ({:.3} above mean)", peak - mean);
            return None;
        }

        let bin_width = 180.0 / smoothed.len() as f64;
        let peak_angle = (peak_bin as f64 + 0.5) * bin_width;
        Some(fold_grid_angle(peak_angle + 90.0))
    }

    /// Mean annulus magnitude per angular bin over `[0, 180)` degrees.
    pub fn angular_profile(&self, spectrum: &LogSpectrum) -> Option<Vec<f64>> {
        let side = spectrum.side();
        let bins = self.config.bins.max(1);
        let center = (side / 2) as f64;
        let bin_width = 180.0 / bins as f64;

        let mut energy = vec![0f64; bins];
        let mut counts = vec![0u32; bins];
        for y in 0..side {
            let dy = y as f64 - center;
            for x in 0..side {
                let dx = x as f64 - center;
                let r = (dx * dx + dy * dy).sqrt();
                if r < self.config.min_radius || r > self.config.max_radius {
                    continue;
                }
                let angle = dy.atan2(dx).to_degrees().rem_euclid(180.0);
                let bin = ((angle / bin_width) as usize).min(bins - 1);
                energy[bin] += spectrum.at(x, y) as f64;
                counts[bin] += 1;
            }
        }

        if counts.iter().all(|&c| c == 0) {
            return None;
        }
        Some(
            energy
                .iter()
                .zip(&counts)
                .map(|(e, &c)| e / c.max(1) as f64)
                .collect(),
        )
    }
}

/// Fold an angle into `[-45, 45]` (grid orientation is 90-degree periodic).
pub fn fold_grid_angle(angle: f64) -> f64 {
    let angle = angle.rem_euclid(180.0);
    if angle > 135.0 {
        angle - 180.0
    } else if angle > 45.0 {
        angle - 90.0
    } else {
        angle
    }
}

/// Box filter with zero padding; output has the input's length.
pub fn moving_average(values: &[f64], width: usize) -> Vec<f64> {
    let width = width.max(1);
    let offset = (width - 1) / 2;
    (0..values.len())
        .map(|i| {
            (0..width)
                .filter_map(|t| (i + offset).checked_sub(t))
                .filter_map(|j| values.get(j))
                .sum::<f64>()
                / width as f64
        })
        .collect()
}

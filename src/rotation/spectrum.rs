//! Log-magnitude spectrum of a windowed square crop

use crate::quality::to_gray;
use crate::types::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

const BAND_COLOR: Rgb<u8> = Rgb([0, 128, 128]);
const ANGLE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);

/// Centered (`fftshift`-ed) `log(1 + |F|)` of a `side` x `side` crop.
#[derive(Debug, Clone)]
pub struct LogSpectrum {
    side: usize,
    magnitude: Vec<f32>,
    /// Crop the spectrum was taken from
    pub region: BoundingBox,
}

/// Symmetric Hann window of length `n`.
pub fn hann(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Square crop of side `min(size, fw, fh)` centered on `(cx, cy)`, clamped
/// into the frame.
pub fn spectrum_region(frame_w: u32, frame_h: u32, cx: u32, cy: u32, size: u32) -> BoundingBox {
    let side = size.min(frame_w).min(frame_h);
    BoundingBox::centered_square(cx as i64, cy as i64, side, frame_w, frame_h)
}

fn transpose(data: &[Complex<f32>], side: usize) -> Vec<Complex<f32>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..side {
        for x in 0..side {
            out[x * side + y] = data[y * side + x];
        }
    }
    out
}

impl LogSpectrum {
    /// Spectrum of the crop around `(cx, cy)`. The crop mean is removed and a
    /// separable Hann window applied before the transform.
    pub fn compute(frame: &RgbImage, cx: u32, cy: u32, size: u32) -> Self {
        let (fw, fh) = frame.dimensions();
        let region = spectrum_region(fw, fh, cx, cy, size);
        let side = region.w.min(region.h) as usize;
        let region = BoundingBox::new(region.x, region.y, side as u32, side as u32);
        if side == 0 {
            return Self {
                side,
                magnitude: Vec::new(),
                region,
            };
        }

        let gray = to_gray(frame, &region);
        let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / (side * side) as f64;
        let window = hann(side);

        let mut data: Vec<Complex<f32>> = gray
            .enumerate_pixels()
            .map(|(x, y, p)| {
                let w = window[x as usize] * window[y as usize];
                Complex::new((p[0] as f64 - mean) as f32 * w, 0.0)
            })
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(side);
        fft.process(&mut data);
        let mut columns = transpose(&data, side);
        fft.process(&mut columns);
        let data = transpose(&columns, side);

        let shift = side - side / 2;
        let mut magnitude = vec![0f32; side * side];
        for y in 0..side {
            let sy = (y + shift) % side;
            for x in 0..side {
                let sx = (x + shift) % side;
                magnitude[y * side + x] = data[sy * side + sx].norm().ln_1p();
            }
        }

        Self {
            side,
            magnitude,
            region,
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Magnitude at shifted coordinates (zero frequency at `side / 2`).
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.magnitude[y * self.side + x]
    }

    pub fn max(&self) -> f32 {
        self.magnitude.iter().copied().fold(0.0, f32::max)
    }

    /// Green-on-black rendering with the annulus bounds and, when known, the
    /// spectral axis belonging to `grid_angle_deg`.
    pub fn render(&self, min_radius: f32, max_radius: f32, grid_angle_deg: Option<f64>) -> RgbImage {
        let side = self.side as u32;
        let max = self.max();
        let mut img = RgbImage::from_fn(side, side, |x, y| {
            let g = if max > 0.0 {
                (self.at(x as usize, y as usize) / max * 255.0) as u8
            } else {
                0
            };
            Rgb([0, g, 0])
        });
        if side == 0 {
            return img;
        }

        let c = (side / 2) as i32;
        draw_hollow_circle_mut(&mut img, (c, c), min_radius as i32, BAND_COLOR);
        draw_hollow_circle_mut(&mut img, (c, c), max_radius as i32, BAND_COLOR);

        if let Some(angle) = grid_angle_deg {
            // spectral energy runs perpendicular to the grid lines
            let rad = (angle - 90.0).to_radians();
            let dx = (90.0 * rad.cos()).trunc() as f32;
            let dy = (90.0 * rad.sin()).trunc() as f32;
            let cf = c as f32;
            draw_line_segment_mut(&mut img, (cf - dx, cf - dy), (cf + dx, cf + dy), ANGLE_COLOR);
        }
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_is_symmetric() {
        let w = hann(200);
        assert_eq!(w.len(), 200);
        assert!(w[0].abs() < 1e-6);
        assert!(w[199].abs() < 1e-6);
        assert!((w[10] - w[189]).abs() < 1e-5);
        assert!(w[100] > 0.99);
    }

    #[test]
    fn test_region_clamps_to_frame() {
        assert_eq!(spectrum_region(640, 480, 5, 5, 200), BoundingBox::new(0, 0, 200, 200));
        assert_eq!(spectrum_region(640, 480, 639, 479, 200), BoundingBox::new(440, 280, 200, 200));
        assert_eq!(spectrum_region(150, 120, 75, 60, 200), BoundingBox::new(15, 0, 120, 120));
    }

    #[test]
    fn test_flat_crop_has_empty_spectrum() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]));
        let spectrum = LogSpectrum::compute(&frame, 160, 120, 200);
        assert_eq!(spectrum.side(), 200);
        assert_eq!(spectrum.max(), 0.0);
    }

    #[test]
    fn test_render_annotations() {
        let frame = RgbImage::from_fn(320, 240, |x, _| {
            let v = if (x / 4) % 2 == 0 { 40 } else { 200 };
            Rgb([v, v, v])
        });
        let spectrum = LogSpectrum::compute(&frame, 160, 120, 200);
        let img = spectrum.render(15.0, 80.0, Some(0.0));
        assert_eq!(img.dimensions(), (200, 200));
        // vertical line through the center for a 0 degree grid
        assert_eq!(*img.get_pixel(100, 30), ANGLE_COLOR);
        // outer annulus crosses the horizontal axis 80 px right of center
        assert_eq!(*img.get_pixel(180, 100), BAND_COLOR);
    }
}

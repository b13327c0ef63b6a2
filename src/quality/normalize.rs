//! Crop normalization: luma, area resize, tiled contrast-limited equalization

use crate::config::ScoringConfig;
use crate::types::BoundingBox;
use image::{GrayImage, ImageBuffer, Luma, RgbImage};

/// Single-channel crop with values in `[0, 1]` at the scoring canvas size
pub type NormalizedCrop = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone)]
pub struct CropNormalizer {
    canvas: (u32, u32),
    clip_limit: f64,
    tiles: (u32, u32),
}

impl Default for CropNormalizer {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl CropNormalizer {
    pub fn new(canvas: (u32, u32), clip_limit: f64, tiles: (u32, u32)) -> Self {
        Self {
            canvas: (canvas.0.max(1), canvas.1.max(1)),
            clip_limit,
            tiles: (tiles.0.max(1), tiles.1.max(1)),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            (config.canvas[0], config.canvas[1]),
            config.clahe_clip_limit,
            (config.clahe_tiles[0], config.clahe_tiles[1]),
        )
    }

    pub fn canvas(&self) -> (u32, u32) {
        self.canvas
    }

    /// Crop `bbox` out of `frame` and bring it to the canvas.
    ///
    /// The box is intersected with the frame first; an empty intersection
    /// yields an all-zero canvas.
    pub fn normalize(&self, frame: &RgbImage, bbox: &BoundingBox) -> NormalizedCrop {
        let (cw, ch) = self.canvas;
        let (fw, fh) = frame.dimensions();
        let x = bbox.x.min(fw);
        let y = bbox.y.min(fh);
        let w = bbox.w.min(fw - x);
        let h = bbox.h.min(fh - y);

        let crop = if w == 0 || h == 0 {
            log::warn!("crop {} lies outside the {}x{} frame", bbox, fw, fh);
            NormalizedCrop::new(cw, ch)
        } else {
            let gray = to_gray(frame, &BoundingBox::new(x, y, w, h));
            let resized = resize_area(&gray, cw, ch);
            let equalized = clahe(&resized, self.clip_limit, self.tiles.0, self.tiles.1);
            NormalizedCrop::from_fn(cw, ch, |px, py| {
                Luma([equalized.get_pixel(px, py)[0] as f32 / 255.0])
            })
        };

        crate::assert_invariant!(
            crop.dimensions() == self.canvas,
            "Normalized crop must match the canvas size",
            "CropNormalizer::normalize"
        );
        crop
    }
}

/// Fixed-point BT.601 luma of a region, rounded like OpenCV.
pub fn to_gray(frame: &RgbImage, region: &BoundingBox) -> GrayImage {
    GrayImage::from_fn(region.w, region.h, |x, y| {
        let p = frame.get_pixel(region.x + x, region.y + y);
        let v = (p[0] as u32 * 4899 + p[1] as u32 * 9617 + p[2] as u32 * 1868 + 8192) >> 14;
        Luma([v.min(255) as u8])
    })
}

/// Source spans contributing to each destination index, with overlap weights
/// normalized to sum to one.
fn area_weights(src: u32, dst: u32) -> Vec<Vec<(u32, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src);
            let mut taps: Vec<(u32, f32)> = (first..last.max(first + 1))
                .filter_map(|s| {
                    let overlap = (end.min(s as f64 + 1.0) - start.max(s as f64)).max(0.0);
                    (overlap > 1e-9).then_some((s.min(src - 1), overlap as f32))
                })
                .collect();
            let total: f32 = taps.iter().map(|t| t.1).sum();
            if total > 0.0 {
                taps.iter_mut().for_each(|t| t.1 /= total);
            } else {
                taps = vec![(first.min(src - 1), 1.0)];
            }
            taps
        })
        .collect()
}

/// Area-averaging resize. Each destination pixel is the overlap-weighted mean
/// of the source pixels it covers, so fine periodic detail does not alias.
pub fn resize_area(src: &GrayImage, dst_w: u32, dst_h: u32) -> GrayImage {
    let (sw, sh) = src.dimensions();
    if (sw, sh) == (dst_w, dst_h) {
        return src.clone();
    }
    let xw = area_weights(sw, dst_w);
    let yw = area_weights(sh, dst_h);

    // horizontal pass into f32 rows
    let mut rows = vec![0f32; (dst_w * sh) as usize];
    for y in 0..sh {
        for (dx, taps) in xw.iter().enumerate() {
            rows[(y * dst_w) as usize + dx] = taps
                .iter()
                .map(|&(sx, wgt)| src.get_pixel(sx, y)[0] as f32 * wgt)
                .sum();
        }
    }

    GrayImage::from_fn(dst_w, dst_h, |dx, dy| {
        let v: f32 = yw[dy as usize]
            .iter()
            .map(|&(sy, wgt)| rows[(sy * dst_w + dx) as usize] * wgt)
            .sum();
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Reflect-101 index into `0..n`.
fn reflect101(i: i64, n: i64) -> u32 {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as u32
}

/// Contrast-limited adaptive histogram equalization.
///
/// Each tile's histogram is clipped at `clip_limit * tile_area / 256`, the
/// excess is spread back over all bins, and every pixel is bilinearly
/// interpolated between the equalization maps of its four nearest tiles.
pub fn clahe(src: &GrayImage, clip_limit: f64, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let tiles_x = tiles_x.clamp(1, w);
    let tiles_y = tiles_y.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);
    let tile_area = (tile_w * tile_h) as f64;
    let limit = if clip_limit > 0.0 {
        ((clip_limit * tile_area / 256.0) as u32).max(1)
    } else {
        u32::MAX
    };
    let lut_scale = 255.0 / tile_area;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; 256];
            for y in 0..tile_h {
                for x in 0..tile_w {
                    // the image is padded by reflection when tiles overhang it
                    let sx = reflect101((tx * tile_w + x) as i64, w as i64);
                    let sy = reflect101((ty * tile_h + y) as i64, h as i64);
                    hist[src.get_pixel(sx, sy)[0] as usize] += 1;
                }
            }

            let mut clipped = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    clipped += *bin - limit;
                    *bin = limit;
                }
            }
            let batch = clipped / 256;
            let mut residual = clipped - batch * 256;
            hist.iter_mut().for_each(|bin| *bin += batch);
            if residual > 0 {
                let step = (256 / residual).max(1) as usize;
                for bin in hist.iter_mut().step_by(step) {
                    if residual == 0 {
                        break;
                    }
                    *bin += 1;
                    residual -= 1;
                }
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut sum = 0u32;
            for (i, count) in hist.iter().enumerate() {
                sum += count;
                lut[i] = (sum as f64 * lut_scale).round().min(255.0) as u8;
            }
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let split = |pos: u32, inv: f32, count: u32| {
        let f = pos as f32 * inv - 0.5;
        let lo = f.floor() as i64;
        let frac = f - lo as f32;
        let first = lo.max(0) as u32;
        let second = ((lo + 1) as u32).min(count - 1);
        (first.min(count - 1), second, frac)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = src.get_pixel(x, y)[0] as usize;
        let (tx1, tx2, xa) = split(x, inv_tw, tiles_x);
        let (ty1, ty2, ya) = split(y, inv_th, tiles_y);
        let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = at(tx1, ty1) * (1.0 - xa) + at(tx2, ty1) * xa;
        let bottom = at(tx1, ty2) * (1.0 - xa) + at(tx2, ty2) * xa;
        let res = top * (1.0 - ya) + bottom * ya;
        Luma([res.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_gray_matches_bt601() {
        let frame = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([255, 255, 255]),
        });
        let gray = to_gray(&frame, &BoundingBox::new(0, 0, 3, 1));
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
        assert_eq!(gray.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        let src = GrayImage::from_fn(4, 2, |x, _| Luma([if x % 2 == 0 { 0 } else { 200 }]));
        let dst = resize_area(&src, 2, 1);
        assert_eq!(dst.dimensions(), (2, 1));
        assert_eq!(dst.get_pixel(0, 0)[0], 100);
        assert_eq!(dst.get_pixel(1, 0)[0], 100);
    }

    #[test]
    fn test_resize_area_fractional_and_upscale() {
        let src = GrayImage::from_pixel(80, 80, Luma([90]));
        let down = resize_area(&src, 64, 32);
        assert!(down.pixels().all(|p| p[0] == 90));

        let up = resize_area(&GrayImage::from_pixel(10, 5, Luma([40])), 64, 32);
        assert_eq!(up.dimensions(), (64, 32));
        assert!(up.pixels().all(|p| p[0] == 40));
    }

    #[test]
    fn test_clahe_flat_image_stays_flat() {
        let src = GrayImage::from_pixel(64, 32, Luma([120]));
        let out = clahe(&src, 2.0, 4, 4);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let src = GrayImage::from_fn(64, 32, |x, _| Luma([100 + (x % 8) as u8]));
        let out = clahe(&src, 2.0, 4, 4);
        let (lo, hi) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        assert!(hi - lo > 7, "range {}..{} not stretched", lo, hi);
    }

    #[test]
    fn test_normalize_canvas_and_range() {
        let frame = RgbImage::from_fn(320, 240, |x, y| {
            let v = ((x / 3 + y / 3) % 2 * 200) as u8;
            Rgb([v, v, v])
        });
        let normalizer = CropNormalizer::default();
        for bbox in [
            BoundingBox::new(100, 100, 80, 80),
            BoundingBox::new(0, 0, 300, 10),
            BoundingBox::new(10, 10, 3, 200),
        ] {
            let crop = normalizer.normalize(&frame, &bbox);
            assert_eq!(crop.dimensions(), (64, 32));
            assert!(crop.pixels().all(|p| (0.0..=1.0).contains(&p[0])));
        }
    }

    #[test]
    fn test_normalize_outside_frame_is_blank() {
        let frame = RgbImage::new(100, 100);
        let crop = CropNormalizer::default().normalize(&frame, &BoundingBox::new(200, 200, 50, 50));
        assert_eq!(crop.dimensions(), (64, 32));
        assert!(crop.pixels().all(|p| p[0] == 0.0));
    }
}

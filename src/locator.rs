//! Region location by color-blob detection
//!
//! The target glows in a narrow blue hue band. Both entry points threshold the
//! frame in HSV space and dilate the mask so neighbouring sub-pixels merge into
//! one blob, then read external contours:
//!
//! - [`RegionLocator::locate_center`] picks the blob nearest the frame center
//!   and never fails (falls back to the frame center). It is good enough to
//!   seed a scoring crop while the lens is still far from focus.
//! - [`RegionLocator::locate_bbox`] takes the largest blob and checks it against
//!   the panel's size and aspect envelope. It is only trustworthy once the
//!   image is close to sharp.

use crate::config::LocatorConfig;
use crate::types::BoundingBox;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::point::Point;

/// An external blob of the dilated color mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    /// Polygon area of the traced outline
    pub area: f64,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default)]
pub struct RegionLocator {
    config: LocatorConfig,
}

impl RegionLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Center of the qualifying blob closest to the frame center, or the frame
    /// center itself when no blob qualifies.
    pub fn locate_center(&self, frame: &RgbImage) -> (u32, u32) {
        let (fw, fh) = frame.dimensions();
        let (fcx, fcy) = (fw / 2, fh / 2);

        let nearest = self
            .blobs(frame)
            .into_iter()
            .filter(|blob| blob.area >= self.config.min_center_area)
            .map(|blob| {
                let (cx, cy) = blob.bbox.center();
                let dx = cx as i64 - fcx as i64;
                let dy = cy as i64 - fcy as i64;
                (dx * dx + dy * dy, cx, cy)
            })
            .min();

        match nearest {
            Some((_, cx, cy)) => (cx, cy),
            None => {
                log::debug!("no blob above {} px², using frame center", self.config.min_center_area);
                (fcx, fcy)
            }
        }
    }

    /// Bounding box of the largest blob if it looks like the panel.
    pub fn locate_bbox(&self, frame: &RgbImage) -> Option<BoundingBox> {
        let (fw, fh) = frame.dimensions();
        let largest = self
            .blobs(frame)
            .into_iter()
            .fold(None::<Blob>, |best, blob| match best {
                Some(b) if b.area >= blob.area => Some(b),
                _ => Some(blob),
            })?;

        if largest.area < self.config.min_panel_area {
            log::debug!("largest blob too small ({:.0} px²)", largest.area);
            return None;
        }

        let frame_area = fw as f64 * fh as f64;
        if largest.bbox.area() as f64 > frame_area * self.config.max_frame_fraction {
            log::debug!("largest blob covers most of the frame, ignoring");
            return None;
        }

        let aspect = largest.bbox.aspect_ratio();
        if aspect < self.config.min_aspect || aspect > self.config.max_aspect {
            log::debug!("blob aspect {:.2} outside panel envelope", aspect);
            return None;
        }

        Some(largest.bbox)
    }

    /// True when `bbox` lies within the edge margin of any frame border.
    pub fn touches_edge(&self, bbox: &BoundingBox, frame_w: u32, frame_h: u32) -> bool {
        touches_edge(bbox, frame_w, frame_h, self.config.edge_margin)
    }

    /// External blobs of the dilated color mask. Blobs cut by the frame border
    /// are traced too.
    pub fn blobs(&self, frame: &RgbImage) -> Vec<Blob> {
        let (fw, fh) = frame.dimensions();
        let padded = pad_zero(&self.dilated_mask(frame));
        find_contours::<i32>(&padded)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| {
                let points: Vec<Point<i32>> =
                    c.points.iter().map(|p| Point::new(p.x - 1, p.y - 1)).collect();
                Blob {
                    area: polygon_area(&points),
                    bbox: bounding_rect(&points, fw, fh),
                }
            })
            .collect()
    }

    /// Thresholded and dilated color mask (255 inside the hue band).
    pub fn dilated_mask(&self, frame: &RgbImage) -> GrayImage {
        let mut mask = hsv_mask(frame, self.config.hsv_low, self.config.hsv_high);
        let radius = (self.config.dilate_kernel / 2).min(u8::MAX as u32) as u8;
        for _ in 0..self.config.dilate_iterations {
            mask = dilate(&mask, Norm::LInf, radius);
        }
        mask
    }
}

/// Centered rectangle covering 40% of each frame dimension.
pub fn center_crop_rect(frame_w: u32, frame_h: u32) -> BoundingBox {
    let cw = (frame_w as f64 * 0.4) as u32;
    let ch = (frame_h as f64 * 0.4) as u32;
    BoundingBox::new(frame_w / 2 - cw / 2, frame_h / 2 - ch / 2, cw, ch)
}

pub fn touches_edge(bbox: &BoundingBox, frame_w: u32, frame_h: u32, margin: u32) -> bool {
    bbox.x <= margin
        || bbox.y <= margin
        || bbox.right() + margin >= frame_w
        || bbox.bottom() + margin >= frame_h
}

/// OpenCV-style 8-bit HSV (H in 0..180, S and V in 0..256).
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };
    let h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round() as u8,
        v as u8,
    ]
}

/// 255 where the pixel's HSV value lies inside `[low, high]` on every channel.
pub fn hsv_mask(frame: &RgbImage, low: [u8; 3], high: [u8; 3]) -> GrayImage {
    let (w, h) = frame.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let px = frame.get_pixel(x, y);
        let hsv = rgb_to_hsv(px[0], px[1], px[2]);
        let inside = (0..3).all(|i| hsv[i] >= low[i] && hsv[i] <= high[i]);
        Luma([if inside { 255 } else { 0 }])
    })
}

/// Copy of `mask` inside a 1 px ring of background. The contour tracer never
/// follows foreground lying on the image border.
fn pad_zero(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut padded = GrayImage::new(w + 2, h + 2);
    image::imageops::replace(&mut padded, mask, 1, 1);
    padded
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Inclusive bounding rectangle of `points`, clipped to the frame.
fn bounding_rect(points: &[Point<i32>], frame_w: u32, frame_h: u32) -> BoundingBox {
    let (max_w, max_h) = (frame_w as i32 - 1, frame_h as i32 - 1);
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).clamp(0, max_w.max(0));
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(-1).min(max_w);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).clamp(0, max_h.max(0));
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(-1).min(max_h);
    BoundingBox::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1).max(0) as u32,
        (max_y - min_y + 1).max(0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const PANEL_BLUE: Rgb<u8> = Rgb([30, 60, 220]);

    fn dark_frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([12, 12, 12]))
    }

    fn paint(frame: &mut RgbImage, x: u32, y: u32, w: u32, h: u32) {
        for yy in y..y + h {
            for xx in x..x + w {
                frame.put_pixel(xx, yy, PANEL_BLUE);
            }
        }
    }

    #[test]
    fn test_hsv_conversion() {
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(40, 40, 40), [0, 0, 40]);
        let blue = rgb_to_hsv(30, 60, 220);
        assert!((90..=130).contains(&blue[0]));
    }

    #[test]
    fn test_locate_bbox_finds_panel() {
        let mut frame = dark_frame(320, 240);
        paint(&mut frame, 96, 88, 128, 64);

        let bbox = RegionLocator::default().locate_bbox(&frame).unwrap();
        assert!(bbox.x <= 96 && bbox.y <= 88);
        assert!(bbox.right() >= 224 && bbox.bottom() >= 152);
        // two 7x7 dilations grow each side by 6 px
        assert_eq!(bbox, BoundingBox::new(90, 82, 140, 76));
    }

    #[test]
    fn test_locate_bbox_rejections() {
        let locator = RegionLocator::default();

        assert!(locator.locate_bbox(&dark_frame(320, 240)).is_none());

        let mut square = dark_frame(320, 240);
        paint(&mut square, 120, 80, 70, 70);
        assert!(locator.locate_bbox(&square).is_none());

        let mut tiny = dark_frame(320, 240);
        paint(&mut tiny, 150, 110, 8, 4);
        assert!(locator.locate_bbox(&tiny).is_none());

        let mut huge = dark_frame(320, 240);
        paint(&mut huge, 10, 40, 300, 150);
        assert!(locator.locate_bbox(&huge).is_none());
    }

    #[test]
    fn test_blobs_cut_by_left_border() {
        let locator = RegionLocator::default();
        for x0 in [0, 1, 5, 10] {
            let mut frame = dark_frame(320, 240);
            paint(&mut frame, x0, 80, 140, 70);

            let blobs = locator.blobs(&frame);
            assert_eq!(blobs.len(), 1, "x0 = {}", x0);
            let left = x0.saturating_sub(6);
            assert_eq!(blobs[0].bbox, BoundingBox::new(left, 74, x0 + 146 - left, 82));
            assert!(locator.locate_bbox(&frame).is_some(), "x0 = {}", x0);
        }
    }

    #[test]
    fn test_locate_center_prefers_blob_near_middle() {
        let mut frame = dark_frame(320, 240);
        paint(&mut frame, 10, 10, 20, 20);
        paint(&mut frame, 170, 120, 20, 20);

        let (cx, cy) = RegionLocator::default().locate_center(&frame);
        assert!((170..190).contains(&cx), "cx = {}", cx);
        assert!((120..140).contains(&cy), "cy = {}", cy);
    }

    #[test]
    fn test_locate_center_falls_back_to_frame_center() {
        let frame = dark_frame(321, 241);
        assert_eq!(RegionLocator::default().locate_center(&frame), (160, 120));
    }

    #[test]
    fn test_center_crop_and_edges() {
        assert_eq!(center_crop_rect(640, 480), BoundingBox::new(192, 144, 256, 192));

        let locator = RegionLocator::default();
        assert!(locator.touches_edge(&BoundingBox::new(2, 50, 40, 20), 320, 240));
        assert!(locator.touches_edge(&BoundingBox::new(50, 50, 268, 20), 320, 240));
        assert!(!locator.touches_edge(&BoundingBox::new(3, 3, 300, 200), 320, 240));
    }
}

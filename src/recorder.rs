//! Durable record of autofocus runs
//!
//! A run hands its result, metadata and intermediate images to a
//! [`RunRecorder`] once, after the final verification. Recording is best
//! effort: the sweep logs a failed write and carries on.

use crate::config::ControlValue;
use crate::types::{BoundingBox, RunResult};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropSizes {
    pub coarse: u32,
    pub fine: u32,
    pub micro: u32,
    pub ultra: u32,
}

/// Settings the run left the camera with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSettings {
    pub focus_absolute: i32,
    pub score: f64,
    pub grid_angle_deg: Option<f64>,
    pub grid_detection_method: String,
    /// The restored calibration controls
    #[serde(flatten)]
    pub controls: BTreeMap<String, i32>,
}

/// Flat, self-describing record written next to the run's images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: uuid::Uuid,
    /// Unix seconds at run start; also the artifact file prefix
    pub timestamp: i64,
    pub settle_ms: u64,
    /// Control values in effect before the search (scrambled values, if any)
    pub initial: BTreeMap<String, i32>,
    #[serde(rename = "final")]
    pub final_settings: FinalSettings,
    pub focus_center: Point,
    pub crop_sizes: CropSizes,
    pub oled_bbox: BoundingBox,
    pub region_detected: bool,
    pub stages: Vec<String>,
    pub samples: Vec<(i32, f64)>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl RunMetadata {
    pub fn from_run(
        result: &RunResult,
        settle_ms: u64,
        initial: &[ControlValue],
        restored: &[ControlValue],
        crop_sizes: CropSizes,
    ) -> Self {
        let to_map = |values: &[ControlValue]| {
            values
                .iter()
                .map(|c| (c.name.clone(), c.value))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            run_id: result.run_id,
            timestamp: result.started_at.timestamp(),
            settle_ms,
            initial: to_map(initial),
            final_settings: FinalSettings {
                focus_absolute: result.focus,
                score: round_to(result.score, 4),
                grid_angle_deg: result.rotation_deg.map(|a| round_to(a, 2)),
                grid_detection_method: "fft".to_string(),
                controls: to_map(restored),
            },
            focus_center: Point {
                x: result.focus_center.0,
                y: result.focus_center.1,
            },
            crop_sizes,
            oled_bbox: result.region,
            region_detected: result.region_detected,
            stages: result.stages.iter().map(|s| s.to_string()).collect(),
            samples: result
                .samples
                .iter()
                .map(|s| (s.position, round_to(s.score, 4)))
                .collect(),
        }
    }
}

/// Images captured along the way
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    /// Frame before the search started
    pub pre: Option<RgbImage>,
    /// Annotated log spectrum used for rotation estimation
    pub spectrum: Option<RgbImage>,
    /// Final (deskewed) frame with the region drawn on it
    pub post: Option<RgbImage>,
    /// Final region cut out of the deskewed frame
    pub region: Option<RgbImage>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub metadata: RunMetadata,
    pub artifacts: RunArtifacts,
}

pub trait RunRecorder: Send + Sync {
    /// Persist a finished run, returning the files written.
    fn record(&self, report: &RunReport) -> Result<Vec<PathBuf>, RecordError>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl RunRecorder for NullRecorder {
    fn record(&self, _report: &RunReport) -> Result<Vec<PathBuf>, RecordError> {
        Ok(Vec::new())
    }
}

/// Writes `{timestamp}_{pre,fft,post,oled,meta}` files into one directory
#[derive(Debug, Clone)]
pub struct PhotoRecorder {
    directory: PathBuf,
    jpeg_quality: u8,
}

impl PhotoRecorder {
    pub fn new(directory: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            directory: directory.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn artifact_path(&self, timestamp: i64, suffix: &str, ext: &str) -> PathBuf {
        self.directory.join(format!("{}_{}.{}", timestamp, suffix, ext))
    }

    fn write_jpeg(&self, path: &Path, image: &RgbImage) -> Result<(), RecordError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        encoder.encode_image(image)?;
        Ok(())
    }
}

impl RunRecorder for PhotoRecorder {
    fn record(&self, report: &RunReport) -> Result<Vec<PathBuf>, RecordError> {
        fs::create_dir_all(&self.directory)?;
        let ts = report.metadata.timestamp;
        let mut written = Vec::new();

        let jpegs = [
            ("pre", &report.artifacts.pre),
            ("post", &report.artifacts.post),
            ("oled", &report.artifacts.region),
        ];
        for (suffix, image) in jpegs {
            if let Some(image) = image {
                let path = self.artifact_path(ts, suffix, "jpg");
                self.write_jpeg(&path, image)?;
                written.push(path);
            }
        }

        if let Some(spectrum) = &report.artifacts.spectrum {
            let path = self.artifact_path(ts, "fft", "png");
            spectrum.save_with_format(&path, ImageFormat::Png)?;
            written.push(path);
        }

        let meta_path = self.artifact_path(ts, "meta", "json");
        fs::write(&meta_path, serde_json::to_string_pretty(&report.metadata)?)?;
        written.push(meta_path);

        log::info!(
            "Recorded run {} ({} files in {:?})",
            report.result.run_id,
            written.len(),
            self.directory
        );
        Ok(written)
    }
}

/// Copy of `frame` with a 2 px green outline around `bbox`.
pub fn annotate_region(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let mut annotated = frame.clone();
    if bbox.is_empty() {
        return annotated;
    }
    let green = Rgb([0, 255, 0]);
    draw_hollow_rect_mut(
        &mut annotated,
        Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.w + 1, bbox.h + 1),
        green,
    );
    if bbox.w > 1 && bbox.h > 1 {
        draw_hollow_rect_mut(
            &mut annotated,
            Rect::at(bbox.x as i32 + 1, bbox.y as i32 + 1).of_size(bbox.w - 1, bbox.h - 1),
            green,
        );
    }
    annotated
}

/// The part of `frame` covered by `bbox` (clipped to the frame).
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    image::imageops::crop_imm(frame, bbox.x, bbox.y, bbox.w, bbox.h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_draws_outline() {
        let frame = RgbImage::new(50, 40);
        let annotated = annotate_region(&frame, &BoundingBox::new(10, 10, 20, 10));
        assert_eq!(*annotated.get_pixel(10, 10), Rgb([0, 255, 0]));
        assert_eq!(*annotated.get_pixel(30, 20), Rgb([0, 255, 0]));
        assert_eq!(*annotated.get_pixel(11, 15), Rgb([0, 255, 0]));
        assert_eq!(*annotated.get_pixel(20, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_crop_region() {
        let frame = RgbImage::from_fn(50, 40, |x, y| Rgb([x as u8, y as u8, 0]));
        let crop = crop_region(&frame, &BoundingBox::new(5, 6, 10, 4));
        assert_eq!(crop.dimensions(), (10, 4));
        assert_eq!(*crop.get_pixel(0, 0), Rgb([5, 6, 0]));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(-7.456, 2), -7.46);
    }
}

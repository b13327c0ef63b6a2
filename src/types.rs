//! Core data types shared by the autofocus pipeline
//!
//! Frames, regions, score samples, sweep stages and the durable run result.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device-native focus units, bounded by the configured focus range.
pub type FocusPosition = i32;

/// A captured camera frame (RGB8) with capture metadata
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: RgbImage,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl CameraFrame {
    /// Wrap an image captured right now
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Axis-aligned rectangle in frame pixel coordinates.
///
/// Boxes are immutable values: a sweep phase chooses one and replaces it
/// wholesale for the next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Square of side `size` centered on `(cx, cy)`, shifted and clipped so it
    /// lies fully inside a `frame_w` x `frame_h` frame.
    pub fn centered_square(cx: i64, cy: i64, size: u32, frame_w: u32, frame_h: u32) -> Self {
        let half = (size / 2) as i64;
        let x = (cx - half).min(frame_w as i64 - size as i64).max(0);
        let y = (cy - half).min(frame_h as i64 - size as i64).max(0);
        let w = size.min(frame_w.saturating_sub(x as u32));
        let h = size.min(frame_h.saturating_sub(y as u32));
        let bbox = Self::new(x as u32, y as u32, w, h);

        crate::assert_invariant!(
            bbox.fits_within(frame_w, frame_h),
            "Fallback square must lie inside the frame",
            "BoundingBox::centered_square"
        );
        bbox
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.w as f64 / self.h.max(1) as f64
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn fits_within(&self, frame_w: u32, frame_h: u32) -> bool {
        self.right() <= frame_w && self.bottom() <= frame_h
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} at ({},{})", self.w, self.h, self.x, self.y)
    }
}

/// One measured focus position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub position: FocusPosition,
    pub score: f64,
}

impl ScoreSample {
    pub fn new(position: FocusPosition, score: f64) -> Self {
        Self { position, score }
    }
}

impl From<(FocusPosition, f64)> for ScoreSample {
    fn from((position, score): (FocusPosition, f64)) -> Self {
        Self { position, score }
    }
}

/// Stages of one autofocus run, in execution order.
///
/// `Fine` and `Micro` can be skipped by an early bail; stages never move
/// backwards within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SweepStage {
    Scramble,
    Detect,
    Coarse,
    Fine,
    Micro,
    Ultra,
    Focus,
}

impl SweepStage {
    /// The six stages shown in a pipeline display.
    pub const DISPLAYED: [SweepStage; 6] = [
        SweepStage::Scramble,
        SweepStage::Detect,
        SweepStage::Coarse,
        SweepStage::Fine,
        SweepStage::Ultra,
        SweepStage::Focus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepStage::Scramble => "Scramble",
            SweepStage::Detect => "Detect",
            SweepStage::Coarse => "Coarse",
            SweepStage::Fine => "Fine",
            SweepStage::Micro => "Micro",
            SweepStage::Ultra => "Ultra",
            SweepStage::Focus => "Focus",
        }
    }

    /// 1-based slot in the six-stage display; Micro shares Fine's slot.
    pub fn ui_index(&self) -> u8 {
        match self {
            SweepStage::Scramble => 1,
            SweepStage::Detect => 2,
            SweepStage::Coarse => 3,
            SweepStage::Fine | SweepStage::Micro => 4,
            SweepStage::Ultra => 5,
            SweepStage::Focus => 6,
        }
    }
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable output of one autofocus run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    /// Final focus position (offset applied, clamped to the device range)
    pub focus: FocusPosition,
    /// Verification score measured at `focus` over `region`
    pub score: f64,
    /// Detected grid rotation in degrees, `None` when no periodic structure was found
    pub rotation_deg: Option<f64>,
    pub region: BoundingBox,
    /// Whether `region` came from contour detection rather than the fallback square
    pub region_detected: bool,
    pub focus_center: (u32, u32),
    pub samples: Vec<ScoreSample>,
    pub stages: Vec<SweepStage>,
}

impl RunResult {
    /// True when the run skipped both Fine and Micro.
    pub fn bailed_after_coarse(&self) -> bool {
        !self.stages.contains(&SweepStage::Fine) && !self.stages.contains(&SweepStage::Micro)
    }
}

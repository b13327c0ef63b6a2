//! Deterministic collaborators for exercising the sweep logic

use crate::device::{FocusActuator, FrameSource};
use crate::errors::FocusError;
use crate::quality::SharpnessProbe;
use crate::types::{BoundingBox, CameraFrame};
use image::RgbImage;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every control write; remembers the focus position.
#[derive(Debug, Default)]
pub struct MockLens {
    focus_control: String,
    focus: AtomicI32,
    writes: Mutex<Vec<(String, i32)>>,
}

impl MockLens {
    pub fn new(focus_control: &str) -> Self {
        Self {
            focus_control: focus_control.to_string(),
            ..Self::default()
        }
    }

    pub fn focus(&self) -> i32 {
        self.focus.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, i32)> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Focus positions in the order they were written
    pub fn focus_moves(&self) -> Vec<i32> {
        self.writes()
            .into_iter()
            .filter(|(name, _)| *name == self.focus_control)
            .map(|(_, value)| value)
            .collect()
    }
}

impl FocusActuator for MockLens {
    fn set(&self, control: &str, value: i32) {
        if control == self.focus_control {
            self.focus.store(value, Ordering::SeqCst);
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((control.to_string(), value));
        }
    }
}

type Landscape = dyn Fn(i32) -> f64 + Send + Sync;

/// Scores the lens position through a fixed function instead of images.
pub struct LandscapeProbe {
    lens: Arc<MockLens>,
    landscape: Box<Landscape>,
    calls: AtomicUsize,
}

impl LandscapeProbe {
    pub fn new<F>(lens: Arc<MockLens>, landscape: F) -> Self
    where
        F: Fn(i32) -> f64 + Send + Sync + 'static,
    {
        Self {
            lens,
            landscape: Box::new(landscape),
            calls: AtomicUsize::new(0),
        }
    }

    /// Gaussian bump of the given width around `peak`
    pub fn peaked(lens: Arc<MockLens>, peak: i32, width: f64) -> Self {
        Self::new(lens, move |p| {
            let d = (p - peak) as f64 / width;
            (-d * d).exp()
        })
    }

    pub fn flat(lens: Arc<MockLens>, level: f64) -> Self {
        Self::new(lens, move |_| level)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SharpnessProbe for LandscapeProbe {
    fn score(&self, _bbox: &BoundingBox, _frames: u32) -> Result<f64, FocusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.landscape)(self.lens.focus()).clamp(0.0, 1.0))
    }
}

/// Returns the same image on every capture.
#[derive(Debug)]
pub struct StillFrameSource {
    image: RgbImage,
    captures: AtomicU64,
}

impl StillFrameSource {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captures: AtomicU64::new(0),
        }
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

impl FrameSource for StillFrameSource {
    fn capture(&self) -> Result<CameraFrame, FocusError> {
        let sequence = self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(CameraFrame::new(self.image.clone(), sequence))
    }
}

/// Never delivers a frame.
#[derive(Debug, Default)]
pub struct DeadFrameSource;

impl FrameSource for DeadFrameSource {
    fn capture(&self) -> Result<CameraFrame, FocusError> {
        Err(FocusError::CaptureFailed("no device".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_follows_lens() {
        let lens = Arc::new(MockLens::new("focus_absolute"));
        let probe = LandscapeProbe::peaked(lens.clone(), 142, 8.0);
        let bbox = BoundingBox::new(0, 0, 10, 10);

        lens.set("focus_absolute", 142);
        assert_eq!(probe.score(&bbox, 3).unwrap(), 1.0);
        lens.set("brightness", 5);
        lens.set("focus_absolute", 0);
        assert!(probe.score(&bbox, 3).unwrap() < 1e-6);
        assert_eq!(probe.calls(), 2);
        assert_eq!(lens.focus_moves(), vec![142, 0]);
        assert_eq!(lens.writes().len(), 3);
    }
}

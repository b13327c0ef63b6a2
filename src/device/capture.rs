use super::{FrameGrabber, FrameSource};
use crate::errors::FocusError;
use crate::types::CameraFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Exclusive capture around a raw grabber.
///
/// The grabber lock is held across the whole discard-then-read sequence, so a
/// live-preview consumer sharing the same `Arc<GuardedCapture>` can never read
/// between the discards and the frame the sweep keeps.
pub struct GuardedCapture {
    grabber: Mutex<Box<dyn FrameGrabber>>,
    discard: u32,
    next_sequence: AtomicU64,
}

impl GuardedCapture {
    pub fn new(grabber: Box<dyn FrameGrabber>, discard: u32) -> Self {
        Self {
            grabber: Mutex::new(grabber),
            discard: discard.max(1),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn discard_count(&self) -> u32 {
        self.discard
    }

    /// Frames returned so far.
    pub fn frames_captured(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}

impl FrameSource for GuardedCapture {
    fn capture(&self) -> Result<CameraFrame, FocusError> {
        let mut grabber = self
            .grabber
            .lock()
            .map_err(|_| FocusError::CaptureFailed("capture lock poisoned".to_string()))?;

        for _ in 0..self.discard {
            grabber.grab()?;
        }
        let image = grabber.grab()?;
        drop(grabber);

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        log::trace!("captured frame #{} ({}x{})", sequence, image.width(), image.height());
        Ok(CameraFrame::new(image, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    struct CountingGrabber {
        reads: Arc<AtomicU32>,
        fail_after: Option<u32>,
    }

    impl FrameGrabber for CountingGrabber {
        fn grab(&mut self) -> Result<RgbImage, FocusError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(FocusError::CaptureFailed("device gone".to_string()));
            }
            Ok(RgbImage::from_pixel(4, 4, Rgb([n as u8, 0, 0])))
        }
    }

    #[test]
    fn test_discards_before_returning() {
        let reads = Arc::new(AtomicU32::new(0));
        let capture = GuardedCapture::new(
            Box::new(CountingGrabber {
                reads: reads.clone(),
                fail_after: None,
            }),
            2,
        );

        let frame = capture.capture().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert_eq!(frame.image.get_pixel(0, 0)[0], 2);
        assert_eq!(frame.sequence, 0);

        let second = capture.capture().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(capture.frames_captured(), 2);
    }

    #[test]
    fn test_at_least_one_discard() {
        let reads = Arc::new(AtomicU32::new(0));
        let capture = GuardedCapture::new(
            Box::new(CountingGrabber {
                reads: reads.clone(),
                fail_after: None,
            }),
            0,
        );
        capture.capture().unwrap();
        assert_eq!(capture.discard_count(), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_grab_failure_surfaces() {
        let capture = GuardedCapture::new(
            Box::new(CountingGrabber {
                reads: Arc::new(AtomicU32::new(0)),
                fail_after: Some(1),
            }),
            2,
        );
        match capture.capture() {
            Err(FocusError::CaptureFailed(msg)) => assert!(msg.contains("device gone")),
            other => panic!("expected capture failure, got {:?}", other.map(|f| f.sequence)),
        }
    }
}

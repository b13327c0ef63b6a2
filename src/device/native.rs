//! Real camera frames through nokhwa

use super::FrameGrabber;
use crate::errors::FocusError;
use image::RgbImage;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    CallbackCamera,
};

pub struct NokhwaGrabber {
    camera: CallbackCamera,
    index: u32,
}

impl NokhwaGrabber {
    /// Open camera `index` and start its stream
    pub fn open(index: u32) -> Result<Self, FocusError> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);

        let mut camera = CallbackCamera::new(CameraIndex::Index(index), requested, |_| {})
            .map_err(|e| FocusError::CaptureFailed(format!("Failed to open camera {}: {}", index, e)))?;

        camera
            .open_stream()
            .map_err(|e| FocusError::CaptureFailed(format!("Failed to start stream: {}", e)))?;

        log::info!("Opened native camera {}", index);
        Ok(Self { camera, index })
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl FrameGrabber for NokhwaGrabber {
    fn grab(&mut self) -> Result<RgbImage, FocusError> {
        let buffer = self
            .camera
            .poll_frame()
            .map_err(|e| FocusError::CaptureFailed(format!("Failed to capture frame: {}", e)))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| FocusError::CaptureFailed(format!("Failed to decode frame: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        RgbImage::from_raw(width, height, decoded.into_raw()).ok_or_else(|| {
            FocusError::CaptureFailed(format!("Frame buffer does not match {}x{}", width, height))
        })
    }
}

impl Drop for NokhwaGrabber {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop camera {} stream: {}", self.index, e);
        }
    }
}

//! Camera device collaborators
//!
//! The autofocus core talks to hardware through two narrow seams:
//! [`FrameSource`] delivers fresh frames, [`FocusActuator`] writes integer
//! controls. Everything behind them (V4L2, nokhwa, the simulator) is
//! interchangeable.

pub mod capture;
pub mod controls;
#[cfg(feature = "native")]
pub mod native;
pub mod v4l2;

use crate::errors::FocusError;
use crate::types::CameraFrame;
use image::RgbImage;

pub use capture::GuardedCapture;
pub use controls::{
    all_controls, find_control, preset, randomize_controls, validate_control_value, ControlGroup,
    ControlSpec, Preset,
};
#[cfg(feature = "native")]
pub use native::NokhwaGrabber;
pub use v4l2::V4l2CtlActuator;

/// Raw, unguarded frame reads from a device.
pub trait FrameGrabber: Send {
    /// Read the next frame the device has buffered.
    fn grab(&mut self) -> Result<RgbImage, FocusError>;
}

/// Fresh frames on demand.
///
/// Implementations discard stale buffered frames before returning one and
/// serialize callers so discard-then-read sequences never interleave.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<CameraFrame, FocusError>;
}

/// Fire-and-forget integer control writes.
///
/// A rejected value is not reported back; it only shows up as a poor score.
pub trait FocusActuator: Send + Sync {
    fn set(&self, control: &str, value: i32);
}

impl<T: FrameSource + ?Sized> FrameSource for std::sync::Arc<T> {
    fn capture(&self) -> Result<CameraFrame, FocusError> {
        (**self).capture()
    }
}

impl<T: FocusActuator + ?Sized> FocusActuator for std::sync::Arc<T> {
    fn set(&self, control: &str, value: i32) {
        (**self).set(control, value)
    }
}

//! Simulated camera with a focus-dependent blur
//!
//! Renders a dark frame with a blue dotted panel in the middle. The further
//! the focus control is from the configured peak, the stronger the Gaussian
//! blur, so the autofocus pipeline can run end to end without hardware.

use crate::device::{FocusActuator, FrameGrabber};
use crate::errors::FocusError;
use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const BACKGROUND: Rgb<u8> = Rgb([10, 10, 10]);
const DOT: Rgb<u8> = Rgb([40, 90, 235]);
const FILL: Rgb<u8> = Rgb([12, 24, 80]);

/// Scene and lens model
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedScene {
    pub width: u32,
    pub height: u32,
    pub panel_width: u32,
    pub panel_height: u32,
    /// Dot pitch of the panel in pixels
    pub pitch: u32,
    /// Focus position with no blur at all
    pub peak_focus: i32,
    /// Blur sigma per focus unit away from the peak
    pub blur_per_step: f32,
    pub max_blur: f32,
    /// Panel rotation in degrees
    pub tilt_deg: f64,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            panel_width: 128,
            panel_height: 64,
            pitch: 6,
            peak_focus: 142,
            blur_per_step: 1.0 / 3.0,
            max_blur: 4.0,
            tilt_deg: 0.0,
        }
    }
}

impl SimulatedScene {
    pub fn blur_sigma(&self, focus: i32) -> f32 {
        ((focus - self.peak_focus).abs() as f32 * self.blur_per_step).min(self.max_blur)
    }

    /// The scene at perfect focus.
    pub fn render_sharp(&self) -> RgbImage {
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        let (half_w, half_h) = (self.panel_width as f64 / 2.0, self.panel_height as f64 / 2.0);
        let (sin, cos) = self.tilt_deg.to_radians().sin_cos();
        let pitch = self.pitch.max(2) as f64;

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let u = cos * dx + sin * dy;
            let v = -sin * dx + cos * dy;
            if u.abs() >= half_w || v.abs() >= half_h {
                return BACKGROUND;
            }
            let pu = (u + half_w).rem_euclid(pitch);
            let pv = (v + half_h).rem_euclid(pitch);
            if pu < pitch / 2.0 && pv < pitch / 2.0 {
                DOT
            } else {
                FILL
            }
        })
    }

    pub fn render(&self, focus: i32) -> RgbImage {
        let sharp = self.render_sharp();
        let sigma = self.blur_sigma(focus);
        if sigma < 0.05 {
            sharp
        } else {
            gaussian_blur_f32(&sharp, sigma)
        }
    }
}

#[derive(Debug)]
struct SimState {
    scene: SimulatedScene,
    focus_control: String,
    controls: HashMap<String, i32>,
    cached: Option<(i32, RgbImage)>,
    frames_rendered: u64,
    fail_after: Option<u64>,
}

/// Shared handle to one simulated camera.
///
/// Clones refer to the same device: hand one to [`GuardedCapture`] as the
/// grabber and use another as the focus actuator.
///
/// [`GuardedCapture`]: crate::device::GuardedCapture
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(SimulatedScene::default())
    }
}

impl SimulatedCamera {
    pub fn new(scene: SimulatedScene) -> Self {
        Self::with_focus_control(scene, "focus_absolute")
    }

    pub fn with_focus_control(scene: SimulatedScene, focus_control: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                scene,
                focus_control: focus_control.to_string(),
                controls: HashMap::new(),
                cached: None,
                frames_rendered: 0,
                fail_after: None,
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn focus(&self) -> i32 {
        self.with_state(|s| s.controls.get(&s.focus_control).copied().unwrap_or(0))
    }

    pub fn control(&self, name: &str) -> Option<i32> {
        self.with_state(|s| s.controls.get(name).copied())
    }

    pub fn frames_rendered(&self) -> u64 {
        self.with_state(|s| s.frames_rendered)
    }

    pub fn set_tilt(&self, tilt_deg: f64) {
        self.with_state(|s| {
            s.scene.tilt_deg = tilt_deg;
            s.cached = None;
        });
    }

    /// Make every grab after the next `frames` fail.
    pub fn fail_after(&self, frames: u64) {
        self.with_state(|s| s.fail_after = Some(s.frames_rendered + frames));
    }
}

impl FrameGrabber for SimulatedCamera {
    fn grab(&mut self) -> Result<RgbImage, FocusError> {
        self.with_state(|s| {
            if s.fail_after.is_some_and(|limit| s.frames_rendered >= limit) {
                return Err(FocusError::CaptureFailed("simulated device unplugged".to_string()));
            }
            s.frames_rendered += 1;

            let focus = s.controls.get(&s.focus_control).copied().unwrap_or(0);
            match &s.cached {
                Some((cached_focus, image)) if *cached_focus == focus => Ok(image.clone()),
                _ => {
                    let image = s.scene.render(focus);
                    s.cached = Some((focus, image.clone()));
                    Ok(image)
                }
            }
        })
    }
}

impl FocusActuator for SimulatedCamera {
    fn set(&self, control: &str, value: i32) {
        self.with_state(|s| {
            s.controls.insert(control.to_string(), value);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::RegionLocator;

    #[test]
    fn test_blur_grows_away_from_peak() {
        let scene = SimulatedScene::default();
        assert_eq!(scene.blur_sigma(142), 0.0);
        assert!(scene.blur_sigma(145) > scene.blur_sigma(143));
        assert_eq!(scene.blur_sigma(0), scene.max_blur);
    }

    #[test]
    fn test_sharp_panel_is_located() {
        let frame = SimulatedScene::default().render(142);
        let bbox = RegionLocator::default().locate_bbox(&frame).unwrap();
        let (cx, cy) = bbox.center();
        assert!((150..=170).contains(&cx));
        assert!((110..=130).contains(&cy));
    }

    #[test]
    fn test_focus_control_drives_rendering() {
        let mut camera = SimulatedCamera::default();
        camera.set("focus_absolute", 142);
        let sharp = camera.grab().unwrap();
        camera.set("focus_absolute", 100);
        let blurred = camera.grab().unwrap();
        assert_ne!(sharp, blurred);
        assert_eq!(camera.focus(), 100);
        assert_eq!(camera.frames_rendered(), 2);
    }

    #[test]
    fn test_fail_after() {
        let mut camera = SimulatedCamera::default();
        camera.fail_after(1);
        assert!(camera.grab().is_ok());
        assert!(matches!(camera.grab(), Err(FocusError::CaptureFailed(_))));
    }
}

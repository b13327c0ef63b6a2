//! crabfocus: progressive image-based autofocus for fixed cameras
//!
//! Finds the best manual focus position for a camera looking at a small,
//! periodically structured light-emitting target (an OLED panel) using only
//! sharpness measured in the image.
//!
//! # Features
//! - Coarse-to-fine focus sweep with early termination on a dominant peak
//! - CLAHE-normalized Laplacian-variance sharpness scoring
//! - Color-blob region location with geometric sanity checks
//! - FFT grid rotation estimation and deskew
//! - Single-flight run service with a live progress channel
//! - Run artifacts (before/after images, spectrum, metadata) on disk
//!
//! # Usage
//! ```rust,ignore
//! use crabfocus::prelude::*;
//! use std::sync::Arc;
//!
//! let config = AutofocusConfig::load_or_default();
//! let camera = SimulatedCamera::default();
//! let source: Arc<dyn FrameSource> = Arc::new(GuardedCapture::new(
//!     Box::new(camera.clone()),
//!     config.camera.discard_frames,
//! ));
//! let probe = Arc::new(FrameScorer::new(source.clone(), &config.scoring));
//! let controller = SweepController::new(config, source, Arc::new(camera), probe);
//! let result = controller.run()?;
//! println!("best focus = {}", result.focus);
//! ```
pub mod config;
pub mod device;
pub mod errors;
pub mod invariant_ppt;
pub mod locator;
pub mod quality;
pub mod recorder;
pub mod rotation;
pub mod service;
pub mod sweep;
pub mod types;

// Testing utilities - simulated camera and scripted collaborators
pub mod testing;

// Re-exports for convenience
pub use config::{AutofocusConfig, LiveParams};
pub use errors::FocusError;
pub use service::{AutofocusService, RunHandle};
pub use sweep::{RunPhase, RunStatus, SweepController};
pub use types::{BoundingBox, CameraFrame, FocusPosition, RunResult, ScoreSample, SweepStage};

/// Commonly used types in one import
pub mod prelude {
    pub use crate::config::{AutofocusConfig, LiveParams};
    pub use crate::device::{FocusActuator, FrameGrabber, FrameSource, GuardedCapture};
    pub use crate::errors::FocusError;
    pub use crate::locator::RegionLocator;
    pub use crate::quality::{FrameScorer, SharpnessProbe};
    pub use crate::recorder::{PhotoRecorder, RunRecorder};
    pub use crate::rotation::RotationEstimator;
    pub use crate::service::AutofocusService;
    pub use crate::sweep::{RunPhase, RunStatus, SweepController};
    pub use crate::testing::SimulatedCamera;
    pub use crate::types::{BoundingBox, RunResult, ScoreSample, SweepStage};
}

/// Initialize logging for the autofocus system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabfocus=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        native_capture: cfg!(feature = "native"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with the nokhwa capture backend
    pub native_capture: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabfocus");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}

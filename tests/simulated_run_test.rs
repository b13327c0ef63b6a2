//! End-to-end runs against the simulated camera
//!
//! Real frames, real scoring: only the optics are synthetic.

use crabfocus::config::{AutofocusConfig, ScoringConfig, SweepConfig};
use crabfocus::device::{FrameSource, GuardedCapture};
use crabfocus::quality::FrameScorer;
use crabfocus::recorder::PhotoRecorder;
use crabfocus::sweep::SweepController;
use crabfocus::testing::{SimulatedCamera, SimulatedScene};
use std::sync::Arc;
use tempfile::tempdir;

fn simulated_controller(camera: &SimulatedCamera) -> SweepController {
    let config = AutofocusConfig {
        sweep: SweepConfig::default().without_delays(),
        scoring: ScoringConfig {
            frame_delay_ms: 0,
            ..ScoringConfig::default()
        },
        ..AutofocusConfig::default()
    };
    let source: Arc<dyn FrameSource> = Arc::new(GuardedCapture::new(
        Box::new(camera.clone()),
        config.camera.discard_frames,
    ));
    let probe = Arc::new(FrameScorer::new(source.clone(), &config.scoring));
    SweepController::new(config, source, Arc::new(camera.clone()), probe)
}

#[test]
fn test_simulated_run_finds_peak() {
    let camera = SimulatedCamera::default();
    let result = simulated_controller(&camera).run().unwrap();

    assert!((result.focus - 142).abs() <= 2, "focus = {}", result.focus);
    assert_eq!(camera.focus(), result.focus);
    assert!(result.region_detected);
    assert!(result.score > 0.0);
}

#[test]
fn test_simulated_run_with_tilted_panel() {
    let camera = SimulatedCamera::new(SimulatedScene {
        tilt_deg: 6.0,
        ..SimulatedScene::default()
    });
    let result = simulated_controller(&camera).run().unwrap();

    assert!((result.focus - 142).abs() <= 2, "focus = {}", result.focus);
    let angle = result.rotation_deg.expect("tilted dot grid should be detected");
    assert!((angle.abs() - 6.0).abs() <= 2.0, "angle = {}", angle);
}

#[test]
fn test_simulated_run_records_artifacts() {
    let dir = tempdir().unwrap();
    let camera = SimulatedCamera::default();
    let controller = simulated_controller(&camera)
        .with_recorder(Arc::new(PhotoRecorder::new(dir.path(), 85)));
    controller.run().unwrap();

    let count = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(count, 5);
}

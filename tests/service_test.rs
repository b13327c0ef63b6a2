//! Single-flight run service

use crabfocus::config::{AutofocusConfig, SweepConfig};
use crabfocus::quality::SharpnessProbe;
use crabfocus::recorder::{RecordError, RunRecorder, RunReport};
use crabfocus::sweep::RunPhase;
use crabfocus::testing::{MockLens, SimulatedScene, StillFrameSource};
use crabfocus::types::BoundingBox;
use crabfocus::{AutofocusService, FocusError, SweepController};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Blocks every score until released, then reports a peak at 142.
struct GatedProbe {
    lens: Arc<MockLens>,
    open: Arc<AtomicBool>,
}

impl SharpnessProbe for GatedProbe {
    fn score(&self, _bbox: &BoundingBox, _frames: u32) -> Result<f64, FocusError> {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let d = (self.lens.focus() - 142) as f64 / 8.0;
        Ok((-d * d).exp())
    }
}

/// Holds every write until released.
#[derive(Default)]
struct SlowRecorder {
    open: AtomicBool,
    written: AtomicUsize,
}

impl RunRecorder for SlowRecorder {
    fn record(&self, _report: &RunReport) -> Result<Vec<PathBuf>, RecordError> {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

fn gated_service() -> (AutofocusService, Arc<AtomicBool>) {
    let (controller, open) = gated_controller();
    (AutofocusService::new(controller), open)
}

fn gated_controller() -> (SweepController, Arc<AtomicBool>) {
    let lens = Arc::new(MockLens::new("focus_absolute"));
    let open = Arc::new(AtomicBool::new(false));
    let probe = Arc::new(GatedProbe {
        lens: lens.clone(),
        open: open.clone(),
    });
    let config = AutofocusConfig {
        sweep: SweepConfig::default().without_delays(),
        ..AutofocusConfig::default()
    };
    let source = Arc::new(StillFrameSource::new(SimulatedScene::default().render_sharp()));
    (SweepController::new(config, source, lens, probe), open)
}

#[tokio::test]
async fn test_second_trigger_is_rejected() {
    let (service, open) = gated_service();

    let handle = service.trigger().unwrap();
    assert!(service.is_running());
    assert!(matches!(service.trigger(), Err(FocusError::RunAlreadyInProgress)));

    open.store(true, Ordering::SeqCst);
    let result = handle.wait().await.unwrap();
    assert_eq!(result.focus, 142);
    assert!(!service.is_running());

    // the flag is free again once the run is over
    let again = service.trigger().unwrap();
    assert!(again.wait().await.is_ok());
}

#[tokio::test]
async fn test_observers_see_final_status() {
    let (service, open) = gated_service();
    let mut rx = service.subscribe();
    open.store(true, Ordering::SeqCst);

    let handle = service.trigger().unwrap();
    handle.wait().await.unwrap();

    let status = rx.borrow_and_update().clone();
    assert_eq!(status.phase, RunPhase::Done);
    assert_eq!(status.final_focus, Some(142));
    assert_eq!(service.status().phase, RunPhase::Done);
}

#[tokio::test]
async fn test_live_offset_applies_to_next_run() {
    let (service, open) = gated_service();
    open.store(true, Ordering::SeqCst);
    assert_eq!(service.live_params().set_offset(-50), -20);
    service.live_params().set_offset(-2);

    let result = service.trigger().unwrap().wait().await.unwrap();
    assert_eq!(result.focus, 140);
}

#[tokio::test]
async fn test_run_completes_before_artifacts_are_written() {
    let (controller, open) = gated_controller();
    let recorder = Arc::new(SlowRecorder::default());
    let service = AutofocusService::new(controller.with_recorder(recorder.clone()));
    open.store(true, Ordering::SeqCst);

    let result = service.trigger().unwrap().wait().await.unwrap();
    assert_eq!(result.focus, 142);
    assert!(!service.is_running());
    assert_eq!(recorder.written.load(Ordering::SeqCst), 0);

    recorder.open.store(true, Ordering::SeqCst);
    for _ in 0..500 {
        if recorder.written.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(recorder.written.load(Ordering::SeqCst), 1);
}

//! Progressive autofocus state machine
//!
//! `Scramble -> Detect -> Coarse -> [Fine] -> [Micro] -> Ultra -> Focus`.
//! Stages only move forward. Fine and Micro are skipped once one candidate
//! dominates the runner-up; Ultra always runs. Any error aborts the run and
//! leaves the lens wherever it was last moved.

use super::plan::{self, Window};
use super::progress::{LogLevel, ProgressReporter};
use crate::config::{AutofocusConfig, ControlValue, LiveParams, PhaseSpec};
use crate::device::{randomize_controls, FocusActuator, FrameSource};
use crate::errors::FocusError;
use crate::locator::{center_crop_rect, RegionLocator};
use crate::quality::SharpnessProbe;
use crate::recorder::{
    annotate_region, crop_region, CropSizes, NullRecorder, RunArtifacts, RunMetadata,
    RunRecorder, RunReport,
};
use crate::rotation::{deskew, needs_deskew, RotationEstimator};
use crate::types::{BoundingBox, FocusPosition, RunResult, ScoreSample, SweepStage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

fn bar(score: f64) -> String {
    "\u{2588}".repeat((score * 30.0) as usize)
}

/// Result of the diagnostic full-range sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub region: BoundingBox,
    pub region_detected: bool,
    pub samples: Vec<ScoreSample>,
    pub best: ScoreSample,
}

/// Per-run mutable state, owned by the executing thread only.
struct RunContext {
    started_at: chrono::DateTime<Utc>,
    stages: Vec<SweepStage>,
    samples: Vec<ScoreSample>,
    initial: Vec<ControlValue>,
    artifacts: RunArtifacts,
    frame_size: (u32, u32),
    center: (u32, u32),
}

impl RunContext {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            stages: Vec::new(),
            samples: Vec::new(),
            initial: Vec::new(),
            artifacts: RunArtifacts::default(),
            frame_size: (0, 0),
            center: (0, 0),
        }
    }

    fn crop(&self, size: u32) -> BoundingBox {
        let (fw, fh) = self.frame_size;
        BoundingBox::centered_square(self.center.0 as i64, self.center.1 as i64, size, fw, fh)
    }
}

pub struct SweepController {
    config: AutofocusConfig,
    source: Arc<dyn FrameSource>,
    actuator: Arc<dyn FocusActuator>,
    probe: Arc<dyn SharpnessProbe>,
    recorder: Arc<dyn RunRecorder>,
    live: Arc<LiveParams>,
    reporter: ProgressReporter,
    locator: RegionLocator,
    estimator: RotationEstimator,
}

impl SweepController {
    pub fn new(
        config: AutofocusConfig,
        source: Arc<dyn FrameSource>,
        actuator: Arc<dyn FocusActuator>,
        probe: Arc<dyn SharpnessProbe>,
    ) -> Self {
        let live = Arc::new(LiveParams::from_config(&config.sweep));
        Self {
            locator: RegionLocator::new(config.locator.clone()),
            estimator: RotationEstimator::new(config.rotation.clone()),
            config,
            source,
            actuator,
            probe,
            recorder: Arc::new(NullRecorder),
            live,
            reporter: ProgressReporter::new(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_live_params(mut self, live: Arc<LiveParams>) -> Self {
        self.live = live;
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &AutofocusConfig {
        &self.config
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn live_params(&self) -> &Arc<LiveParams> {
        &self.live
    }

    /// Run the full progressive search. The outcome is also published through
    /// the reporter (`Done` or `Error`).
    pub fn run(&self) -> Result<RunResult, FocusError> {
        self.reporter.begin();
        match self.execute() {
            Ok(result) => {
                self.reporter.finish(result.focus);
                Ok(result)
            }
            Err(e) => {
                self.reporter.fail(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    fn enter(&self, ctx: &mut RunContext, stage: SweepStage) {
        ctx.stages.push(stage);
        self.reporter.stage(stage);
    }

    fn set_focus(&self, position: FocusPosition) {
        self.actuator.set(&self.config.camera.focus_control, position);
    }

    /// Move, settle, score and record one position.
    fn measure(
        &self,
        ctx: &mut RunContext,
        position: FocusPosition,
        bbox: &BoundingBox,
        frames: u32,
    ) -> Result<f64, FocusError> {
        self.set_focus(position);
        pause(self.live.settle());
        let score = self.probe.score(bbox, frames)?;
        ctx.samples.push(ScoreSample::new(position, score));
        self.reporter
            .info(format!("  focus={:3}  score={:.4}  {}", position, score, bar(score)));
        Ok(score)
    }

    fn sweep_positions(
        &self,
        ctx: &mut RunContext,
        stage: SweepStage,
        positions: &[FocusPosition],
        phase: &PhaseSpec,
    ) -> Result<(), FocusError> {
        let bbox = ctx.crop(phase.crop);
        for (i, &position) in positions.iter().enumerate() {
            self.reporter
                .progress(format!("{} {}/{}", stage, i + 1, positions.len()));
            self.measure(ctx, position, &bbox, phase.frames)?;
        }
        Ok(())
    }

    fn report_best(&self, best: &ScoreSample) {
        self.reporter.good(format!(
            "  * best: focus={} (score={:.4})",
            best.position, best.score
        ));
    }

    /// Refinement window around `best`, swept at the phase step.
    fn refine(
        &self,
        ctx: &mut RunContext,
        stage: SweepStage,
        best: FocusPosition,
        phase: &PhaseSpec,
    ) -> Result<Window, FocusError> {
        let camera = &self.config.camera;
        let window = Window::around(best, phase.radius, camera.focus_min, camera.focus_max);
        let positions = plan::refine_positions(window, phase.step, &ctx.samples);
        self.sweep_positions(ctx, stage, &positions, phase)?;
        Ok(window)
    }

    fn missing_best(stage: SweepStage) -> FocusError {
        FocusError::RunAborted(format!("{} produced no samples", stage))
    }

    fn execute(&self) -> Result<RunResult, FocusError> {
        let sweep = &self.config.sweep;
        let camera = &self.config.camera;
        let mut ctx = RunContext::new();
        let run_id = uuid::Uuid::new_v4();
        log::info!("Autofocus run {} started", run_id);

        // Scramble
        self.enter(&mut ctx, SweepStage::Scramble);
        self.reporter.progress("Scrambling...");
        if sweep.scramble {
            ctx.initial = randomize_controls(self.actuator.as_ref(), &mut rand::thread_rng());
            self.reporter
                .info(format!("Randomized {} controls", ctx.initial.len()));
        }
        pause(Duration::from_millis(sweep.scramble_delay_ms));
        ctx.artifacts.pre = Some(self.source.capture()?.image);

        // Detect
        self.enter(&mut ctx, SweepStage::Detect);
        self.reporter
            .info("Restoring camera preset (keeping random focus)...");
        for control in &camera.restore {
            self.actuator.set(&control.name, control.value);
        }
        pause(Duration::from_millis(sweep.restore_settle_ms));

        self.reporter.progress("Finding focus center...");
        self.reporter
            .info(format!("Finding focus center at focus={}...", camera.detect_focus));
        self.set_focus(camera.detect_focus);
        pause(self.live.settle());
        let frame = self.source.capture()?;
        ctx.frame_size = frame.dimensions();
        ctx.center = self.locator.locate_center(&frame.image);
        self.reporter
            .good(format!("  Focus center: ({}, {})", ctx.center.0, ctx.center.1));

        // Coarse
        self.enter(&mut ctx, SweepStage::Coarse);
        self.reporter.info("");
        self.reporter.header(format!(
            "--- Coarse sweep ({}-frame avg, {}x{} crop) ---",
            sweep.coarse.frames, sweep.coarse.crop, sweep.coarse.crop
        ));
        let coarse = plan::coarse_positions(camera.focus_min, camera.focus_max, sweep.coarse.step);
        self.sweep_positions(&mut ctx, SweepStage::Coarse, &coarse, &sweep.coarse)?;
        let mut best = plan::best_of(&ctx.samples).ok_or_else(|| Self::missing_best(SweepStage::Coarse))?;
        self.report_best(&best);

        let mut bailed = self.bail_check(&ctx, "skipping fine+micro");

        // Fine
        if !bailed {
            self.enter(&mut ctx, SweepStage::Fine);
            self.reporter.info("");
            self.reporter.header(format!(
                "--- Fine sweep ({}-frame avg, {}x{} crop) ---",
                sweep.fine.frames, sweep.fine.crop, sweep.fine.crop
            ));
            self.refine(&mut ctx, SweepStage::Fine, best.position, &sweep.fine)?;
            best = plan::best_of(&ctx.samples).ok_or_else(|| Self::missing_best(SweepStage::Fine))?;
            self.report_best(&best);
            bailed = self.bail_check(&ctx, "skipping micro");
        }

        // Micro
        if !bailed {
            self.enter(&mut ctx, SweepStage::Micro);
            self.reporter.info("");
            self.reporter.header(format!(
                "--- Micro sweep ({}-frame avg, {}x{} crop) ---",
                sweep.micro.frames, sweep.micro.crop, sweep.micro.crop
            ));
            let window = self.refine(&mut ctx, SweepStage::Micro, best.position, &sweep.micro)?;
            best = plan::best_in_window(&ctx.samples, window)
                .ok_or_else(|| Self::missing_best(SweepStage::Micro))?;
            self.report_best(&best);
        }

        // Ultra
        self.enter(&mut ctx, SweepStage::Ultra);
        self.reporter.info("");
        self.reporter.header(format!(
            "--- Ultra sweep ({}-frame avg, step {}, {}x{} crop) ---",
            sweep.ultra.frames, sweep.ultra.step, sweep.ultra.crop, sweep.ultra.crop
        ));
        let window = self.refine(&mut ctx, SweepStage::Ultra, best.position, &sweep.ultra)?;
        best = plan::best_in_window(&ctx.samples, window)
            .ok_or_else(|| Self::missing_best(SweepStage::Ultra))?;
        self.report_best(&best);

        let offset = self.live.offset();
        let focus = plan::apply_offset(best.position, offset, camera.focus_min, camera.focus_max);
        if offset != 0 {
            self.reporter
                .info(format!("  + offset {:+} -> focus={}", offset, focus));
        }

        // Focus
        self.enter(&mut ctx, SweepStage::Focus);
        let (rotation_deg, region, region_detected, deskew_angle) =
            self.final_region(&mut ctx, focus)?;

        self.reporter.progress("Verifying...");
        self.reporter.info("");
        self.reporter
            .header(format!("--- Verify ({}-frame avg) ---", sweep.verify_frames));
        self.set_focus(focus);
        pause(Duration::from_millis(sweep.verify_settle_ms));
        let score = self.probe.score(&region, sweep.verify_frames)?;
        self.reporter
            .good(format!("  focus={}  score={:.4}", focus, score));

        let mut post = self.source.capture()?.image;
        if let Some(angle) = deskew_angle {
            post = deskew(&post, angle);
        }
        ctx.artifacts.region = Some(crop_region(&post, &region));
        ctx.artifacts.post = Some(annotate_region(&post, &region));

        self.reporter.info("");
        self.reporter.log(
            LogLevel::Best,
            format!("Done! Best focus = {}  (score = {:.4})", focus, score),
        );

        let result = RunResult {
            run_id,
            started_at: ctx.started_at,
            focus,
            score,
            rotation_deg,
            region,
            region_detected,
            focus_center: ctx.center,
            samples: ctx.samples.clone(),
            stages: ctx.stages.clone(),
        };
        self.record(&result, ctx);
        Ok(result)
    }

    /// Early-termination check over every sample taken so far.
    fn bail_check(&self, ctx: &RunContext, skipping: &str) -> bool {
        match plan::should_bail(&ctx.samples, self.config.sweep.bail_dominance) {
            Some(dominance) => {
                self.reporter.warn(format!(
                    "  Early bail: dominance {:.2}x (>={}x), {}",
                    dominance, self.config.sweep.bail_dominance, skipping
                ));
                true
            }
            None => false,
        }
    }

    /// Estimate grid rotation at the chosen focus and re-detect the panel,
    /// deskewed when a rotation was found. Falls back to the Ultra crop.
    fn final_region(
        &self,
        ctx: &mut RunContext,
        focus: FocusPosition,
    ) -> Result<(Option<f64>, BoundingBox, bool, Option<f64>), FocusError> {
        self.set_focus(focus);
        pause(self.live.settle());
        let frame = self.source.capture()?.image;

        self.reporter.info("");
        self.reporter.header("--- Grid rotation detection ---");
        let spectrum = self.estimator.spectrum(&frame, ctx.center.0, ctx.center.1);
        let rotation = self.estimator.estimate_from_spectrum(&spectrum);
        match rotation {
            Some(angle) => self
                .reporter
                .good(format!("  Grid angle: {:.1} degrees", angle)),
            None => self
                .reporter
                .warn("  Grid angle: not detected (no dominant FFT peak)"),
        }
        let rotation_cfg = self.estimator.config();
        ctx.artifacts.spectrum = Some(spectrum.render(
            rotation_cfg.min_radius as f32,
            rotation_cfg.max_radius as f32,
            rotation,
        ));

        self.reporter.info("");
        let deskew_angle = rotation.filter(|a| needs_deskew(*a, rotation_cfg.deskew_threshold_deg));
        let target = match deskew_angle {
            Some(angle) => {
                self.reporter.header("--- Re-detect OLED (deskewed) ---");
                deskew(&frame, angle)
            }
            None => {
                self.reporter.header("--- Re-detect OLED (sharp focus) ---");
                frame
            }
        };

        let (region, detected) = match self.locator.locate_bbox(&target) {
            Some(bbox) => {
                self.reporter
                    .good(format!("  OLED found: {}x{} at ({},{})", bbox.w, bbox.h, bbox.x, bbox.y));
                if self.locator.touches_edge(&bbox, target.width(), target.height()) {
                    self.reporter.warn("  Warning: bbox touches frame edge");
                }
                (bbox, true)
            }
            None => {
                self.reporter
                    .warn("  OLED not detected, using focus crop fallback");
                (ctx.crop(self.config.sweep.ultra.crop), false)
            }
        };

        Ok((rotation, region, detected, deskew_angle))
    }

    fn record(&self, result: &RunResult, ctx: RunContext) {
        let sweep = &self.config.sweep;
        let metadata = RunMetadata::from_run(
            result,
            self.live.settle_ms(),
            &ctx.initial,
            &self.config.camera.restore,
            CropSizes {
                coarse: sweep.coarse.crop,
                fine: sweep.fine.crop,
                micro: sweep.micro.crop,
                ultra: sweep.ultra.crop,
            },
        );
        let report = RunReport {
            result: result.clone(),
            metadata,
            artifacts: ctx.artifacts,
        };

        let recorder = self.recorder.clone();
        let reporter = self.reporter.clone();
        let persist = move || {
            if let Err(e) = recorder.record(&report) {
                reporter.warn(format!("  Could not record run artifacts: {}", e));
            }
        };
        // inside a runtime the write is detached from the run; plain callers
        // get the files before `run` returns
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(persist);
            }
            Err(_) => persist(),
        }
    }

    /// Score every `diagnostic_step` positions over the detected panel (or the
    /// center crop), then leave the lens at the best one.
    pub fn diagnostic_sweep(&self) -> Result<DiagnosticReport, FocusError> {
        let camera = &self.config.camera;
        let sweep = &self.config.sweep;

        self.actuator.set(&camera.autofocus_control, 0);
        self.set_focus(camera.detect_focus);
        pause(self.live.settle());
        let frame = self.source.capture()?.image;

        let (region, region_detected) = match self.locator.locate_bbox(&frame) {
            Some(bbox) => {
                log::info!("OLED detected: {}", bbox);
                (bbox, true)
            }
            None => {
                log::info!("OLED not detected, using center crop");
                (center_crop_rect(frame.width(), frame.height()), false)
            }
        };

        let positions = plan::coarse_positions(camera.focus_min, camera.focus_max, sweep.diagnostic_step);
        let mut samples = Vec::with_capacity(positions.len());
        for (i, &position) in positions.iter().enumerate() {
            self.reporter
                .progress(format!("Sweep {}/{}", i + 1, positions.len()));
            self.set_focus(position);
            pause(self.live.settle());
            let score = self.probe.score(&region, sweep.coarse.frames)?;
            log::debug!("focus={:3} score={:.4}", position, score);
            samples.push(ScoreSample::new(position, score));
        }

        let best = plan::best_of(&samples)
            .ok_or_else(|| FocusError::RunAborted("diagnostic sweep produced no samples".to_string()))?;
        self.set_focus(best.position);
        log::info!("Best: focus={} score={:.4}", best.position, best.score);

        Ok(DiagnosticReport {
            region,
            region_detected,
            samples,
            best,
        })
    }
}

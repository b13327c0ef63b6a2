use anyhow::{anyhow, bail, Context, Result};
use crabfocus::config::AutofocusConfig;
use crabfocus::device::{FocusActuator, FrameGrabber, FrameSource, GuardedCapture, V4l2CtlActuator};
use crabfocus::locator::{center_crop_rect, RegionLocator};
use crabfocus::quality::{FrameScorer, SharpnessProbe};
use crabfocus::recorder::PhotoRecorder;
use crabfocus::rotation::RotationEstimator;
use crabfocus::sweep::{LogLevel, RunStatus, SweepController};
use crabfocus::testing::SimulatedCamera;
use crabfocus::AutofocusService;
use std::env;
use std::sync::Arc;

const USAGE: &str = "Usage: crabfocus-cli <command> [args] [--config <path>] [--simulate] [--scramble] \
[--offset <n>] [--settle-ms <ms>] [--json]

Commands:
  focus               run the progressive autofocus sweep
  sweep               score every position in the focus range
  score               score the current focus position
  rotation <image>    estimate the pixel grid angle of an image file
  init-config [path]  write the default configuration";

#[derive(Debug, Default)]
struct Options {
    config: Option<String>,
    simulate: bool,
    scramble: bool,
    offset: Option<i32>,
    settle_ms: Option<u64>,
    json: bool,
    positional: Vec<String>,
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                opts.config = Some(args.get(i).context("--config needs a path")?.clone());
            }
            "--offset" => {
                i += 1;
                opts.offset = Some(args.get(i).context("--offset needs a value")?.parse()?);
            }
            "--settle-ms" => {
                i += 1;
                opts.settle_ms = Some(args.get(i).context("--settle-ms needs a value")?.parse()?);
            }
            "--simulate" => opts.simulate = true,
            "--scramble" => opts.scramble = true,
            "--json" => opts.json = true,
            other => opts.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(opts)
}

#[tokio::main]
async fn main() -> Result<()> {
    crabfocus::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = args[1].clone();
    let opts = parse_options(&args[2..])?;
    match command.as_str() {
        "focus" => cmd_focus(opts).await,
        "sweep" => cmd_sweep(opts).await,
        "score" => cmd_score(opts).await,
        "rotation" => cmd_rotation(opts),
        "init-config" => cmd_init_config(opts),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

fn load_config(opts: &Options) -> Result<AutofocusConfig> {
    let mut config = AutofocusConfig::load_layered(Some(
        opts.config
            .clone()
            .unwrap_or_else(|| AutofocusConfig::default_path().to_string_lossy().into_owned()),
    ))?;
    if opts.scramble {
        config.sweep.scramble = true;
    }
    Ok(config)
}

type Rig = (Arc<dyn FrameSource>, Arc<dyn FocusActuator>);

fn open_rig(config: &AutofocusConfig, simulate: bool) -> Result<Rig> {
    if simulate {
        let camera = SimulatedCamera::default();
        let source = GuardedCapture::new(Box::new(camera.clone()), config.camera.discard_frames);
        return Ok((Arc::new(source), Arc::new(camera)));
    }

    let grabber = open_grabber(config)?;
    let source = GuardedCapture::new(grabber, config.camera.discard_frames);
    let actuator = V4l2CtlActuator::new(config.camera.device.clone());
    Ok((Arc::new(source), Arc::new(actuator)))
}

#[cfg(feature = "native")]
fn open_grabber(config: &AutofocusConfig) -> Result<Box<dyn FrameGrabber>> {
    let grabber = crabfocus::device::NokhwaGrabber::open(config.camera.index)?;
    Ok(Box::new(grabber))
}

#[cfg(not(feature = "native"))]
fn open_grabber(_config: &AutofocusConfig) -> Result<Box<dyn FrameGrabber>> {
    bail!("built without the `native` feature; use --simulate or rebuild with --features native")
}

fn build_controller(opts: &Options) -> Result<SweepController> {
    let config = load_config(opts)?;
    let (source, actuator) = open_rig(&config, opts.simulate)?;
    let probe = Arc::new(FrameScorer::new(source.clone(), &config.scoring));
    let storage = config.storage.clone();

    let mut controller = SweepController::new(config, source, actuator, probe);
    if storage.enabled {
        controller = controller.with_recorder(Arc::new(PhotoRecorder::new(
            storage.photo_directory,
            storage.jpeg_quality,
        )));
    }
    if let Some(offset) = opts.offset {
        controller.live_params().set_offset(offset);
    }
    if let Some(settle_ms) = opts.settle_ms {
        controller.live_params().set_settle_ms(settle_ms);
    }
    Ok(controller)
}

fn print_log(status: &RunStatus, printed: &mut usize, json: bool) {
    if !json {
        for entry in status.log.iter().skip(*printed) {
            match entry.level {
                LogLevel::Error | LogLevel::Warn => eprintln!("{}", entry.message),
                _ => println!("{}", entry.message),
            }
        }
    }
    *printed = status.log.len();
}

async fn cmd_focus(opts: Options) -> Result<()> {
    let service = AutofocusService::new(build_controller(&opts)?);
    let mut status = service.subscribe();
    let handle = service.trigger()?;

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut printed = 0;
    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            Ok(()) = status.changed() => {
                let snapshot = status.borrow_and_update().clone();
                print_log(&snapshot, &mut printed, opts.json);
            }
        }
    };
    print_log(&service.status(), &mut printed, opts.json);
    let result = result?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        println!("focus:    {}", result.focus);
        println!("score:    {:.4}", result.score);
        match result.rotation_deg {
            Some(angle) => println!("rotation: {:.2} deg", angle),
            None => println!("rotation: not detected"),
        }
        println!("region:   {}", result.region);
    }
    Ok(())
}

async fn cmd_sweep(opts: Options) -> Result<()> {
    let controller = build_controller(&opts)?;
    let report = tokio::task::spawn_blocking(move || controller.diagnostic_sweep())
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))??;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let detected = if report.region_detected { "detected" } else { "center crop" };
    println!("Region: {} ({})", report.region, detected);
    for sample in &report.samples {
        let marker = if sample.position == report.best.position { " <<<" } else { "" };
        println!(
            "  {:3}: {:.4} {}{}",
            sample.position,
            sample.score,
            "#".repeat((sample.score * 50.0) as usize),
            marker
        );
    }
    println!(
        "Best: focus={} score={:.4}",
        report.best.position, report.best.score
    );
    Ok(())
}

async fn cmd_score(opts: Options) -> Result<()> {
    let config = load_config(&opts)?;
    let (source, _actuator) = open_rig(&config, opts.simulate)?;

    let json = opts.json;
    tokio::task::spawn_blocking(move || -> Result<()> {
        let frame = source.capture()?;
        let (fw, fh) = frame.dimensions();
        let region = RegionLocator::new(config.locator.clone())
            .locate_bbox(&frame.image)
            .unwrap_or_else(|| center_crop_rect(fw, fh));
        let scorer = FrameScorer::new(source, &config.scoring);
        let score = scorer.score(&region, config.sweep.verify_frames)?;

        if json {
            println!(
                "{}",
                serde_json::json!({ "region": region, "score": score })
            );
        } else {
            println!("region: {}", region);
            println!("score:  {:.4}", score);
        }
        Ok(())
    })
    .await
    .map_err(|e| anyhow!("Task join error: {}", e))?
}

fn cmd_rotation(opts: Options) -> Result<()> {
    let path = opts
        .positional
        .first()
        .context("Usage: crabfocus-cli rotation <image>")?;
    let config = load_config(&opts)?;
    let image = image::open(path)
        .with_context(|| format!("Failed to open {}", path))?
        .to_rgb8();

    let center = RegionLocator::new(config.locator.clone()).locate_center(&image);
    let angle = RotationEstimator::new(config.rotation).estimate(&image, center.0, center.1);

    if opts.json {
        println!(
            "{}",
            serde_json::json!({ "center": [center.0, center.1], "grid_angle_deg": angle })
        );
    } else {
        match angle {
            Some(angle) => println!("Grid angle: {:.2} degrees", angle),
            None => println!("Grid angle: not detected"),
        }
    }
    Ok(())
}

fn cmd_init_config(opts: Options) -> Result<()> {
    let path = opts
        .positional
        .first()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(AutofocusConfig::default_path);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    AutofocusConfig::default().save_to_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

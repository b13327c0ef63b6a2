//! Configuration management for crabfocus
//!
//! Provides loading, saving, layering and validation for device settings,
//! sweep schedule, scoring calibration, region detection, rotation estimation
//! and photo storage. Every section falls back to its defaults field by field,
//! so a config file only needs the values it changes.

use crate::errors::FocusError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

/// Environment prefix for layered overrides, e.g. `CRABFOCUS__SWEEP__OFFSET=3`
pub const ENV_PREFIX: &str = "CRABFOCUS";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusConfig {
    pub camera: CameraConfig,
    pub sweep: SweepConfig,
    pub scoring: ScoringConfig,
    pub locator: LocatorConfig,
    pub rotation: RotationConfig,
    pub storage: StorageConfig,
}

/// A named device control and the value to write to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlValue {
    pub name: String,
    pub value: i32,
}

impl ControlValue {
    pub fn new(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// Camera device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device node
    pub device: String,
    /// Native camera index used by the `native` capture backend
    pub index: u32,
    /// Control carrying the manual focus position
    pub focus_control: String,
    /// Control toggling continuous autofocus
    pub autofocus_control: String,
    pub focus_min: i32,
    pub focus_max: i32,
    /// Focus position used while locating the target
    pub detect_focus: i32,
    /// Buffered frames dropped before every returned frame
    pub discard_frames: u32,
    /// Calibration values restored before the search, applied in order
    pub restore: Vec<ControlValue>,
}

/// One refinement phase of the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Half-width of the window around the current best (coarse: unused)
    pub radius: i32,
    pub step: i32,
    /// Frames averaged per score
    pub frames: u32,
    /// Side of the square scoring crop in pixels
    pub crop: u32,
}

impl PhaseSpec {
    pub const fn new(radius: i32, step: i32, frames: u32, crop: u32) -> Self {
        Self {
            radius,
            step,
            frames,
            crop,
        }
    }
}

/// Sweep schedule and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Randomize every control before the run starts
    pub scramble: bool,
    /// Pause before the "before" frame is captured
    pub scramble_delay_ms: u64,
    /// Pause after the restore preset (zoom motor + image pipeline)
    pub restore_settle_ms: u64,
    /// Pause after every focus move
    pub settle_ms: u64,
    /// Pause before the verification score
    pub verify_settle_ms: u64,
    /// Fixed offset added to the chosen position
    pub offset: i32,
    /// best / runner-up ratio that skips Fine and Micro
    pub bail_dominance: f64,
    /// Frames averaged by the final verification score
    pub verify_frames: u32,
    pub coarse: PhaseSpec,
    pub fine: PhaseSpec,
    pub micro: PhaseSpec,
    pub ultra: PhaseSpec,
    /// Step of the diagnostic full-range sweep
    pub diagnostic_step: i32,
}

/// Sharpness scoring calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Normalized canvas [width, height]
    pub canvas: [u32; 2],
    /// Laplacian variance that maps to a score of 1.0
    pub laplacian_divisor: f64,
    pub clahe_clip_limit: f64,
    /// CLAHE tile grid [columns, rows]
    pub clahe_tiles: [u32; 2],
    /// Pause between frames of one multi-frame score
    pub frame_delay_ms: u64,
}

/// Color-blob region detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Inclusive lower HSV bound (OpenCV 8-bit scale, H in 0..180)
    pub hsv_low: [u8; 3],
    pub hsv_high: [u8; 3],
    /// Odd side of the rectangular dilation kernel
    pub dilate_kernel: u32,
    pub dilate_iterations: u32,
    /// Minimum blob area considered by center location
    pub min_center_area: f64,
    /// Minimum panel area accepted by box location
    pub min_panel_area: f64,
    /// Largest accepted share of the frame covered by the panel box
    pub max_frame_fraction: f64,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub edge_margin: u32,
}

/// Frequency-domain grid rotation estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub crop_size: u32,
    pub min_radius: f64,
    pub max_radius: f64,
    pub bins: usize,
    /// Moving-average width applied to the angular profile
    pub smoothing: usize,
    /// Required peak height above the mean, in standard deviations
    pub prominence_sigma: f64,
    /// Required peak height above the mean, in log-magnitude units
    pub min_peak_contrast: f64,
    /// Angles at or below this magnitude are not deskewed
    pub deskew_threshold_deg: f64,
}

/// Run artifact storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub photo_directory: String,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            index: 0,
            focus_control: "focus_absolute".to_string(),
            autofocus_control: "focus_automatic_continuous".to_string(),
            focus_min: 0,
            focus_max: 255,
            detect_focus: 30,
            discard_frames: 2,
            restore: vec![
                ControlValue::new("zoom_absolute", 150),
                ControlValue::new("pan_absolute", 0),
                ControlValue::new("tilt_absolute", 0),
                ControlValue::new("focus_automatic_continuous", 0),
                ControlValue::new("sharpness", 180),
                ControlValue::new("brightness", 128),
                ControlValue::new("contrast", 128),
                ControlValue::new("saturation", 128),
                ControlValue::new("gain", 0),
                ControlValue::new("backlight_compensation", 0),
                ControlValue::new("auto_exposure", 1),
                ControlValue::new("exposure_time_absolute", 250),
                ControlValue::new("white_balance_automatic", 0),
                ControlValue::new("white_balance_temperature", 4000),
            ],
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            scramble: false,
            scramble_delay_ms: 500,
            restore_settle_ms: 1200,
            settle_ms: 100,
            verify_settle_ms: 500,
            offset: 0,
            bail_dominance: 1.5,
            verify_frames: 5,
            coarse: PhaseSpec::new(0, 20, 3, 80),
            fine: PhaseSpec::new(15, 5, 5, 100),
            micro: PhaseSpec::new(5, 2, 5, 120),
            ultra: PhaseSpec::new(2, 1, 5, 120),
            diagnostic_step: 5,
        }
    }
}

impl SweepConfig {
    /// Same schedule with every pause removed, for simulated devices.
    pub fn without_delays(mut self) -> Self {
        self.scramble_delay_ms = 0;
        self.restore_settle_ms = 0;
        self.settle_ms = 0;
        self.verify_settle_ms = 0;
        self
    }

    pub fn phases(&self) -> [(&'static str, PhaseSpec); 4] {
        [
            ("coarse", self.coarse),
            ("fine", self.fine),
            ("micro", self.micro),
            ("ultra", self.ultra),
        ]
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            canvas: [64, 32],
            laplacian_divisor: 25000.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: [4, 4],
            frame_delay_ms: 50,
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            hsv_low: [90, 50, 30],
            hsv_high: [130, 255, 255],
            dilate_kernel: 7,
            dilate_iterations: 2,
            min_center_area: 50.0,
            min_panel_area: 500.0,
            max_frame_fraction: 0.5,
            min_aspect: 1.3,
            max_aspect: 3.0,
            edge_margin: 2,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            crop_size: 200,
            min_radius: 15.0,
            max_radius: 80.0,
            bins: 180,
            smoothing: 5,
            prominence_sigma: 1.5,
            min_peak_contrast: 0.4,
            deskew_threshold_deg: 0.5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            photo_directory: "./photos".to_string(),
            jpeg_quality: 90,
        }
    }
}

impl AutofocusConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FocusError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| FocusError::ConfigIo(format!("Failed to read config file: {}", e)))?;

        let config: AutofocusConfig = toml::from_str(&contents)
            .map_err(|e| FocusError::InvalidConfig(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a TOML file (optional) overlaid with `CRABFOCUS__SECTION__KEY`
    /// environment variables.
    pub fn load_layered<P: AsRef<Path>>(path: Option<P>) -> Result<Self, FocusError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: AutofocusConfig = builder
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(|e| FocusError::InvalidConfig(format!("Failed to layer config: {}", e)))?;

        config.validate().map_err(FocusError::InvalidConfig)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FocusError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    FocusError::ConfigIo(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| FocusError::InvalidConfig(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| FocusError::ConfigIo(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabfocus.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let camera = &self.camera;
        if camera.focus_min >= camera.focus_max {
            return Err("Focus range must satisfy focus_min < focus_max".to_string());
        }
        if !(camera.focus_min..=camera.focus_max).contains(&camera.detect_focus) {
            return Err("Detect focus must lie inside the focus range".to_string());
        }
        if camera.discard_frames == 0 {
            return Err("At least one buffered frame must be discarded per capture".to_string());
        }

        let sweep = &self.sweep;
        for (name, phase) in sweep.phases() {
            if phase.step <= 0 {
                return Err(format!("Sweep phase '{}' needs a positive step", name));
            }
            if phase.frames == 0 {
                return Err(format!("Sweep phase '{}' needs at least one frame", name));
            }
            if phase.crop < 8 {
                return Err(format!("Sweep phase '{}' crop must be at least 8 px", name));
            }
            if phase.radius < 0 {
                return Err(format!("Sweep phase '{}' radius must not be negative", name));
            }
        }
        if !(LiveParams::OFFSET_MIN..=LiveParams::OFFSET_MAX).contains(&sweep.offset) {
            return Err("Focus offset must be between -20 and 20".to_string());
        }
        if sweep.bail_dominance <= 1.0 {
            return Err("Bail dominance must be greater than 1.0".to_string());
        }
        if sweep.verify_frames == 0 {
            return Err("Verification needs at least one frame".to_string());
        }
        if sweep.diagnostic_step <= 0 {
            return Err("Diagnostic sweep step must be positive".to_string());
        }

        let scoring = &self.scoring;
        if scoring.canvas[0] < 8 || scoring.canvas[1] < 8 {
            return Err("Scoring canvas must be at least 8x8".to_string());
        }
        if scoring.laplacian_divisor <= 0.0 {
            return Err("Laplacian divisor must be positive".to_string());
        }
        if scoring.clahe_clip_limit <= 0.0 {
            return Err("CLAHE clip limit must be positive".to_string());
        }
        if scoring.clahe_tiles[0] == 0
            || scoring.clahe_tiles[1] == 0
            || scoring.clahe_tiles[0] > scoring.canvas[0]
            || scoring.clahe_tiles[1] > scoring.canvas[1]
        {
            return Err("CLAHE tile grid must fit the scoring canvas".to_string());
        }

        let locator = &self.locator;
        if locator.dilate_kernel == 0 || locator.dilate_kernel % 2 == 0 {
            return Err("Dilation kernel must be odd".to_string());
        }
        if locator.min_aspect >= locator.max_aspect {
            return Err("Aspect envelope must satisfy min_aspect < max_aspect".to_string());
        }
        if !(0.0..=1.0).contains(&locator.max_frame_fraction) {
            return Err("Max frame fraction must be between 0.0 and 1.0".to_string());
        }
        if (0..3).any(|i| locator.hsv_low[i] > locator.hsv_high[i]) {
            return Err("HSV lower bound must not exceed the upper bound".to_string());
        }

        let rotation = &self.rotation;
        if rotation.crop_size < 16 {
            return Err("Rotation crop must be at least 16 px".to_string());
        }
        if rotation.min_radius < 0.0 || rotation.min_radius >= rotation.max_radius {
            return Err("Rotation annulus must satisfy 0 <= min_radius < max_radius".to_string());
        }
        if rotation.bins < 2 {
            return Err("Rotation histogram needs at least 2 bins".to_string());
        }
        if rotation.smoothing == 0 {
            return Err("Rotation smoothing width must be at least 1".to_string());
        }

        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        Ok(())
    }
}

/// Parameters that may be changed while a run is in flight.
///
/// The sweep reads them once per iteration, so a change applies to the next
/// focus move rather than to a read already in progress.
#[derive(Debug)]
pub struct LiveParams {
    offset: AtomicI32,
    settle_ms: AtomicU64,
}

impl LiveParams {
    pub const OFFSET_MIN: i32 = -20;
    pub const OFFSET_MAX: i32 = 20;
    pub const SETTLE_MIN_MS: u64 = 100;
    pub const SETTLE_MAX_MS: u64 = 1000;

    /// Seed from config values; the config values are taken as-is so tests
    /// can run with zero settle time.
    pub fn new(offset: i32, settle_ms: u64) -> Self {
        Self {
            offset: AtomicI32::new(offset.clamp(Self::OFFSET_MIN, Self::OFFSET_MAX)),
            settle_ms: AtomicU64::new(settle_ms),
        }
    }

    pub fn from_config(sweep: &SweepConfig) -> Self {
        Self::new(sweep.offset, sweep.settle_ms)
    }

    pub fn offset(&self) -> i32 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Set the focus offset, clamped to [-20, 20]. Returns the stored value.
    pub fn set_offset(&self, offset: i32) -> i32 {
        let clamped = offset.clamp(Self::OFFSET_MIN, Self::OFFSET_MAX);
        self.offset.store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms())
    }

    pub fn settle_ms(&self) -> u64 {
        self.settle_ms.load(Ordering::Relaxed)
    }

    /// Set the settle time, clamped to [100, 1000] ms. Returns the stored value.
    pub fn set_settle_ms(&self, settle_ms: u64) -> u64 {
        let clamped = settle_ms.clamp(Self::SETTLE_MIN_MS, Self::SETTLE_MAX_MS);
        self.settle_ms.store(clamped, Ordering::Relaxed);
        clamped
    }
}

//! UVC control schema, presets and the Scramble randomizer

use super::FocusActuator;
use crate::config::ControlValue;
use crate::errors::FocusError;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ControlGroup {
    Position,
    Focus,
    Image,
    Exposure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ControlSpec {
    pub label: &'static str,
    pub name: &'static str,
    pub group: ControlGroup,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

impl ControlSpec {
    const fn new(
        label: &'static str,
        name: &'static str,
        group: ControlGroup,
        range: (i32, i32),
        step: i32,
        default: i32,
    ) -> Self {
        Self {
            label,
            name,
            group,
            min: range.0,
            max: range.1,
            step,
            default,
        }
    }

    /// Number of steps between `min` and `max`
    pub fn steps(&self) -> i32 {
        (self.max - self.min) / self.step
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value) && (value - self.min) % self.step == 0
    }
}

use ControlGroup::{Exposure, Focus, Image, Position};

const CONTROLS: [ControlSpec; 15] = [
    ControlSpec::new("Zoom", "zoom_absolute", Position, (100, 500), 1, 100),
    ControlSpec::new("Pan", "pan_absolute", Position, (-36000, 36000), 3600, 0),
    ControlSpec::new("Tilt", "tilt_absolute", Position, (-36000, 36000), 3600, 0),
    ControlSpec::new("Autofocus", "focus_automatic_continuous", Focus, (0, 1), 1, 1),
    ControlSpec::new("Focus", "focus_absolute", Focus, (0, 255), 1, 30),
    ControlSpec::new("Brightness", "brightness", Image, (0, 255), 1, 128),
    ControlSpec::new("Contrast", "contrast", Image, (0, 255), 1, 128),
    ControlSpec::new("Sharpness", "sharpness", Image, (0, 255), 1, 128),
    ControlSpec::new("Saturation", "saturation", Image, (0, 255), 1, 128),
    ControlSpec::new("Gain", "gain", Image, (0, 255), 1, 0),
    ControlSpec::new("Backlight Comp", "backlight_compensation", Image, (0, 1), 1, 1),
    ControlSpec::new("Auto Exposure", "auto_exposure", Exposure, (0, 3), 1, 3),
    ControlSpec::new("Exposure Time", "exposure_time_absolute", Exposure, (3, 2047), 1, 250),
    ControlSpec::new("Auto WB", "white_balance_automatic", Exposure, (0, 1), 1, 1),
    ControlSpec::new("WB Temperature", "white_balance_temperature", Exposure, (2000, 7500), 10, 4000),
];

pub fn all_controls() -> &'static [ControlSpec] {
    &CONTROLS
}

pub fn find_control(name: &str) -> Option<&'static ControlSpec> {
    CONTROLS.iter().find(|c| c.name == name)
}

pub fn validate_control_value(name: &str, value: i32) -> Result<(), FocusError> {
    let spec = find_control(name)
        .ok_or_else(|| FocusError::ControlError(format!("control {name} not supported")))?;

    if value < spec.min {
        return Err(FocusError::ControlError(format!(
            "{name}={value} below minimum {}",
            spec.min
        )));
    }
    if value > spec.max {
        return Err(FocusError::ControlError(format!(
            "{name}={value} above maximum {}",
            spec.max
        )));
    }
    if (value - spec.min) % spec.step != 0 {
        return Err(FocusError::ControlError(format!(
            "{name}={value} not on step {}",
            spec.step
        )));
    }
    Ok(())
}

/// A named set of control values applied together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub label: &'static str,
    pub controls: Vec<ControlValue>,
}

impl Preset {
    pub fn apply(&self, actuator: &dyn FocusActuator) {
        log::info!("Applying preset '{}'", self.name);
        for control in &self.controls {
            actuator.set(&control.name, control.value);
        }
    }
}

pub const PRESET_NAMES: [&str; 3] = ["oled", "wide", "reset"];

pub fn preset(name: &str) -> Option<Preset> {
    match name {
        "oled" => Some(Preset {
            name: "oled",
            label: "OLED Closeup",
            controls: vec![
                ControlValue::new("zoom_absolute", 150),
                ControlValue::new("focus_automatic_continuous", 0),
                ControlValue::new("focus_absolute", 30),
                ControlValue::new("sharpness", 180),
            ],
        }),
        "wide" => Some(Preset {
            name: "wide",
            label: "Wide View",
            controls: vec![
                ControlValue::new("zoom_absolute", 100),
                ControlValue::new("focus_automatic_continuous", 1),
            ],
        }),
        "reset" => Some(Preset {
            name: "reset",
            label: "Reset Defaults",
            controls: CONTROLS
                .iter()
                .map(|c| ControlValue::new(c.name, c.default))
                .collect(),
        }),
        _ => None,
    }
}

/// Write a random on-step, in-range value to every control, with continuous
/// autofocus forced off. Returns the applied values in schema order.
pub fn randomize_controls<R: Rng + ?Sized>(
    actuator: &dyn FocusActuator,
    rng: &mut R,
) -> Vec<ControlValue> {
    let values: Vec<ControlValue> = CONTROLS
        .iter()
        .map(|spec| {
            let value = if spec.name == "focus_automatic_continuous" {
                0
            } else {
                spec.min + rng.gen_range(0..=spec.steps()) * spec.step
            };
            ControlValue::new(spec.name, value)
        })
        .collect();

    for control in &values {
        actuator.set(&control.name, control.value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(String, i32)>>);

    impl FocusActuator for Recording {
        fn set(&self, control: &str, value: i32) {
            self.0.lock().unwrap().push((control.to_string(), value));
        }
    }

    #[test]
    fn test_schema_defaults_are_valid() {
        for spec in all_controls() {
            assert!(
                validate_control_value(spec.name, spec.default).is_ok(),
                "{} default out of range",
                spec.name
            );
        }
        assert_eq!(find_control("focus_absolute").unwrap().max, 255);
    }

    #[test]
    fn test_validate_rejects_out_of_range_and_off_step() {
        assert!(validate_control_value("focus_absolute", 256).is_err());
        assert!(validate_control_value("zoom_absolute", 99).is_err());
        assert!(validate_control_value("pan_absolute", 1800).is_err());
        assert!(validate_control_value("pan_absolute", 7200).is_ok());
        assert!(validate_control_value("no_such_control", 0).is_err());
    }

    #[test]
    fn test_randomize_stays_on_schema() {
        let actuator = Recording::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let values = randomize_controls(&actuator, &mut rng);
            assert_eq!(values.len(), all_controls().len());
            for control in &values {
                assert!(validate_control_value(&control.name, control.value).is_ok());
            }
            let autofocus = values
                .iter()
                .find(|c| c.name == "focus_automatic_continuous")
                .unwrap();
            assert_eq!(autofocus.value, 0);
        }
        assert_eq!(actuator.0.lock().unwrap().len(), 20 * all_controls().len());
    }

    #[test]
    fn test_presets() {
        let reset = preset("reset").unwrap();
        assert_eq!(reset.controls.len(), all_controls().len());

        let actuator = Recording::default();
        preset("oled").unwrap().apply(&actuator);
        let writes = actuator.0.lock().unwrap();
        assert!(writes.contains(&("zoom_absolute".to_string(), 150)));
        assert!(writes.contains(&("focus_automatic_continuous".to_string(), 0)));

        assert!(preset("macro").is_none());
        assert!(PRESET_NAMES.iter().all(|name| preset(name).is_some()));
    }
}

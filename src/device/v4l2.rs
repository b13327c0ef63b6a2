use super::FocusActuator;
use std::process::Command;

/// Writes controls through the `v4l2-ctl` utility.
#[derive(Debug, Clone)]
pub struct V4l2CtlActuator {
    device: String,
    program: String,
}

impl V4l2CtlActuator {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            program: "v4l2-ctl".to_string(),
        }
    }

    /// Use a different executable (for wrappers or tests)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn command_args(&self, control: &str, value: i32) -> Vec<String> {
        vec![
            "-d".to_string(),
            self.device.clone(),
            "--set-ctrl".to_string(),
            format!("{}={}", control, value),
        ]
    }
}

impl FocusActuator for V4l2CtlActuator {
    fn set(&self, control: &str, value: i32) {
        let output = Command::new(&self.program)
            .args(self.command_args(control, value))
            .output();

        match output {
            Ok(out) if out.status.success() => {
                log::debug!("{} {}={}", self.device, control, value);
            }
            Ok(out) => {
                log::warn!(
                    "v4l2-ctl rejected {}={}: {}",
                    control,
                    value,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => {
                log::warn!("Failed to run {}: {}", self.program, e);
            }
        }
    }
}

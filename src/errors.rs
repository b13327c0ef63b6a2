use std::fmt;

#[derive(Debug)]
pub enum FocusError {
    /// The frame source could not deliver a frame; fatal for a run
    CaptureFailed(String),
    /// A device control could not be issued at all (transport failure)
    ControlError(String),
    /// A second run was triggered while one is in flight
    RunAlreadyInProgress,
    InvalidConfig(String),
    ConfigIo(String),
    /// The run's worker died before producing a result
    RunAborted(String),
}

impl fmt::Display for FocusError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FocusError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            FocusError::ControlError(msg) => write!(f, "Camera control error: {}", msg),
            FocusError::RunAlreadyInProgress => write!(f, "Autofocus already running"),
            FocusError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            FocusError::ConfigIo(msg) => write!(f, "Configuration I/O error: {}", msg),
            FocusError::RunAborted(msg) => write!(f, "Autofocus run aborted: {}", msg),
        }
    }
}

impl std::error::Error for FocusError {}

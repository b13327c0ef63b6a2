//! Run status published to observers
//!
//! The sweep is the only writer. Observers hold a `watch::Receiver` and read
//! snapshots; a snapshot may trail the run by an update, which is fine for
//! telemetry that never feeds back into control flow.

use crate::types::{FocusPosition, SweepStage};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running(SweepStage),
    Done,
    Error,
}

impl RunPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, RunPhase::Running(_))
    }

    /// Slot in the six-stage display, 0 when idle or finished.
    pub fn ui_index(&self) -> u8 {
        match self {
            RunPhase::Running(stage) => stage.ui_index(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Good,
    Warn,
    Header,
    Best,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Snapshot of one run as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    /// Short progress text such as `Coarse 3/13`; empty between steps
    pub progress: String,
    pub log: Vec<LogEntry>,
    pub final_focus: Option<FocusPosition>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            progress: String::new(),
            log: Vec::new(),
            final_focus: None,
        }
    }
}

/// Writer side of the run status channel.
///
/// Updates never block and never fail, with or without subscribers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: watch::Sender<RunStatus>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunStatus::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> RunStatus {
        self.tx.borrow().clone()
    }

    /// Reset for a new run.
    pub fn begin(&self) {
        self.tx.send_modify(|status| {
            *status = RunStatus {
                phase: RunPhase::Running(SweepStage::Scramble),
                ..RunStatus::default()
            };
        });
    }

    pub fn stage(&self, stage: SweepStage) {
        log::debug!("stage -> {}", stage);
        self.tx.send_modify(|status| status.phase = RunPhase::Running(stage));
    }

    pub fn progress(&self, text: impl Into<String>) {
        let text = text.into();
        self.tx.send_modify(|status| status.progress = text);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
            _ if message.is_empty() => {}
            _ => log::info!("{}", message),
        }
        self.tx
            .send_modify(|status| status.log.push(LogEntry { level, message }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message)
    }

    pub fn good(&self, message: impl Into<String>) {
        self.log(LogLevel::Good, message)
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message)
    }

    pub fn header(&self, message: impl Into<String>) {
        self.log(LogLevel::Header, message)
    }

    pub fn finish(&self, focus: FocusPosition) {
        self.tx.send_modify(|status| {
            status.phase = RunPhase::Done;
            status.progress.clear();
            status.final_focus = Some(focus);
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
        self.tx.send_modify(|status| {
            status.phase = RunPhase::Error;
            status.progress.clear();
        });
    }
}

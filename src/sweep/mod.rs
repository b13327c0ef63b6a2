//! Progressive coarse-to-fine focus search

pub mod controller;
pub mod plan;
pub mod progress;

pub use controller::{DiagnosticReport, SweepController};
pub use plan::{
    apply_offset, best_in_window, best_of, coarse_positions, dominance, refine_positions,
    should_bail, Window,
};
pub use progress::{LogEntry, LogLevel, ProgressReporter, RunPhase, RunStatus};

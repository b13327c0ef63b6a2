//! Single-flight run service
//!
//! At most one sweep runs at a time. The running flag is claimed with a
//! compare-and-set before anything else happens, so a second trigger is
//! rejected instead of queued, and released by a guard when the worker exits
//! (including by panic).

use crate::config::LiveParams;
use crate::errors::FocusError;
use crate::sweep::{RunStatus, SweepController};
use crate::types::RunResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A run in flight
pub struct RunHandle {
    handle: JoinHandle<Result<RunResult, FocusError>>,
}

impl RunHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunResult, FocusError> {
        self.handle
            .await
            .map_err(|e| FocusError::RunAborted(format!("Task join error: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Clone)]
pub struct AutofocusService {
    controller: Arc<SweepController>,
    running: Arc<AtomicBool>,
}

impl AutofocusService {
    pub fn new(controller: SweepController) -> Self {
        Self {
            controller: Arc::new(controller),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a run on the blocking pool. Must be called from within a tokio
    /// runtime.
    pub fn trigger(&self) -> Result<RunHandle, FocusError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                log::warn!("Autofocus trigger rejected, a run is already in progress");
                FocusError::RunAlreadyInProgress
            })?;
        let guard = RunGuard(self.running.clone());

        let controller = self.controller.clone();
        let reporter = controller.reporter().clone();
        let worker = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            controller.run()
        });

        let handle = tokio::spawn(async move {
            match worker.await {
                Ok(result) => result,
                Err(e) => {
                    reporter.fail(format!("Error: {}", e));
                    Err(FocusError::RunAborted(e.to_string()))
                }
            }
        });

        Ok(RunHandle { handle })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.controller.reporter().subscribe()
    }

    pub fn status(&self) -> RunStatus {
        self.controller.reporter().snapshot()
    }

    /// Offset and settle time, adjustable while a run is in flight
    pub fn live_params(&self) -> &Arc<LiveParams> {
        self.controller.live_params()
    }

    pub fn controller(&self) -> &Arc<SweepController> {
        &self.controller
    }
}

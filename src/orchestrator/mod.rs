//! Single-flight dispatch of worker requests.
//!
//! The [`Orchestrator`] is the one place the interactive side starts workers.
//! It accepts at most one request at a time, shows a progress indicator while
//! the worker runs, and turns the outcome into exactly one callback.

mod window;

pub use window::{Notifier, SampleWindow};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::worker::{FinalPayload, WorkerLauncher, WorkerObserver, WorkerOutcome, WorkerRequest};

/// Busy indicator shown while a worker is in flight.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressIndicator: Send + Sync {
    fn show(&self, label: &str);
    fn hide(&self);
}

/// Dispatches worker requests for one owner, one at a time.
#[derive(Clone)]
pub struct Orchestrator {
    launcher: Arc<dyn WorkerLauncher>,
    progress: Arc<dyn ProgressIndicator>,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag and hides the indicator when dropped, including when
/// the worker task panics.
struct BusyGuard {
    busy: Arc<AtomicBool>,
    progress: Arc<dyn ProgressIndicator>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.progress.hide();
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, progress: Arc<dyn ProgressIndicator>) -> Self {
        Self {
            launcher,
            progress,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a worker is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start `request` unless another request is in flight.
    ///
    /// Returns `None` and does nothing when busy; the call is not queued.
    /// Otherwise exactly one of `on_success` and `on_error` runs once the
    /// worker has exited, after the busy flag is cleared and the progress
    /// indicator hidden, so either callback may start the next request.
    pub fn run<F, E>(
        &self,
        request: WorkerRequest,
        mut observer: Box<dyn WorkerObserver>,
        on_success: F,
        on_error: E,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(FinalPayload) + Send + 'static,
        E: FnOnce(WorkerError) + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(operation = %request.kind(), "Worker already running, ignoring request");
            return None;
        }

        self.progress.show(&request.describe());
        let guard = BusyGuard {
            busy: Arc::clone(&self.busy),
            progress: Arc::clone(&self.progress),
        };
        let launcher = Arc::clone(&self.launcher);

        Some(tokio::spawn(async move {
            let outcome = launcher.launch(&request, observer.as_mut()).await;
            debug!(operation = %request.kind(), outcome = outcome_label(&outcome), "Worker finished");
            drop(guard);

            match outcome.into_result() {
                Ok(payload) => on_success(payload),
                Err(e) => on_error(e),
            }
        }))
    }
}

fn outcome_label(outcome: &WorkerOutcome) -> &'static str {
    match outcome {
        WorkerOutcome::Success(_) => "success",
        WorkerOutcome::PartialSuccess { .. } => "partial",
        WorkerOutcome::Failure(_) => "failure",
    }
}

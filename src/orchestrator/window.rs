use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Orchestrator;
use crate::error::{Notice, WorkerError};
use crate::mutation::SaveCommand;
use crate::store::{Sample, TaskId};
use crate::worker::{FinalPayload, NullObserver, WorkerObserver, WorkerRequest};

/// Surface for user-visible messages and document refreshes.
pub trait Notifier: Send + Sync {
    /// Show `message` as a status-bar message or a modal alert.
    fn notify(&self, notice: Notice, message: &str);

    /// The working copy was replaced.
    fn sample_changed(&self, sample: &Sample);
}

/// The interactive owner of one sample file.
///
/// Holds the data-stripped working copy, which is replaced wholesale by the
/// document every successful read or mutation returns and left untouched by
/// failures.
#[derive(Clone)]
pub struct SampleWindow {
    path: PathBuf,
    sample: Arc<RwLock<Option<Sample>>>,
    orchestrator: Orchestrator,
    notifier: Arc<dyn Notifier>,
}

impl SampleWindow {
    pub fn new(
        path: impl Into<PathBuf>,
        orchestrator: Orchestrator,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            path: path.into(),
            sample: Arc::new(RwLock::new(None)),
            orchestrator,
            notifier,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Snapshot of the working copy; `None` until the file has been read.
    pub fn sample(&self) -> Option<Sample> {
        self.sample.read().ok().and_then(|guard| guard.clone())
    }

    /// Read the sample file into the working copy.
    pub fn open(&self) -> Option<JoinHandle<()>> {
        self.submit_document(
            WorkerRequest::Read {
                path: self.path.clone(),
            },
            Box::new(NullObserver),
        )
    }

    /// Apply `command` to the sample file.
    pub fn save(&self, command: SaveCommand) -> Option<JoinHandle<()>> {
        self.submit_document(
            WorkerRequest::Save {
                path: self.path.clone(),
                command,
            },
            Box::new(NullObserver),
        )
    }

    /// Record the outcome of a run on `task`.
    ///
    /// Alerts the user when another worker holds the slot, since the outcome
    /// exists nowhere else.
    pub fn save_result(&self, task: &TaskId, command: SaveCommand) -> Option<JoinHandle<()>> {
        let handle = self.save(command);
        if handle.is_none() {
            self.report(&WorkerError::ResultNotSaved { task: task.clone() });
        }
        handle
    }

    /// Replace the sample file with `sample`.
    pub fn overwrite(&self, sample: Sample) -> Option<JoinHandle<()>> {
        self.submit_document(
            WorkerRequest::Overwrite {
                path: self.path.clone(),
                sample,
            },
            Box::new(NullObserver),
        )
    }

    /// Export `tasks` as CSV files into `write_dir`.
    pub fn export(&self, write_dir: impl Into<PathBuf>, tasks: Vec<TaskId>) -> Option<JoinHandle<()>> {
        let request = WorkerRequest::Export {
            read_path: self.path.clone(),
            write_dir: write_dir.into(),
            tasks,
        };
        let on_success = self.clone();
        let on_error = self.clone();
        self.orchestrator.run(
            request,
            Box::new(NullObserver),
            move |payload| match payload {
                FinalPayload::Exported(tasks) => on_success
                    .notifier
                    .notify(Notice::StatusBar, &format!("Exported {} replicate(s)", tasks.len())),
                other => on_success.unexpected(&other),
            },
            move |e| on_error.report(&e),
        )
    }

    /// Submit a request whose success payload is a document.
    pub(crate) fn submit_document(
        &self,
        request: WorkerRequest,
        observer: Box<dyn WorkerObserver>,
    ) -> Option<JoinHandle<()>> {
        let on_success = self.clone();
        let on_error = self.clone();
        self.orchestrator.run(
            request,
            observer,
            move |payload| match payload {
                FinalPayload::Document(sample) => on_success.replace(sample),
                other => on_success.unexpected(&other),
            },
            move |e| on_error.report(&e),
        )
    }

    fn replace(&self, sample: Sample) {
        match self.sample.write() {
            Ok(mut slot) => *slot = Some(sample.clone()),
            Err(_) => {
                warn!(path = %self.path.display(), "Working copy lock poisoned, not replaced");
                return;
            }
        }
        info!(
            path = %self.path.display(),
            runs = sample.runs.len(),
            methods = sample.methods.len(),
            "Working copy replaced"
        );
        self.notifier.sample_changed(&sample);
    }

    /// Surface a worker failure to the user.
    pub(crate) fn report(&self, e: &WorkerError) {
        warn!(path = %self.path.display(), error = %e, "Worker request failed");
        self.notifier.notify(e.notice(), &e.to_string());
    }

    fn unexpected(&self, payload: &FinalPayload) {
        self.report(&WorkerError::Protocol {
            message: format!("unexpected {} payload", payload_kind(payload)),
        });
    }
}

fn payload_kind(payload: &FinalPayload) -> &'static str {
    match payload {
        FinalPayload::Document(_) => "document",
        FinalPayload::Exported(_) => "export",
        FinalPayload::RunFinished(_) => "run summary",
    }
}

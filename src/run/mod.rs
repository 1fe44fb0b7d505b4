//! Interactive side of a live device run.
//!
//! [`RunController::start_run`] turns a replicate's method into a `run`
//! worker request, streams the worker's messages to a [`RunObserver`] while
//! recording the collected telemetry, and once the worker exits saves the
//! outcome back into the sample file: the recorded data with status
//! `success`, or status `error` with any earlier data left in place.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::mutation::{ReplicateDataParams, ReplicateFieldsParams, SaveCommand};
use crate::orchestrator::SampleWindow;
use crate::store::{DataPoint, Method, Relay, Replicate, ReplicateStatus, TaskId};
use crate::worker::{FinalPayload, RunSpec, WorkerMessage, WorkerObserver, WorkerRequest};

/// Receives live progress of a run. Every method defaults to a no-op.
pub trait RunObserver: Send {
    fn on_status(&mut self, _text: &str) {}
    fn on_port(&mut self, _port: &str) {}
    fn on_relay(&mut self, _relay: Relay, _state: bool) {}
    fn on_point(&mut self, _point: DataPoint) {}
}

/// Operator choices that are not part of the method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSettings {
    pub preferred_port: Option<String>,
    pub relays_enabled: bool,
}

/// Forwards run messages to a [`RunObserver`] and keeps the telemetry.
struct TelemetryRecorder {
    points: Arc<Mutex<Vec<DataPoint>>>,
    observer: Box<dyn RunObserver>,
}

impl WorkerObserver for TelemetryRecorder {
    fn on_message(&mut self, message: &WorkerMessage) {
        match message {
            WorkerMessage::Status(text) => self.observer.on_status(text),
            WorkerMessage::PortInfo(port) => self.observer.on_port(port),
            WorkerMessage::RelayState { relay, state } => self.observer.on_relay(*relay, *state),
            WorkerMessage::Telemetry(point) => {
                if let Ok(mut points) = self.points.lock() {
                    points.push(*point);
                }
                self.observer.on_point(*point);
            }
            WorkerMessage::TaskResult(_) | WorkerMessage::Final(_) | WorkerMessage::Fatal(_) => {}
        }
    }
}

/// Starts runs for the replicates of one sample window.
#[derive(Clone)]
pub struct RunController {
    window: SampleWindow,
}

impl RunController {
    pub fn new(window: SampleWindow) -> Self {
        Self { window }
    }

    /// The `run` worker request for `method`.
    pub fn request(method: &Method, settings: &RunSettings) -> WorkerRequest {
        WorkerRequest::Run(RunSpec {
            sample_interval_ms: method.sample_interval_ms,
            current_range: method.current_range.clone(),
            steps: method.steps.clone(),
            preferred_port: settings.preferred_port.clone(),
            relays_enabled: settings.relays_enabled,
        })
    }

    /// Run the method of `task`'s run and record the result on `task`.
    ///
    /// Fails when the working copy is not loaded or `task` does not resolve.
    /// Returns `Ok(None)` when another worker is in flight.
    pub fn start_run(
        &self,
        task: TaskId,
        settings: &RunSettings,
        observer: Box<dyn RunObserver>,
    ) -> StoreResult<Option<JoinHandle<()>>> {
        let sample = self
            .window
            .sample()
            .ok_or_else(|| StoreError::not_found("Sample", self.window.path().display().to_string()))?;
        let run = sample
            .run(&task.run_id)
            .ok_or_else(|| StoreError::not_found("Run", &task.run_id))?;
        let previous = run
            .replicate(&task.rep_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Replicate", task.to_string()))?;
        let method = sample
            .method(&run.method_id)
            .ok_or_else(|| StoreError::not_found("Method", &run.method_id))?;

        let points = Arc::new(Mutex::new(Vec::new()));
        let recorder = TelemetryRecorder {
            points: Arc::clone(&points),
            observer,
        };

        let on_success = self.window.clone();
        let on_error = self.window.clone();
        let success_task = task.clone();
        let success_previous = previous.clone();
        info!(task = %task, method_id = %method.id, "Starting run");

        Ok(self.window.orchestrator().run(
            Self::request(method, settings),
            Box::new(recorder),
            move |payload| {
                if let FinalPayload::RunFinished(summary) = &payload {
                    info!(task = %success_task, port = %summary.port, points = summary.points, "Run complete");
                }
                let data = points.lock().map(|p| p.clone()).unwrap_or_default();
                on_success.save_result(
                    &success_task,
                    completed(&success_task, &success_previous, data),
                );
            },
            move |e| {
                warn!(task = %task, error = %e, "Run failed");
                on_error.report(&e);
                on_error.save_result(&task, failed(&task, &previous));
            },
        ))
    }
}

/// Command recording a successful attempt with its data.
pub fn completed(task: &TaskId, previous: &Replicate, data: Vec<DataPoint>) -> SaveCommand {
    SaveCommand::ReplaceReplicateWithData(ReplicateDataParams {
        run_id: task.run_id.clone(),
        rep_id: task.rep_id.clone(),
        replicate: Replicate {
            id: task.rep_id.clone(),
            status: ReplicateStatus::Success,
            last_attempt: Some(Utc::now()),
            notes: previous.notes.clone(),
            data,
            background: None,
        },
    })
}

/// Command recording a failed attempt; stored data is kept.
pub fn failed(task: &TaskId, previous: &Replicate) -> SaveCommand {
    let mut fields = previous.fields();
    fields.status = ReplicateStatus::Error;
    fields.last_attempt = Some(Utc::now());
    SaveCommand::ReplaceReplicateFields(ReplicateFieldsParams {
        run_id: task.run_id.clone(),
        rep_id: task.rep_id.clone(),
        fields,
    })
}

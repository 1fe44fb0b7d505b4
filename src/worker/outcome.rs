use tracing::warn;

use super::{OperationKind, WorkerMessage};
use crate::device::RunSummary;
use crate::error::{WorkerError, WorkerResult};
use crate::store::{Sample, TaskId};

/// Decoded final payload of a successful worker.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalPayload {
    /// Data-stripped document after read, save or overwrite.
    Document(Sample),
    /// Every export task succeeded.
    Exported(Vec<TaskId>),
    /// The device run completed.
    RunFinished(RunSummary),
}

/// What a worker invocation amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Success(FinalPayload),
    /// Some, but not all, export tasks failed.
    PartialSuccess {
        succeeded: Vec<TaskId>,
        failed: Vec<TaskId>,
    },
    /// User-facing failure message.
    Failure(String),
}

impl WorkerOutcome {
    pub fn into_result(self) -> WorkerResult<FinalPayload> {
        match self {
            WorkerOutcome::Success(payload) => Ok(payload),
            WorkerOutcome::PartialSuccess { succeeded, failed } => {
                Err(WorkerError::PartialExport { succeeded, failed })
            }
            WorkerOutcome::Failure(message) => Err(WorkerError::ProcessFailure { message }),
        }
    }
}

/// Folds the messages of one worker into its [`WorkerOutcome`].
#[derive(Debug)]
pub struct OutcomeCollector {
    kind: OperationKind,
    succeeded: Vec<TaskId>,
    failed: Vec<TaskId>,
    final_line: Option<String>,
    fatal: Vec<String>,
}

impl OutcomeCollector {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            succeeded: Vec::new(),
            failed: Vec::new(),
            final_line: None,
            fatal: Vec::new(),
        }
    }

    /// Record one message. Status, telemetry, port and relay messages do not
    /// affect the outcome.
    pub fn observe(&mut self, message: &WorkerMessage) {
        match message {
            WorkerMessage::TaskResult(Ok(task)) => self.succeeded.push(task.clone()),
            WorkerMessage::TaskResult(Err(task)) => self.failed.push(task.clone()),
            WorkerMessage::Final(line) => {
                if self.final_line.is_some() {
                    warn!(operation = %self.kind, "Worker sent more than one final payload, keeping the first");
                } else {
                    self.final_line = Some(line.clone());
                }
            }
            WorkerMessage::Fatal(text) => self.fatal.push(text.clone()),
            WorkerMessage::Status(_)
            | WorkerMessage::Telemetry(_)
            | WorkerMessage::PortInfo(_)
            | WorkerMessage::RelayState { .. } => {}
        }
    }

    /// Decide the outcome once the worker has exited with `exit_code`
    /// (`None` when it was killed by a signal).
    ///
    /// Fatal stderr text wins over everything else. A task reported as both
    /// exported and failed counts as failed.
    pub fn finish(mut self, exit_code: Option<i32>) -> WorkerOutcome {
        if !self.fatal.is_empty() {
            return WorkerOutcome::Failure(self.fatal.join("\n"));
        }
        if exit_code != Some(0) {
            return WorkerOutcome::Failure(match exit_code {
                Some(code) => format!("{} worker exited with status {}", self.kind, code),
                None => format!("{} worker was terminated", self.kind),
            });
        }

        if self.kind == OperationKind::Export {
            let failed = std::mem::take(&mut self.failed);
            self.succeeded.retain(|t| !failed.contains(t));
            return match (self.succeeded.is_empty(), failed.is_empty()) {
                (_, true) => WorkerOutcome::Success(FinalPayload::Exported(self.succeeded)),
                (true, false) => {
                    WorkerOutcome::Failure(format!("All {} export task(s) failed", failed.len()))
                }
                (false, false) => WorkerOutcome::PartialSuccess {
                    succeeded: self.succeeded,
                    failed,
                },
            };
        }

        let Some(line) = self.final_line else {
            return WorkerOutcome::Failure(format!("{} worker exited without a result", self.kind));
        };
        let decoded = if self.kind == OperationKind::Run {
            serde_json::from_str(&line).map(FinalPayload::RunFinished)
        } else {
            serde_json::from_str(&line).map(FinalPayload::Document)
        };
        match decoded {
            Ok(payload) => WorkerOutcome::Success(payload),
            Err(e) => WorkerOutcome::Failure(
                WorkerError::Protocol {
                    message: format!("undecodable {} result: {}", self.kind, e),
                }
                .to_string(),
            ),
        }
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::OperationKind;
use crate::error::{WorkerError, WorkerResult};
use crate::mutation::SaveCommand;
use crate::store::{Sample, Step, TaskId};

/// Argument standing in for a payload delivered on stdin.
pub const STDIN_ARG: &str = "-";

/// Longest JSON payload passed inline; Linux caps a single argument at 128 KiB.
pub const INLINE_PAYLOAD_LIMIT: usize = 64 * 1024;

/// Command line of a worker invocation.
///
/// Each operation carries at most one JSON payload. When it is longer than
/// [`INLINE_PAYLOAD_LIMIT`] it is replaced by [`STDIN_ARG`] and written to the
/// worker's stdin instead.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerArgs {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

/// Parameters of a live device run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub sample_interval_ms: u32,
    /// Device current-range label.
    pub current_range: String,
    /// Method steps before relay bracketing.
    pub steps: Vec<Step>,
    /// Port probed first; other candidates follow.
    pub preferred_port: Option<String>,
    /// When false, relay flags and toggles are ignored.
    pub relays_enabled: bool,
}

/// One operation delegated to a worker process.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    Read {
        path: PathBuf,
    },
    Save {
        path: PathBuf,
        command: SaveCommand,
    },
    Overwrite {
        path: PathBuf,
        sample: Sample,
    },
    Export {
        read_path: PathBuf,
        write_dir: PathBuf,
        tasks: Vec<TaskId>,
    },
    Run(RunSpec),
}

impl WorkerRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            WorkerRequest::Read { .. } => OperationKind::Read,
            WorkerRequest::Save { .. } => OperationKind::Save,
            WorkerRequest::Overwrite { .. } => OperationKind::Overwrite,
            WorkerRequest::Export { .. } => OperationKind::Export,
            WorkerRequest::Run(_) => OperationKind::Run,
        }
    }

    /// Positional command-line arguments, operation name first.
    ///
    /// A run without a preferred port passes an empty string in its place.
    pub fn to_args(&self) -> WorkerResult<WorkerArgs> {
        let mut args = vec![self.kind().to_string()];
        let mut stdin = None;
        let mut payload = |json: String| {
            if json.len() > INLINE_PAYLOAD_LIMIT {
                stdin = Some(json);
                STDIN_ARG.to_string()
            } else {
                json
            }
        };

        match self {
            WorkerRequest::Read { path } => args.push(path_arg(path)),
            WorkerRequest::Save { path, command } => {
                args.push(path_arg(path));
                args.push(command.save_type().to_string());
                args.push(payload(command.params_json().map_err(protocol_error)?));
            }
            WorkerRequest::Overwrite { path, sample } => {
                args.push(path_arg(path));
                args.push(payload(serde_json::to_string(sample).map_err(protocol_error)?));
            }
            WorkerRequest::Export {
                read_path,
                write_dir,
                tasks,
            } => {
                args.push(path_arg(read_path));
                args.push(path_arg(write_dir));
                args.push(payload(serde_json::to_string(tasks).map_err(protocol_error)?));
            }
            WorkerRequest::Run(spec) => {
                args.push(spec.sample_interval_ms.to_string());
                args.push(spec.current_range.clone());
                args.push(payload(serde_json::to_string(&spec.steps).map_err(protocol_error)?));
                args.push(spec.preferred_port.clone().unwrap_or_default());
                args.push(spec.relays_enabled.to_string());
            }
        }
        Ok(WorkerArgs { args, stdin })
    }

    /// Short description for progress indicators.
    pub fn describe(&self) -> String {
        match self {
            WorkerRequest::Read { path } => format!("Opening {}", path.display()),
            WorkerRequest::Save { command, .. } => format!("Saving ({})", command.save_type()),
            WorkerRequest::Overwrite { .. } => "Saving sample".to_string(),
            WorkerRequest::Export { tasks, .. } => format!("Exporting {} replicate(s)", tasks.len()),
            WorkerRequest::Run(_) => "Running method".to_string(),
        }
    }
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

fn protocol_error(e: serde_json::Error) -> WorkerError {
    WorkerError::Protocol {
        message: e.to_string(),
    }
}

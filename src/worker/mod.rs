//! Worker processes and the framed protocol they speak.
//!
//! Every blocking operation runs in a short-lived child process started with
//! positional arguments ([`WorkerRequest::to_args`]); a JSON payload too long
//! for one argument is passed as `-` and written to the child's stdin. The
//! child reports over
//! two channels: stdout carries prefixed status, telemetry, port and relay
//! lines plus one unprefixed final payload, and stderr carries failed export
//! tasks or a fatal message. The parent decodes both streams into
//! [`WorkerMessage`]s and folds them into exactly one [`WorkerOutcome`].

mod child;
mod outcome;
mod protocol;
mod request;
mod spawn;
mod status_log;

pub use child::execute;
pub use outcome::{FinalPayload, OutcomeCollector, WorkerOutcome};
pub use protocol::{decode_stderr, decode_stdout, Channel, FrameSink, FrameWriter, WorkerMessage};
pub use request::{RunSpec, WorkerArgs, WorkerRequest, INLINE_PAYLOAD_LIMIT, STDIN_ARG};
pub use spawn::{spawn, NullObserver, ProcessLauncher, WorkerHandle, WorkerLauncher, WorkerObserver};
pub use status_log::StatusLineWriter;

use serde::{Deserialize, Serialize};

/// The operation a worker performs; first positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Save,
    Overwrite,
    Export,
    Run,
}

impl OperationKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Save => "save",
            OperationKind::Overwrite => "overwrite",
            OperationKind::Export => "export",
            OperationKind::Run => "run",
        }
    }

    /// Whether the final payload is a sample document.
    pub fn returns_document(&self) -> bool {
        matches!(
            self,
            OperationKind::Read | OperationKind::Save | OperationKind::Overwrite
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(OperationKind::Read),
            "save" => Ok(OperationKind::Save),
            "overwrite" => Ok(OperationKind::Overwrite),
            "export" => Ok(OperationKind::Export),
            "run" => Ok(OperationKind::Run),
            _ => Err(format!("Unknown worker operation: {}", s)),
        }
    }
}

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{decode_stderr, decode_stdout, OperationKind, OutcomeCollector, WorkerMessage};
use super::{WorkerOutcome, WorkerRequest};
use crate::error::{WorkerError, WorkerResult};

/// Receives every message of a worker as it arrives.
pub trait WorkerObserver: Send {
    fn on_message(&mut self, message: &WorkerMessage);
}

/// Observer that ignores everything.
pub struct NullObserver;

impl WorkerObserver for NullObserver {
    fn on_message(&mut self, _message: &WorkerMessage) {}
}

/// A running worker process.
pub struct WorkerHandle {
    kind: OperationKind,
    child: Child,
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
}

/// Start `program` as a worker for `request`.
///
/// Both output streams are read on their own tasks; lines of each stream
/// arrive in order, with no ordering between the two. A payload moved off the
/// command line is written to stdin on a task of its own, then stdin closes.
pub fn spawn(program: &Path, request: &WorkerRequest) -> WorkerResult<WorkerHandle> {
    let kind = request.kind();
    let invocation = request.to_args()?;
    let stdin = if invocation.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };

    let mut child = Command::new(program)
        .args(&invocation.args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(WorkerError::Spawn)?;

    let stdout = child.stdout.take().ok_or_else(|| WorkerError::Protocol {
        message: "worker stdout was not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| WorkerError::Protocol {
        message: "worker stderr was not captured".to_string(),
    })?;

    info!(operation = %kind, pid = ?child.id(), "Worker started");

    if let Some(payload) = invocation.stdin {
        let mut input = child.stdin.take().ok_or_else(|| WorkerError::Protocol {
            message: "worker stdin was not captured".to_string(),
        })?;
        debug!(operation = %kind, bytes = payload.len(), "Writing payload to worker stdin");
        tokio::spawn(async move {
            if let Err(e) = input.write_all(payload.as_bytes()).await {
                warn!(error = %e, "Failed to write worker payload");
            }
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_lines(stdout, tx.clone(), move |line| {
        decode_stdout(kind, line)
    }));
    tokio::spawn(read_lines(stderr, tx, |line| Ok(decode_stderr(line))));

    Ok(WorkerHandle {
        kind,
        child,
        messages: rx,
    })
}

/// Forward decoded lines of `stream` until it closes.
async fn read_lines<R, F>(stream: R, tx: mpsc::UnboundedSender<WorkerMessage>, decode: F)
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> WorkerResult<WorkerMessage>,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read worker output");
                break;
            }
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        match decode(trimmed) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, line = %trimmed, "Skipping undecodable worker line"),
        }
    }
}

impl WorkerHandle {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// OS process id, while the worker is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Drain both streams, wait for exit and decide the outcome.
    pub async fn finish(mut self, observer: &mut dyn WorkerObserver) -> WorkerOutcome {
        let mut collector = OutcomeCollector::new(self.kind);
        while let Some(message) = self.messages.recv().await {
            observer.on_message(&message);
            collector.observe(&message);
        }

        let exit_code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "Failed to wait for worker");
                None
            }
        };
        debug!(operation = %self.kind, exit_code = ?exit_code, "Worker exited");
        collector.finish(exit_code)
    }
}

/// Runs worker requests to completion.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        request: &WorkerRequest,
        observer: &mut dyn WorkerObserver,
    ) -> WorkerOutcome;
}

/// Launches workers as child processes of `program`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        request: &WorkerRequest,
        observer: &mut dyn WorkerObserver,
    ) -> WorkerOutcome {
        match spawn(&self.program, request) {
            Ok(handle) => handle.finish(observer).await,
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "Worker could not be started");
                WorkerOutcome::Failure(e.to_string())
            }
        }
    }
}

use std::io::{self, Read};
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::error::{AppError, StoreError};
use crate::mutation::{SaveCommand, SaveType};
use crate::worker::{RunSpec, WorkerRequest, STDIN_ARG};

/// Worker process for voltammetry sample files and potentiostat runs.
///
/// Writes framed status, telemetry and results to stdout, and failed export
/// tasks or a fatal message to stderr. A JSON argument given as `-` is read
/// from stdin.
#[derive(Debug, Parser)]
#[command(name = "voltammetry-worker", version, about)]
pub struct WorkerCli {
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// One worker operation with its positional arguments.
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Read a sample file
    Read { path: PathBuf },
    /// Apply a save command to a sample file
    Save {
        path: PathBuf,
        save_type: SaveType,
        /// Command parameters as JSON
        params: String,
    },
    /// Replace a sample file with a document
    Overwrite {
        path: PathBuf,
        /// Sample document as JSON
        document: String,
    },
    /// Export replicates as CSV
    Export {
        read_path: PathBuf,
        write_dir: PathBuf,
        /// JSON list of [run_id, rep_id] pairs
        tasks: String,
    },
    /// Execute a method on a potentiostat
    Run {
        sample_interval_ms: u32,
        current_range: String,
        /// Step list as JSON
        steps: String,
        /// Port to probe first; empty for none
        preferred_port: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        relays_enabled: bool,
    },
}

impl WorkerCommand {
    /// Replace a `-` JSON argument with everything readable from `input`.
    pub fn read_payload(mut self, mut input: impl Read) -> io::Result<Self> {
        let slot = match &mut self {
            WorkerCommand::Read { .. } => None,
            WorkerCommand::Save { params, .. } => Some(params),
            WorkerCommand::Overwrite { document, .. } => Some(document),
            WorkerCommand::Export { tasks, .. } => Some(tasks),
            WorkerCommand::Run { steps, .. } => Some(steps),
        };
        if let Some(slot) = slot.filter(|s| s.as_str() == STDIN_ARG) {
            let mut payload = String::new();
            input.read_to_string(&mut payload)?;
            *slot = payload;
        }
        Ok(self)
    }
}

impl TryFrom<WorkerCommand> for WorkerRequest {
    type Error = AppError;

    fn try_from(command: WorkerCommand) -> Result<Self, Self::Error> {
        let request = match command {
            WorkerCommand::Read { path } => WorkerRequest::Read { path },
            WorkerCommand::Save {
                path,
                save_type,
                params,
            } => WorkerRequest::Save {
                path,
                command: SaveCommand::from_parts(save_type, &params)?,
            },
            WorkerCommand::Overwrite { path, document } => WorkerRequest::Overwrite {
                path,
                sample: parse_argument("overwrite", &document)?,
            },
            WorkerCommand::Export {
                read_path,
                write_dir,
                tasks,
            } => WorkerRequest::Export {
                read_path,
                write_dir,
                tasks: parse_argument("export", &tasks)?,
            },
            WorkerCommand::Run {
                sample_interval_ms,
                current_range,
                steps,
                preferred_port,
                relays_enabled,
            } => WorkerRequest::Run(RunSpec {
                sample_interval_ms,
                current_range,
                steps: parse_argument("run", &steps)?,
                preferred_port: Some(preferred_port).filter(|p| !p.is_empty()),
                relays_enabled,
            }),
        };
        Ok(request)
    }
}

fn parse_argument<T: serde::de::DeserializeOwned>(operation: &str, json: &str) -> Result<T, AppError> {
    serde_json::from_str(json).map_err(|e| {
        StoreError::InvalidCommand {
            save_type: operation.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

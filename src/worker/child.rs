use tracing::info;

use super::{FrameSink, WorkerMessage, WorkerRequest};
use crate::context::AppContext;
use crate::device::RunExecutor;
use crate::error::{AppError, AppResult};
use crate::{export, mutation, store};

/// Perform `request` inside a worker process, writing every message to `sink`.
///
/// Errors returned here are fatal for the whole invocation; the caller
/// reports them on the error channel. Failed export tasks are not errors.
pub async fn execute<S: FrameSink + Send>(
    request: &WorkerRequest,
    ctx: &AppContext,
    sink: &mut S,
) -> AppResult<()> {
    info!(operation = %request.kind(), "Worker executing");

    match request {
        WorkerRequest::Read { path } => {
            let sample = store::load(&ctx.resolve(path))?;
            emit_document(&sample, sink)
        }
        WorkerRequest::Save { path, command } => {
            let path = ctx.resolve(path);
            let sample = store::load(&path)?;
            let updated = mutation::apply(&sample, command)?;
            store::persist(&path, &updated)?;
            info!(save_type = %command.save_type(), path = %path.display(), "Sample saved");
            emit_document(&updated, sink)
        }
        WorkerRequest::Overwrite { path, sample } => {
            let path = ctx.resolve(path);
            store::persist(&path, sample)?;
            info!(path = %path.display(), "Sample overwritten");
            emit_document(sample, sink)
        }
        WorkerRequest::Export {
            read_path,
            write_dir,
            tasks,
        } => {
            let sample = store::load(&ctx.resolve(read_path))?;
            let write_dir = ctx.resolve(write_dir);
            std::fs::create_dir_all(&write_dir)?;
            let exported = export::export_all(&sample, tasks, &write_dir, sink)?;
            info!(exported, failed = tasks.len() - exported, "Export finished");
            Ok(())
        }
        WorkerRequest::Run(spec) => {
            let connector = ctx.connector()?;
            let mut executor = RunExecutor::new(connector.as_ref(), &ctx.devices);
            let summary = executor.execute(spec, sink).await?;
            sink.emit(WorkerMessage::Final(to_json(&summary)?))?;
            Ok(())
        }
    }
}

/// Emit the data-stripped document as the final payload.
fn emit_document<S: FrameSink>(sample: &store::Sample, sink: &mut S) -> AppResult<()> {
    sink.emit(WorkerMessage::Final(to_json(&sample.without_data())?))?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| AppError::Internal {
        message: format!("failed to serialize result: {}", e),
    })
}

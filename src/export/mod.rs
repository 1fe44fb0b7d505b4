//! CSV export of recorded replicates.
//!
//! Each task writes one file named `<sample>_<run>_<rep>.csv`. Tasks are
//! independent: a task that fails is reported and the rest still run.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{Sample, TaskId};
use crate::worker::{FrameSink, WorkerMessage};

/// File name for `task` of `sample`.
pub fn file_name(sample: &Sample, task: &TaskId) -> String {
    format!(
        "{}_{}_{}.csv",
        sanitize(&sample.name),
        sanitize(&task.run_id),
        sanitize(&task.rep_id)
    )
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "sample".to_string()
    } else {
        cleaned
    }
}

/// Write the data of one replicate into `write_dir`, returning the file path.
///
/// Columns are `time,voltage,current`, plus `background_current` when the
/// replicate has a background series; background rows are matched by index.
pub fn export_replicate(sample: &Sample, task: &TaskId, write_dir: &Path) -> StoreResult<PathBuf> {
    let replicate = sample
        .replicate(task)
        .ok_or_else(|| StoreError::not_found("Replicate", task.to_string()))?;
    if !replicate.has_data() {
        return Err(StoreError::NoData {
            task: task.to_string(),
        });
    }

    let path = write_dir.join(file_name(sample, task));
    let mut writer = csv::Writer::from_path(&path)?;

    let background = replicate.background.as_deref();
    let mut header = vec!["time", "voltage", "current"];
    if background.is_some() {
        header.push("background_current");
    }
    writer.write_record(&header)?;

    for (index, point) in replicate.data.iter().enumerate() {
        let mut row = vec![
            point.time.to_string(),
            point.voltage.to_string(),
            point.current.to_string(),
        ];
        if let Some(background) = background {
            row.push(
                background
                    .get(index)
                    .map(|b| b.current.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(path)
}

/// Export every task, reporting each as a success or failure message.
///
/// Returns the number of tasks exported.
pub fn export_all<S: FrameSink>(
    sample: &Sample,
    tasks: &[TaskId],
    write_dir: &Path,
    sink: &mut S,
) -> std::io::Result<usize> {
    let mut exported = 0;
    for task in tasks {
        match export_replicate(sample, task, write_dir) {
            Ok(path) => {
                info!(task = %task, path = %path.display(), "Exported replicate");
                sink.emit(WorkerMessage::TaskResult(Ok(task.clone())))?;
                exported += 1;
            }
            Err(e) => {
                warn!(task = %task, error = %e, "Export task failed");
                sink.emit(WorkerMessage::TaskResult(Err(task.clone())))?;
            }
        }
    }
    Ok(exported)
}

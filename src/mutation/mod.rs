//! Named mutations of a sample document.
//!
//! Every change the interactive process makes to a sample file goes through
//! one [`SaveCommand`]. A command travels to a worker as a save-type tag plus
//! its JSON parameters and is applied there with [`apply`], which never
//! touches the input and either returns the complete updated sample or an
//! error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    self, Method, Replicate, ReplicateFields, Run, RunFields, Sample, SampleMetadata, TaskId,
};

/// Wire tag identifying a save command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveType {
    /// `sample`
    Sample,
    /// `new-run`
    NewRun,
    /// `rep-delete`
    RepDelete,
    /// `rep-mod`
    RepMod,
    /// `rep-mod-with-data`
    RepModWithData,
    /// `run-mod`
    RunMod,
    /// `method-to-sample`
    MethodToSample,
    /// `method-mod`
    MethodMod,
}

impl SaveType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveType::Sample => "sample",
            SaveType::NewRun => "new-run",
            SaveType::RepDelete => "rep-delete",
            SaveType::RepMod => "rep-mod",
            SaveType::RepModWithData => "rep-mod-with-data",
            SaveType::RunMod => "run-mod",
            SaveType::MethodToSample => "method-to-sample",
            SaveType::MethodMod => "method-mod",
        }
    }
}

impl std::fmt::Display for SaveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SaveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sample" => Ok(SaveType::Sample),
            "new-run" => Ok(SaveType::NewRun),
            "rep-delete" => Ok(SaveType::RepDelete),
            "rep-mod" => Ok(SaveType::RepMod),
            "rep-mod-with-data" => Ok(SaveType::RepModWithData),
            "run-mod" => Ok(SaveType::RunMod),
            "method-to-sample" => Ok(SaveType::MethodToSample),
            "method-mod" => Ok(SaveType::MethodMod),
            _ => Err(format!("Unknown save type: {}", s)),
        }
    }
}

/// Parameters of `new-run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRunParams {
    /// The run to append, with its replicates.
    pub run: Run,
    /// A fresh method the run is configured with; appended first and
    /// referenced by the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
}

/// Parameters of `rep-mod`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateFieldsParams {
    pub run_id: String,
    pub rep_id: String,
    pub fields: ReplicateFields,
}

/// Parameters of `rep-mod-with-data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateDataParams {
    pub run_id: String,
    pub rep_id: String,
    pub replicate: Replicate,
}

/// Parameters of `run-mod`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFieldsParams {
    pub run_id: String,
    pub fields: RunFields,
}

/// Parameters of `method-mod`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodParams {
    pub method_id: String,
    pub method: Method,
}

/// A named mutation of a sample document.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveCommand {
    /// Overwrite the editable sample metadata.
    UpdateSampleMetadata(SampleMetadata),
    /// Append a run, optionally with the fresh method it uses.
    AddRun(NewRunParams),
    /// Remove replicates, then empty runs, then orphaned methods.
    DeleteReplicates(Vec<TaskId>),
    /// Replace replicate metadata, keeping its data.
    ReplaceReplicateFields(ReplicateFieldsParams),
    /// Replace a replicate including its data.
    ReplaceReplicateWithData(ReplicateDataParams),
    /// Replace run-level fields, keeping its replicates.
    ReplaceRunFields(RunFieldsParams),
    /// Append a method.
    AddMethod(Method),
    /// Replace a method by id.
    ReplaceMethod(MethodParams),
}

impl SaveCommand {
    /// The wire tag for this command.
    pub fn save_type(&self) -> SaveType {
        match self {
            SaveCommand::UpdateSampleMetadata(_) => SaveType::Sample,
            SaveCommand::AddRun(_) => SaveType::NewRun,
            SaveCommand::DeleteReplicates(_) => SaveType::RepDelete,
            SaveCommand::ReplaceReplicateFields(_) => SaveType::RepMod,
            SaveCommand::ReplaceReplicateWithData(_) => SaveType::RepModWithData,
            SaveCommand::ReplaceRunFields(_) => SaveType::RunMod,
            SaveCommand::AddMethod(_) => SaveType::MethodToSample,
            SaveCommand::ReplaceMethod(_) => SaveType::MethodMod,
        }
    }

    /// Serialize the command parameters.
    pub fn params_json(&self) -> serde_json::Result<String> {
        match self {
            SaveCommand::UpdateSampleMetadata(p) => serde_json::to_string(p),
            SaveCommand::AddRun(p) => serde_json::to_string(p),
            SaveCommand::DeleteReplicates(p) => serde_json::to_string(p),
            SaveCommand::ReplaceReplicateFields(p) => serde_json::to_string(p),
            SaveCommand::ReplaceReplicateWithData(p) => serde_json::to_string(p),
            SaveCommand::ReplaceRunFields(p) => serde_json::to_string(p),
            SaveCommand::AddMethod(p) => serde_json::to_string(p),
            SaveCommand::ReplaceMethod(p) => serde_json::to_string(p),
        }
    }

    /// Rebuild a command from its wire tag and JSON parameters.
    pub fn from_parts(save_type: SaveType, params: &str) -> StoreResult<Self> {
        let invalid = |e: serde_json::Error| StoreError::InvalidCommand {
            save_type: save_type.to_string(),
            message: e.to_string(),
        };
        let command = match save_type {
            SaveType::Sample => {
                SaveCommand::UpdateSampleMetadata(serde_json::from_str(params).map_err(invalid)?)
            }
            SaveType::NewRun => SaveCommand::AddRun(serde_json::from_str(params).map_err(invalid)?),
            SaveType::RepDelete => {
                SaveCommand::DeleteReplicates(serde_json::from_str(params).map_err(invalid)?)
            }
            SaveType::RepMod => {
                SaveCommand::ReplaceReplicateFields(serde_json::from_str(params).map_err(invalid)?)
            }
            SaveType::RepModWithData => SaveCommand::ReplaceReplicateWithData(
                serde_json::from_str(params).map_err(invalid)?,
            ),
            SaveType::RunMod => {
                SaveCommand::ReplaceRunFields(serde_json::from_str(params).map_err(invalid)?)
            }
            SaveType::MethodToSample => {
                SaveCommand::AddMethod(serde_json::from_str(params).map_err(invalid)?)
            }
            SaveType::MethodMod => {
                SaveCommand::ReplaceMethod(serde_json::from_str(params).map_err(invalid)?)
            }
        };
        Ok(command)
    }
}

/// Apply `command` to `sample`, returning the updated sample.
///
/// The input must pass [`store::validate`]; otherwise nothing is applied and
/// [`StoreError::CorruptStore`] is returned.
pub fn apply(sample: &Sample, command: &SaveCommand) -> StoreResult<Sample> {
    store::validate(sample)?;
    let mut next = sample.clone();

    match command {
        SaveCommand::UpdateSampleMetadata(meta) => {
            next.name = meta.name.clone();
            next.collection = meta.collection.clone();
            next.notes = meta.notes.clone();
        }
        SaveCommand::AddRun(params) => add_run(&mut next, params)?,
        SaveCommand::DeleteReplicates(targets) => delete_replicates(&mut next, targets),
        SaveCommand::ReplaceReplicateFields(params) => {
            let rep = replicate_mut(&mut next, &params.run_id, &params.rep_id)?;
            rep.status = params.fields.status;
            rep.last_attempt = params.fields.last_attempt;
            rep.notes = params.fields.notes.clone();
        }
        SaveCommand::ReplaceReplicateWithData(params) => {
            let rep = replicate_mut(&mut next, &params.run_id, &params.rep_id)?;
            *rep = Replicate {
                id: params.rep_id.clone(),
                ..params.replicate.clone()
            };
        }
        SaveCommand::ReplaceRunFields(params) => {
            if next.method(&params.fields.method_id).is_none() {
                return Err(StoreError::not_found("Method", &params.fields.method_id));
            }
            let run = run_mut(&mut next, &params.run_id)?;
            run.method_id = params.fields.method_id.clone();
            run.device = params.fields.device.clone();
            run.run_type = params.fields.run_type.clone();
            run.notes = params.fields.notes.clone();
        }
        SaveCommand::AddMethod(method) => {
            add_method(&mut next, method.clone(), SaveType::MethodToSample)?;
        }
        SaveCommand::ReplaceMethod(params) => {
            check_method(&params.method, SaveType::MethodMod)?;
            let slot = next
                .methods
                .iter_mut()
                .find(|m| m.id == params.method_id)
                .ok_or_else(|| StoreError::not_found("Method", &params.method_id))?;
            *slot = Method {
                id: params.method_id.clone(),
                ..params.method.clone()
            };
        }
    }

    store::validate(&next)?;
    debug!(save_type = %command.save_type(), "Applied save command");
    Ok(next)
}

fn add_run(sample: &mut Sample, params: &NewRunParams) -> StoreResult<()> {
    let mut run = params.run.clone();

    if let Some(method) = &params.method {
        run.method_id = add_method(sample, method.clone(), SaveType::NewRun)?;
    }
    if sample.method(&run.method_id).is_none() {
        return Err(StoreError::not_found("Method", &run.method_id));
    }
    if run.replicates.is_empty() {
        return Err(invalid(SaveType::NewRun, "a run needs at least one replicate"));
    }
    if run.id.is_empty() {
        run.id = sample.next_run_id();
    } else if sample.run(&run.id).is_some() {
        return Err(invalid(
            SaveType::NewRun,
            format!("run id '{}' already in use", run.id),
        ));
    }

    info!(run_id = %run.id, method_id = %run.method_id, replicates = run.replicates.len(), "Adding run");
    sample.runs.push(run);
    Ok(())
}

/// Append `method`, assigning an id when it has none. Returns the id used.
fn add_method(sample: &mut Sample, mut method: Method, save_type: SaveType) -> StoreResult<String> {
    check_method(&method, save_type)?;
    if method.id.is_empty() {
        method.id = sample.next_method_id();
    } else if sample.method(&method.id).is_some() {
        return Err(invalid(
            save_type,
            format!("method id '{}' already in use", method.id),
        ));
    }
    let id = method.id.clone();
    sample.methods.push(method);
    Ok(id)
}

fn check_method(method: &Method, save_type: SaveType) -> StoreResult<()> {
    for (index, step) in method.steps.iter().enumerate() {
        if let Some(problem) = store::step_problem(step) {
            return Err(invalid(save_type, format!("step {} has {}", index, problem)));
        }
    }
    Ok(())
}

/// Two-phase cascade: drop the targeted replicates, then every run left
/// without replicates, then every method no surviving run references.
///
/// Targets that no longer exist are skipped, so deleting twice is a no-op.
fn delete_replicates(sample: &mut Sample, targets: &[TaskId]) {
    let targets: HashSet<(&str, &str)> = targets
        .iter()
        .map(|t| (t.run_id.as_str(), t.rep_id.as_str()))
        .collect();

    let mut removed = 0;
    for run in &mut sample.runs {
        let run_id = run.id.clone();
        let before = run.replicates.len();
        run.replicates
            .retain(|rep| !targets.contains(&(run_id.as_str(), rep.id.as_str())));
        removed += before - run.replicates.len();
    }

    let runs_before = sample.runs.len();
    sample.runs.retain(|run| !run.replicates.is_empty());

    let referenced: HashSet<&str> = sample.runs.iter().map(|r| r.method_id.as_str()).collect();
    let methods_before = sample.methods.len();
    sample
        .methods
        .retain(|method| referenced.contains(method.id.as_str()));

    info!(
        replicates = removed,
        runs = runs_before - sample.runs.len(),
        methods = methods_before - sample.methods.len(),
        "Deleted replicates"
    );
}

fn run_mut<'a>(sample: &'a mut Sample, run_id: &str) -> StoreResult<&'a mut Run> {
    sample
        .runs
        .iter_mut()
        .find(|r| r.id == run_id)
        .ok_or_else(|| StoreError::not_found("Run", run_id))
}

fn replicate_mut<'a>(
    sample: &'a mut Sample,
    run_id: &str,
    rep_id: &str,
) -> StoreResult<&'a mut Replicate> {
    run_mut(sample, run_id)?
        .replicates
        .iter_mut()
        .find(|r| r.id == rep_id)
        .ok_or_else(|| StoreError::not_found("Replicate", format!("{}/{}", run_id, rep_id)))
}

fn invalid(save_type: SaveType, message: impl Into<String>) -> StoreError {
    StoreError::InvalidCommand {
        save_type: save_type.to_string(),
        message: message.into(),
    }
}

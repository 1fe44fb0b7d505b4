//! Reading, validating and atomically writing sample files.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::{Sample, Step};
use crate::error::{StoreError, StoreResult};

const SAMPLE_KEYS: &[&str] = &["name", "created_at", "methods", "runs"];
const METHOD_KEYS: &[&str] = &["id", "name", "sample_interval_ms", "current_range", "steps"];
const RUN_KEYS: &[&str] = &["id", "method_id", "device", "run_type", "created_at", "replicates"];
const REPLICATE_KEYS: &[&str] = &["id", "status"];

/// Load and validate the sample file at `path`.
pub fn load(path: &Path) -> StoreResult<Sample> {
    let text = std::fs::read_to_string(path)?;
    let sample = parse(&text)?;
    debug!(
        path = %path.display(),
        methods = sample.methods.len(),
        runs = sample.runs.len(),
        "Loaded sample"
    );
    Ok(sample)
}

/// Parse and validate a serialized sample document.
///
/// Syntax errors, missing keys and broken invariants are all reported as
/// [`StoreError::CorruptStore`].
pub fn parse(text: &str) -> StoreResult<Sample> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| StoreError::corrupt(format!("not valid JSON: {}", e)))?;
    check_required_keys(&value)?;
    let sample: Sample = serde_json::from_value(value)
        .map_err(|e| StoreError::corrupt(format!("unexpected field value: {}", e)))?;
    validate(&sample)?;
    Ok(sample)
}

/// Validate `sample` and write it to `path` through a temporary file in the
/// same directory, renamed over the destination once fully written.
pub fn persist(path: &Path, sample: &Sample) -> StoreResult<()> {
    validate(sample)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, sample)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    debug!(path = %path.display(), "Persisted sample");
    Ok(())
}

/// Check the structural invariants of a sample.
///
/// - method, run and per-run replicate ids are unique
/// - every run references a method present in the sample
/// - constant and ramp steps have a positive duration and finite voltages
pub fn validate(sample: &Sample) -> StoreResult<()> {
    let mut method_ids = HashSet::new();
    for method in &sample.methods {
        if method.id.is_empty() {
            return Err(StoreError::corrupt("method without id"));
        }
        if !method_ids.insert(method.id.as_str()) {
            return Err(StoreError::corrupt(format!(
                "duplicate method id '{}'",
                method.id
            )));
        }
        for (index, step) in method.steps.iter().enumerate() {
            check_step(&method.id, index, step)?;
        }
    }

    let mut run_ids = HashSet::new();
    for run in &sample.runs {
        if run.id.is_empty() {
            return Err(StoreError::corrupt("run without id"));
        }
        if !run_ids.insert(run.id.as_str()) {
            return Err(StoreError::corrupt(format!("duplicate run id '{}'", run.id)));
        }
        if !method_ids.contains(run.method_id.as_str()) {
            return Err(StoreError::corrupt(format!(
                "run '{}' references missing method '{}'",
                run.id, run.method_id
            )));
        }
        let mut rep_ids = HashSet::new();
        for rep in &run.replicates {
            if !rep_ids.insert(rep.id.as_str()) {
                return Err(StoreError::corrupt(format!(
                    "duplicate replicate id '{}' in run '{}'",
                    rep.id, run.id
                )));
            }
        }
    }

    Ok(())
}

fn check_step(method_id: &str, index: usize, step: &Step) -> StoreResult<()> {
    match step_problem(step) {
        Some(problem) => Err(StoreError::corrupt(format!(
            "step {} of method '{}' has {}",
            index, method_id, problem
        ))),
        None => Ok(()),
    }
}

/// Describes why a step cannot be executed, if it cannot.
pub(crate) fn step_problem(step: &Step) -> Option<&'static str> {
    if step.is_relay() {
        None
    } else if step.duration_ms() == 0 {
        Some("zero duration")
    } else if step.voltages().iter().any(|v| !v.is_finite()) {
        Some("a non-finite voltage")
    } else {
        None
    }
}

fn check_required_keys(value: &Value) -> StoreResult<()> {
    require(value, SAMPLE_KEYS, "sample")?;

    for method in array(value, "methods")? {
        require(method, METHOD_KEYS, "method")?;
    }
    for run in array(value, "runs")? {
        require(run, RUN_KEYS, "run")?;
        for rep in array(run, "replicates")? {
            require(rep, REPLICATE_KEYS, "replicate")?;
        }
    }
    Ok(())
}

fn require(value: &Value, keys: &[&str], what: &str) -> StoreResult<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| StoreError::corrupt(format!("{} is not an object", what)))?;
    match keys.iter().find(|k| !obj.contains_key(**k)) {
        Some(missing) => Err(StoreError::corrupt(format!(
            "{} is missing required key '{}'",
            what, missing
        ))),
        None => Ok(()),
    }
}

fn array<'a>(value: &'a Value, key: &str) -> StoreResult<&'a Vec<Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::corrupt(format!("'{}' is not a list", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Method, Run, RunType, Step};
    use pretty_assertions::assert_eq;

    fn sample_with_run() -> Sample {
        let mut sample = Sample::new("river water");
        sample.methods.push(Method {
            id: "method-1".to_string(),
            name: "ASV lead".to_string(),
            sample_interval_ms: 100,
            current_range: "100uA".to_string(),
            steps: vec![Step::constant(-1.2, 60_000), Step::ramp(-1.2, 0.2, 10_000)],
        });
        sample
            .runs
            .push(Run::new("method-1", "Rodeostat", RunType::Blank, 2).with_id("run-1"));
        sample
    }

    #[test]
    fn test_persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = sample_with_run();

        persist(&path, &sample).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_persist_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, "old contents").unwrap();

        persist(&path, &sample_with_run()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.runs.len(), 1);
        // only the destination remains; the temporary file was renamed
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse("{ not json").unwrap_err();
        assert!(matches!(err, StoreError::CorruptStore { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_runs_key() {
        let text = r#"{"name": "s", "created_at": "2024-01-01T00:00:00Z", "methods": []}"#;
        let err = parse(text).unwrap_err();
        assert!(matches!(err, StoreError::CorruptStore { .. }));
        assert!(err.to_string().contains("'runs'"));
    }

    #[test]
    fn test_parse_rejects_replicate_without_status() {
        let mut value = serde_json::to_value(sample_with_run()).unwrap();
        value["runs"][0]["replicates"][0]
            .as_object_mut()
            .unwrap()
            .remove("status");

        let err = parse(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("'status'"));
    }

    #[test]
    fn test_validate_rejects_dangling_method_reference() {
        let mut sample = sample_with_run();
        sample.runs[0].method_id = "method-9".to_string();

        let err = validate(&sample).unwrap_err();
        assert!(err.to_string().contains("method-9"));
    }

    #[test]
    fn test_validate_rejects_duplicate_run_ids() {
        let mut sample = sample_with_run();
        let copy = sample.runs[0].clone();
        sample.runs.push(copy);

        assert!(matches!(
            validate(&sample),
            Err(StoreError::CorruptStore { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_duration_step() {
        let mut sample = sample_with_run();
        sample.methods[0].steps.push(Step::constant(0.0, 0));

        assert!(validate(&sample).is_err());
    }

    #[test]
    fn test_persist_refuses_invalid_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let mut sample = sample_with_run();
        sample.methods.clear();

        assert!(persist(&path, &sample).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/sample.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}

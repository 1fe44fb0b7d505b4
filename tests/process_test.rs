//! The worker binary driven through `ProcessLauncher`.
//!
//! Requests travel as real argv and stdin, the child logs and frames over its
//! own stdout and stderr, and the parent decodes both streams. All paths are
//! absolute so the child's working directory does not matter.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use voltammetry_worker::device::RunSummary;
use voltammetry_worker::mutation::{ReplicateDataParams, SaveCommand};
use voltammetry_worker::store::{
    self, DataPoint, Method, Replicate, ReplicateStatus, Run, RunType, Sample, Step, TaskId,
};
use voltammetry_worker::worker::{
    FinalPayload, NullObserver, ProcessLauncher, RunSpec, WorkerLauncher, WorkerMessage,
    WorkerObserver, WorkerOutcome, WorkerRequest, INLINE_PAYLOAD_LIMIT,
};

fn launcher() -> ProcessLauncher {
    ProcessLauncher::new(env!("CARGO_BIN_EXE_voltammetry-worker"))
}

struct Recorder(Vec<WorkerMessage>);

impl WorkerObserver for Recorder {
    fn on_message(&mut self, message: &WorkerMessage) {
        self.0.push(message.clone());
    }
}

fn fixture() -> Sample {
    let mut sample = Sample::new("Harbor 7");
    sample.methods.push(Method {
        id: "method-1".to_string(),
        name: "Stripping".to_string(),
        sample_interval_ms: 100,
        current_range: "100uA".to_string(),
        steps: vec![
            Step::constant(-1.0, 300).with_stir(true).with_collect(false),
            Step::ramp(-1.0, 0.5, 500),
        ],
    });
    let mut run = Run::new("method-1", "Rodeostat", RunType::Blank, 2).with_id("run-1");
    run.replicates[0].status = ReplicateStatus::Success;
    run.replicates[0].data = vec![
        DataPoint::new(0.0, -1.0, -1000.0),
        DataPoint::new(0.1, -0.7, -700.0),
    ];
    sample.runs.push(run);
    sample
}

fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("harbor.json");
    store::persist(&path, &fixture()).unwrap();
    path
}

#[tokio::test]
async fn test_read_through_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let outcome = launcher()
        .launch(&WorkerRequest::Read { path: path.clone() }, &mut NullObserver)
        .await;

    match outcome {
        WorkerOutcome::Success(FinalPayload::Document(sample)) => {
            assert_eq!(sample, store::load(&path).unwrap().without_data());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_read_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    let outcome = launcher()
        .launch(
            &WorkerRequest::Read {
                path: dir.path().join("absent.json"),
            },
            &mut NullObserver,
        )
        .await;

    assert!(matches!(outcome, WorkerOutcome::Failure(_)), "{:?}", outcome);
}

#[tokio::test]
async fn test_cascade_delete_through_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let outcome = launcher()
        .launch(
            &WorkerRequest::Save {
                path: path.clone(),
                command: SaveCommand::DeleteReplicates(vec![
                    TaskId::new("run-1", "rep-0"),
                    TaskId::new("run-1", "rep-1"),
                ]),
            },
            &mut NullObserver,
        )
        .await;

    match outcome {
        WorkerOutcome::Success(FinalPayload::Document(sample)) => {
            assert!(sample.runs.is_empty());
            assert!(sample.methods.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let on_disk = store::load(&path).unwrap();
    assert!(on_disk.runs.is_empty());
    assert!(on_disk.methods.is_empty());
}

#[tokio::test]
async fn test_partial_export_through_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let out = dir.path().join("csv");
    let tasks = vec![TaskId::new("run-1", "rep-0"), TaskId::new("run-1", "rep-1")];

    let outcome = launcher()
        .launch(
            &WorkerRequest::Export {
                read_path: path,
                write_dir: out.clone(),
                tasks: tasks.clone(),
            },
            &mut NullObserver,
        )
        .await;

    assert_eq!(
        outcome,
        WorkerOutcome::PartialSuccess {
            succeeded: vec![tasks[0].clone()],
            failed: vec![tasks[1].clone()],
        }
    );
    let csv = std::fs::read_to_string(out.join("Harbor_7_run-1_rep-0.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[tokio::test]
async fn test_run_through_binary_streams_telemetry() {
    let method = fixture().methods.remove(0);
    let mut recorder = Recorder(Vec::new());

    let outcome = launcher()
        .launch(
            &WorkerRequest::Run(RunSpec {
                sample_interval_ms: method.sample_interval_ms,
                current_range: method.current_range.clone(),
                steps: method.steps.clone(),
                preferred_port: None,
                relays_enabled: true,
            }),
            &mut recorder,
        )
        .await;

    assert_eq!(
        outcome,
        WorkerOutcome::Success(FinalPayload::RunFinished(RunSummary {
            port: "/dev/ttyACM0".to_string(),
            device: "Rodeostat".to_string(),
            voltage_range: "1V".to_string(),
            steps: 4,
            points: 5,
        }))
    );
    let messages = recorder.0;
    assert!(messages.contains(&WorkerMessage::PortInfo("/dev/ttyACM0".to_string())));
    let telemetry = messages
        .iter()
        .filter(|m| matches!(m, WorkerMessage::Telemetry(_)))
        .count();
    assert_eq!(telemetry, 5);
    assert!(messages
        .iter()
        .any(|m| matches!(m, WorkerMessage::Status(text) if text.starts_with("Configured"))));
}

#[tokio::test]
async fn test_long_run_data_is_saved_through_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    // a 20 minute hold sampled every 100 ms
    let mut replicate = Replicate::pending("rep-1");
    replicate.status = ReplicateStatus::Success;
    replicate.data = (0..12_000)
        .map(|i| DataPoint::new(i as f64 * 0.1, 0.25, 1.0 + i as f64 * 1e-3))
        .collect();
    let expected = replicate.data.clone();
    let command = SaveCommand::ReplaceReplicateWithData(ReplicateDataParams {
        run_id: "run-1".to_string(),
        rep_id: "rep-1".to_string(),
        replicate,
    });
    assert!(command.params_json().unwrap().len() > 4 * INLINE_PAYLOAD_LIMIT);

    let outcome = launcher()
        .launch(
            &WorkerRequest::Save {
                path: path.clone(),
                command,
            },
            &mut NullObserver,
        )
        .await;

    match outcome {
        WorkerOutcome::Success(FinalPayload::Document(sample)) => {
            let task = TaskId::new("run-1", "rep-1");
            assert_eq!(sample.replicate(&task).unwrap().status, ReplicateStatus::Success);
            assert!(sample.replicate(&task).unwrap().data.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let on_disk = store::load(&path).unwrap();
    let data = &on_disk.replicate(&TaskId::new("run-1", "rep-1")).unwrap().data;
    assert_eq!(data.len(), 12_000);
    assert!(data == &expected);
}

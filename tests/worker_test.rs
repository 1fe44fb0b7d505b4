//! Worker operations executed in-process against real files.
//!
//! Each test runs `worker::execute` with a message vector as sink and folds
//! the messages with the same collector the parent process uses.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use voltammetry_worker::config::Config;
use voltammetry_worker::device::RunSummary;
use voltammetry_worker::error::{AppError, StoreError};
use voltammetry_worker::mutation::{MethodParams, SaveCommand};
use voltammetry_worker::store::{
    self, DataPoint, Method, Relay, ReplicateStatus, Run, RunType, Sample, Step, TaskId,
};
use voltammetry_worker::worker::{
    self, FinalPayload, OutcomeCollector, RunSpec, WorkerMessage, WorkerOutcome, WorkerRequest,
};
use voltammetry_worker::AppContext;

fn context(base_dir: &Path) -> AppContext {
    let mut config = Config::default();
    config.base_dir = base_dir.to_path_buf();
    config.device.ports = vec!["COM1".to_string(), "COM2".to_string()];
    config.device.sim_port = "COM2".to_string();
    config.device.sim_load_ohms = 1_000.0;
    AppContext::new(config).unwrap()
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

async fn execute(request: &WorkerRequest, ctx: &AppContext) -> (Vec<WorkerMessage>, WorkerOutcome) {
    let mut messages: Vec<WorkerMessage> = Vec::new();
    let exit_code = match worker::execute(request, ctx, &mut messages).await {
        Ok(()) => Some(0),
        Err(e) => {
            messages.push(WorkerMessage::Fatal(e.to_string()));
            Some(1)
        }
    };

    let mut collector = OutcomeCollector::new(request.kind());
    for message in &messages {
        collector.observe(message);
    }
    (messages, collector.finish(exit_code))
}

#[tokio::test]
async fn test_read_returns_data_stripped_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let ctx = context(dir.path());

    let (_, outcome) = execute(
        &WorkerRequest::Read {
            path: PathBuf::from("harbor.json"),
        },
        &ctx,
    )
    .await;

    match outcome {
        WorkerOutcome::Success(FinalPayload::Document(sample)) => {
            assert_eq!(sample, store::load(&path).unwrap().without_data());
            assert!(sample.runs[0].replicates[0].data.is_empty());
            assert_eq!(sample.runs[0].replicates[0].status, ReplicateStatus::Success);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_read_corrupt_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.json"), r#"{"name": "x"}"#).unwrap();
    let ctx = context(dir.path());

    let request = WorkerRequest::Read {
        path: PathBuf::from("bad.json"),
    };
    let mut sink: Vec<WorkerMessage> = Vec::new();
    let err = worker::execute(&request, &ctx, &mut sink).await.unwrap_err();

    assert!(matches!(err, AppError::Store(StoreError::CorruptStore { .. })));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_save_cascade_delete_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let ctx = context(dir.path());

    let (_, outcome) = execute(
        &WorkerRequest::Save {
            path: path.clone(),
            command: SaveCommand::DeleteReplicates(vec![
                TaskId::new("run-1", "rep-0"),
                TaskId::new("run-1", "rep-1"),
            ]),
        },
        &ctx,
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
async fn test_failed_save_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let before = std::fs::read_to_string(&path).unwrap();
    let ctx = context(dir.path());

    let (messages, outcome) = execute(
        &WorkerRequest::Save {
            path: path.clone(),
            command: SaveCommand::DeleteReplicates(vec![]),
        },
        &ctx,
    )
    .await;
    assert!(matches!(outcome, WorkerOutcome::Success(_)));
    assert!(messages.iter().any(|m| matches!(m, WorkerMessage::Final(_))));

    let (_, outcome) = execute(
        &WorkerRequest::Save {
            path: path.clone(),
            command: SaveCommand::ReplaceMethod(MethodParams {
                method_id: "method-9".to_string(),
                method: fixture().methods[0].clone(),
            }),
        },
        &ctx,
    )
    .await;

    match outcome {
        WorkerOutcome::Failure(message) => assert!(message.contains("method-9")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let after = std::fs::read_to_string(&path).unwrap();
    assert_eq!(store::parse(&after).unwrap(), store::parse(&before).unwrap());
}

#[tokio::test]
async fn test_overwrite_then_read_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let sample = fixture();

    let (_, outcome) = execute(
        &WorkerRequest::Overwrite {
            path: PathBuf::from("new.json"),
            sample: sample.clone(),
        },
        &ctx,
    )
    .await;
    assert!(matches!(outcome, WorkerOutcome::Success(FinalPayload::Document(_))));

    assert_eq!(store::load(&dir.path().join("new.json")).unwrap(), sample);
}

#[tokio::test]
async fn test_export_with_one_empty_replicate_is_partial() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let ctx = context(dir.path());
    let tasks = vec![TaskId::new("run-1", "rep-0"), TaskId::new("run-1", "rep-1")];

    let (messages, outcome) = execute(
        &WorkerRequest::Export {
            read_path: PathBuf::from("harbor.json"),
            write_dir: PathBuf::from("csv"),
            tasks: tasks.clone(),
        },
        &ctx,
    )
    .await;

    assert!(messages.contains(&WorkerMessage::TaskResult(Ok(tasks[0].clone()))));
    assert!(messages.contains(&WorkerMessage::TaskResult(Err(tasks[1].clone()))));
    assert_eq!(
        outcome,
        WorkerOutcome::PartialSuccess {
            succeeded: vec![tasks[0].clone()],
            failed: vec![tasks[1].clone()],
        }
    );

    let csv = std::fs::read_to_string(dir.path().join("csv/Harbor_7_run-1_rep-0.csv")).unwrap();
    assert_eq!(csv.lines().next(), Some("time,voltage,current"));
    assert_eq!(csv.lines().count(), 3);
    assert!(!dir.path().join("csv/Harbor_7_run-1_rep-1.csv").exists());
}

#[tokio::test]
async fn test_run_streams_port_relays_and_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let method = fixture().methods.remove(0);

    let (messages, outcome) = execute(
        &WorkerRequest::Run(RunSpec {
            sample_interval_ms: method.sample_interval_ms,
            current_range: method.current_range.clone(),
            steps: method.steps.clone(),
            preferred_port: None,
            relays_enabled: true,
        }),
        &ctx,
    )
    .await;

    assert_eq!(
        outcome,
        WorkerOutcome::Success(FinalPayload::RunFinished(RunSummary {
            port: "COM2".to_string(),
            device: "Rodeostat".to_string(),
            voltage_range: "1V".to_string(),
            steps: 4,
            points: 5,
        }))
    );
    assert!(messages.contains(&WorkerMessage::PortInfo("COM2".to_string())));

    let relays: Vec<&WorkerMessage> = messages
        .iter()
        .filter(|m| matches!(m, WorkerMessage::RelayState { .. }))
        .collect();
    assert_eq!(
        relays,
        vec![
            &WorkerMessage::RelayState {
                relay: Relay::Stirrer,
                state: true
            },
            &WorkerMessage::RelayState {
                relay: Relay::Stirrer,
                state: false
            },
        ]
    );

    // the uncollected 300 ms hold shifts the ramp's first sample
    let first = messages
        .iter()
        .find_map(|m| match m {
            WorkerMessage::Telemetry(p) => Some(*p),
            _ => None,
        })
        .unwrap();
    assert!((first.time - 0.3).abs() < 1e-9);
    assert_eq!(first.voltage, -1.0);
}

#[tokio::test]
async fn test_run_without_device_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.base_dir = dir.path().to_path_buf();
    config.device.ports = vec!["COM1".to_string()];
    config.device.sim_port = "COM8".to_string();
    let ctx = AppContext::new(config).unwrap();

    let (_, outcome) = execute(
        &WorkerRequest::Run(RunSpec {
            sample_interval_ms: 100,
            current_range: "100uA".to_string(),
            steps: vec![Step::constant(0.1, 100)],
            preferred_port: None,
            relays_enabled: true,
        }),
        &ctx,
    )
    .await;

    match outcome {
        WorkerOutcome::Failure(message) => {
            assert!(message.contains("No potentiostat found"), "{}", message)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_run_beyond_voltage_range_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());

    let (messages, outcome) = execute(
        &WorkerRequest::Run(RunSpec {
            sample_interval_ms: 100,
            current_range: "100uA".to_string(),
            steps: vec![Step::ramp(-2.0, 11.0, 100)],
            preferred_port: None,
            relays_enabled: true,
        }),
        &ctx,
    )
    .await;

    assert!(!messages
        .iter()
        .any(|m| matches!(m, WorkerMessage::Telemetry(_))));
    match outcome {
        WorkerOutcome::Failure(message) => {
            assert!(message.contains("Voltage range exceeded"), "{}", message)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

use thiserror::Error;

use crate::store::TaskId;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Sample store and mutation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Corrupt sample file: {message}")]
    CorruptStore { message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid command parameters for '{save_type}': {message}")]
    InvalidCommand { save_type: String, message: String },

    #[error("No recorded data for {task}")]
    NoData { task: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a corrupt-store error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        StoreError::CorruptStore {
            message: message.into(),
        }
    }

    /// Shorthand for a missing run/method/replicate.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Potentiostat and sequencing errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No potentiostat found (ports tried: {})", .tried.join(", "))]
    DeviceNotFound { tried: Vec<String> },

    #[error("Voltage range exceeded: method needs {required} V but device maximum is {maximum} V")]
    VoltageRangeExceeded { required: f64, maximum: f64 },

    #[error("Invalid step {step}: {problem}")]
    InvalidStep { step: usize, problem: String },

    #[error("Unsupported current range: {label}")]
    UnsupportedCurrentRange { label: String },

    #[error("Sample interval {interval_ms} ms outside device bounds {min_ms}..={max_ms} ms")]
    SampleIntervalOutOfBounds {
        interval_ms: u32,
        min_ms: u32,
        max_ms: u32,
    },

    #[error("No digital pin mapped for relay {relay}")]
    UnmappedRelay { relay: String },

    #[error("Driver error: {message}")]
    Driver { message: String },
}

/// Worker process and protocol errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Result of {task} was not saved: another worker is running for this sample")]
    ResultNotSaved { task: TaskId },

    #[error("Failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker failed: {message}")]
    ProcessFailure { message: String },

    #[error("Export partially failed: {} exported, {} failed", .succeeded.len(), .failed.len())]
    PartialExport {
        succeeded: Vec<TaskId>,
        failed: Vec<TaskId>,
    },

    #[error("Unexpected worker payload: {message}")]
    Protocol { message: String },
}

impl WorkerError {
    /// How the failure should be surfaced to the operator.
    pub fn notice(&self) -> Notice {
        match self {
            WorkerError::PartialExport { .. } => Notice::StatusBar,
            _ => Notice::Modal,
        }
    }
}

/// Presentation class for a user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Transient status-bar message for recoverable or partial failures.
    StatusBar,
    /// Modal alert for fatal failures.
    Modal,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::corrupt("missing key 'runs'");
        assert_eq!(err.to_string(), "Corrupt sample file: missing key 'runs'");

        let err = StoreError::not_found("Run", "run-7");
        assert_eq!(err.to_string(), "Run not found: run-7");

        let err = StoreError::InvalidCommand {
            save_type: "run-mod".to_string(),
            message: "missing field".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid command parameters for 'run-mod': missing field"
        );
    }

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::DeviceNotFound {
            tried: vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No potentiostat found (ports tried: /dev/ttyACM0, /dev/ttyACM1)"
        );

        let err = DeviceError::VoltageRangeExceeded {
            required: 12.5,
            maximum: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "Voltage range exceeded: method needs 12.5 V but device maximum is 10 V"
        );

        let err = DeviceError::SampleIntervalOutOfBounds {
            interval_ms: 1,
            min_ms: 10,
            max_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Sample interval 1 ms outside device bounds 10..=1000 ms"
        );
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::ProcessFailure {
            message: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "Worker failed: disk full");

        let err = WorkerError::PartialExport {
            succeeded: vec![TaskId::new("run-1", "rep-0")],
            failed: vec![TaskId::new("run-1", "rep-1"), TaskId::new("run-2", "rep-0")],
        };
        assert_eq!(
            err.to_string(),
            "Export partially failed: 1 exported, 2 failed"
        );
    }

    #[test]
    fn test_worker_error_notice() {
        let partial = WorkerError::PartialExport {
            succeeded: vec![],
            failed: vec![],
        };
        assert_eq!(partial.notice(), Notice::StatusBar);

        let fatal = WorkerError::ProcessFailure {
            message: "corrupt".to_string(),
        };
        assert_eq!(fatal.notice(), Notice::Modal);

        let dropped = WorkerError::ResultNotSaved {
            task: TaskId::new("run-1", "rep-0"),
        };
        assert_eq!(dropped.notice(), Notice::Modal);
        assert_eq!(
            dropped.to_string(),
            "Result of run-1/rep-0 was not saved: another worker is running for this sample"
        );
    }

    #[test]
    fn test_store_error_conversion_to_app_error() {
        let err: AppError = StoreError::not_found("Method", "method-3").into();
        assert!(matches!(err, AppError::Store(_)));
        assert!(err.to_string().contains("method-3"));
    }

    #[test]
    fn test_device_error_conversion_to_app_error() {
        let err: AppError = DeviceError::Driver {
            message: "timeout".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Device(_)));
    }
}

use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub worker: WorkerConfig,
    pub device: DeviceConfig,
    /// Locale tag used for user-facing text, e.g. `en-US`.
    pub locale: String,
    /// Directory relative sample and export paths are resolved against.
    pub base_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker process configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Executable started for every worker request.
    pub program: PathBuf,
}

/// Potentiostat driver selection
#[derive(Debug, Clone, PartialEq)]
pub enum DriverKind {
    Simulated,
}

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub driver: DriverKind,
    /// Serial ports probed, in order.
    pub ports: Vec<String>,
    /// Port the simulated device answers on.
    pub sim_port: String,
    /// Model the simulated device identifies as.
    pub sim_model: String,
    /// Resistance of the simulated cell.
    pub sim_load_ohms: f64,
    /// Pace simulated samples in real time.
    pub sim_realtime: bool,
    /// JSON device registry replacing the built-in one.
    pub registry_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let worker = WorkerConfig {
            program: match env::var("WORKER_PROGRAM") {
                Ok(path) => PathBuf::from(path),
                Err(_) => env::current_exe().map_err(|e| AppError::Config {
                    message: format!("cannot locate worker executable: {}", e),
                })?,
            },
        };

        let driver = match env::var("DEVICE_DRIVER")
            .unwrap_or_else(|_| "simulated".to_string())
            .to_lowercase()
            .as_str()
        {
            "simulated" => DriverKind::Simulated,
            other => {
                return Err(AppError::Config {
                    message: format!("unsupported DEVICE_DRIVER '{}'", other),
                })
            }
        };

        let sim_port = env::var("DEVICE_SIM_PORT").unwrap_or_else(|_| "/dev/ttyACM0".to_string());
        let device = DeviceConfig {
            driver,
            ports: env::var("DEVICE_PORTS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec![sim_port.clone()]),
            sim_port,
            sim_model: env::var("DEVICE_SIM_MODEL").unwrap_or_else(|_| "Rodeostat".to_string()),
            sim_load_ohms: env::var("DEVICE_SIM_LOAD_OHMS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ohms: &f64| *ohms > 0.0)
                .unwrap_or(10_000.0),
            sim_realtime: env::var("DEVICE_SIM_REALTIME")
                .ok()
                .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            registry_path: env::var("DEVICE_REGISTRY_PATH").ok().map(PathBuf::from),
        };

        let base_dir = match env::var("BASE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => env::current_dir()?,
        };

        Ok(Config {
            logging,
            worker,
            device,
            locale: env::var("LOCALE").unwrap_or_else(|_| "en-US".to_string()),
            base_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            worker: WorkerConfig {
                program: PathBuf::from("voltammetry-worker"),
            },
            device: DeviceConfig::default(),
            locale: "en-US".to_string(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Simulated,
            ports: vec!["/dev/ttyACM0".to_string()],
            sim_port: "/dev/ttyACM0".to_string(),
            sim_model: "Rodeostat".to_string(),
            sim_load_ohms: 10_000.0,
            sim_realtime: false,
            registry_path: None,
        }
    }
}

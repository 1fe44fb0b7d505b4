use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Config, DriverKind};
use crate::device::{DeviceRegistry, PortConnector, SimulatedConnector};
use crate::error::{AppError, AppResult};

/// Everything a worker needs besides its request.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub locale: String,
    pub base_dir: PathBuf,
    pub devices: DeviceRegistry,
}

impl AppContext {
    /// Build the context, loading the device registry when one is configured.
    pub fn new(config: Config) -> AppResult<Self> {
        let devices = match &config.device.registry_path {
            Some(path) => DeviceRegistry::from_file(path)?,
            None => DeviceRegistry::builtin(),
        };
        debug!(devices = devices.devices.len(), "Device registry loaded");

        Ok(Self {
            locale: config.locale.clone(),
            base_dir: config.base_dir.clone(),
            devices,
            config,
        })
    }

    /// Resolve `path` against the base directory unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Connector for the configured driver.
    pub fn connector(&self) -> AppResult<Box<dyn PortConnector>> {
        let device = &self.config.device;
        match device.driver {
            DriverKind::Simulated => {
                let model = self
                    .devices
                    .find(&device.sim_model)
                    .ok_or_else(|| AppError::Config {
                        message: format!("unknown simulated model '{}'", device.sim_model),
                    })?;
                Ok(Box::new(
                    SimulatedConnector::new(device.ports.clone())
                        .with_device(device.sim_port.clone(), model.clone())
                        .with_load_ohms(device.sim_load_ohms)
                        .with_realtime(device.sim_realtime),
                ))
            }
        }
    }
}

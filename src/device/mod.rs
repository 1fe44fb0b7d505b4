//! Potentiostat driver seam and device descriptors.
//!
//! The hardware driver itself is an external collaborator; this module only
//! fixes the primitives the run executor needs ([`Potentiostat`]), how ports
//! are discovered and opened ([`PortConnector`]), and what is known about
//! each supported model ([`DeviceDescriptor`]).

mod executor;
mod simulated;

pub use executor::{RunExecutor, RunSummary};
pub use simulated::{DeviceCall, SimulatedConnector, SimulatedPotentiostat};

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, DeviceError, DeviceResult};
use crate::store::{DataPoint, Relay};

/// Primitive operations of a connected potentiostat.
///
/// Implementations return an error on misuse (unknown range label, running
/// before the sample rate is set, ...). `run_constant` and `run_ramp` block
/// until the step is complete and report every sample through `on_point`,
/// with `time` in seconds relative to the step start.
#[async_trait]
pub trait Potentiostat: Send {
    /// Model name reported by the device.
    async fn identify(&mut self) -> DeviceResult<String>;

    async fn set_sample_rate(&mut self, interval_ms: u32) -> DeviceResult<()>;

    async fn set_current_range(&mut self, label: &str) -> DeviceResult<()>;

    async fn set_voltage_range(&mut self, label: &str) -> DeviceResult<()>;

    async fn run_constant(
        &mut self,
        voltage: f64,
        duration_ms: u64,
        on_point: &mut (dyn FnMut(DataPoint) + Send),
    ) -> DeviceResult<()>;

    async fn run_ramp(
        &mut self,
        voltage_start: f64,
        voltage_end: f64,
        duration_ms: u64,
        on_point: &mut (dyn FnMut(DataPoint) + Send),
    ) -> DeviceResult<()>;

    async fn set_digital_pin(&mut self, pin: u8, state: bool) -> DeviceResult<()>;

    async fn disconnect(&mut self) -> DeviceResult<()>;
}

/// Discovers serial ports and opens a potentiostat on one of them.
#[async_trait]
pub trait PortConnector: Send + Sync {
    /// Ports worth probing, in probing order.
    fn candidate_ports(&self) -> Vec<String>;

    /// Open the device on `port`. Fails when nothing answers there.
    async fn open(&self, port: &str) -> DeviceResult<Box<dyn Potentiostat>>;
}

/// A device voltage range: label sent to the driver and its symmetric
/// ceiling in volts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageRange {
    pub label: String,
    pub magnitude: u32,
}

impl VoltageRange {
    pub fn new(label: impl Into<String>, magnitude: u32) -> Self {
        Self {
            label: label.into(),
            magnitude,
        }
    }
}

/// Digital output pin driving a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMapping {
    pub relay: Relay,
    pub pin: u8,
}

/// Static capabilities of one potentiostat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Model name as reported by [`Potentiostat::identify`].
    pub name: String,
    pub min_sample_interval_ms: u32,
    pub max_sample_interval_ms: u32,
    /// Supported voltage ranges, ascending by magnitude.
    pub voltage_ranges: Vec<VoltageRange>,
    /// Supported current-range labels.
    pub current_ranges: Vec<String>,
    /// Controllable digital pins.
    #[serde(default)]
    pub pins: Vec<PinMapping>,
}

impl DeviceDescriptor {
    /// Digital pin wired to `relay`.
    pub fn pin_for(&self, relay: Relay) -> DeviceResult<u8> {
        self.pins
            .iter()
            .find(|p| p.relay == relay)
            .map(|p| p.pin)
            .ok_or_else(|| DeviceError::UnmappedRelay {
                relay: relay.to_string(),
            })
    }

    /// Check `interval_ms` against the device's sampling bounds.
    pub fn check_sample_interval(&self, interval_ms: u32) -> DeviceResult<()> {
        if (self.min_sample_interval_ms..=self.max_sample_interval_ms).contains(&interval_ms) {
            Ok(())
        } else {
            Err(DeviceError::SampleIntervalOutOfBounds {
                interval_ms,
                min_ms: self.min_sample_interval_ms,
                max_ms: self.max_sample_interval_ms,
            })
        }
    }

    /// Check that `label` is one of the device's current ranges.
    pub fn check_current_range(&self, label: &str) -> DeviceResult<()> {
        if self.current_ranges.iter().any(|r| r == label) {
            Ok(())
        } else {
            Err(DeviceError::UnsupportedCurrentRange {
                label: label.to_string(),
            })
        }
    }

    fn sort_ranges(&mut self) {
        self.voltage_ranges.sort_by_key(|r| r.magnitude);
    }
}

/// Known potentiostat models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistry {
    pub devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Build a registry, ordering every device's voltage ranges ascending.
    pub fn new(mut devices: Vec<DeviceDescriptor>) -> Self {
        for device in &mut devices {
            device.sort_ranges();
        }
        Self { devices }
    }

    /// The models supported out of the box.
    pub fn builtin() -> Self {
        Self::new(vec![DeviceDescriptor {
            name: "Rodeostat".to_string(),
            min_sample_interval_ms: 1,
            max_sample_interval_ms: 1000,
            voltage_ranges: vec![
                VoltageRange::new("1V", 1),
                VoltageRange::new("2V", 2),
                VoltageRange::new("5V", 5),
                VoltageRange::new("10V", 10),
            ],
            current_ranges: vec![
                "1uA".to_string(),
                "10uA".to_string(),
                "100uA".to_string(),
                "1000uA".to_string(),
            ],
            pins: vec![
                PinMapping {
                    relay: Relay::Stirrer,
                    pin: 2,
                },
                PinMapping {
                    relay: Relay::Vibrator,
                    pin: 3,
                },
            ],
        }])
    }

    /// Load a registry from a JSON file.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let registry: DeviceRegistry =
            serde_json::from_str(&text).map_err(|e| AppError::Config {
                message: format!("invalid device registry {}: {}", path.display(), e),
            })?;
        Ok(Self::new(registry.devices))
    }

    /// Descriptor for the model named `name`.
    pub fn find(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.name == name)
    }
}

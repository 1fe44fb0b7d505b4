//! Simulated potentiostat driving a purely resistive load.
//!
//! Used when no hardware driver is configured and throughout the tests. Every
//! primitive call is appended to a shared log so callers can inspect the exact
//! command sequence after the device has been handed off.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{DeviceDescriptor, PortConnector, Potentiostat};
use crate::error::{DeviceError, DeviceResult};
use crate::store::DataPoint;

/// One primitive call received by a simulated device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    SetSampleRate(u32),
    SetCurrentRange(String),
    SetVoltageRange(String),
    RunConstant { voltage: f64, duration_ms: u64 },
    RunRamp { start: f64, end: f64, duration_ms: u64 },
    SetPin { pin: u8, state: bool },
    Disconnect,
}

/// Shared record of device calls.
pub type CallLog = Arc<Mutex<Vec<DeviceCall>>>;

/// A device answering on a simulated port.
pub struct SimulatedPotentiostat {
    descriptor: DeviceDescriptor,
    load_ohms: f64,
    realtime: bool,
    sample_interval_ms: Option<u32>,
    voltage_range: Option<u32>,
    log: CallLog,
}

impl SimulatedPotentiostat {
    pub fn new(descriptor: DeviceDescriptor, load_ohms: f64, realtime: bool, log: CallLog) -> Self {
        Self {
            descriptor,
            load_ohms,
            realtime,
            sample_interval_ms: None,
            voltage_range: None,
            log,
        }
    }

    fn record(&self, call: DeviceCall) {
        if let Ok(mut log) = self.log.lock() {
            log.push(call);
        }
    }

    fn driver_error(message: impl Into<String>) -> DeviceError {
        DeviceError::Driver {
            message: message.into(),
        }
    }

    /// Sample a step, calling `voltage_at` with the fraction of the step elapsed.
    async fn sweep(
        &mut self,
        duration_ms: u64,
        voltage_at: impl Fn(f64) -> f64 + Send,
        on_point: &mut (dyn FnMut(DataPoint) + Send),
    ) -> DeviceResult<()> {
        let interval_ms = self
            .sample_interval_ms
            .ok_or_else(|| Self::driver_error("sample rate not set"))?;
        let range = self
            .voltage_range
            .ok_or_else(|| Self::driver_error("voltage range not set"))?;

        let samples = (duration_ms / u64::from(interval_ms)).max(1);
        for k in 0..samples {
            let elapsed_ms = k * u64::from(interval_ms);
            let voltage = voltage_at(elapsed_ms as f64 / duration_ms as f64);
            if voltage.abs() > f64::from(range) {
                return Err(Self::driver_error(format!(
                    "{} V outside the {} V range",
                    voltage, range
                )));
            }
            let current_ua = voltage / self.load_ohms * 1e6;
            on_point(DataPoint::new(elapsed_ms as f64 / 1000.0, voltage, current_ua));
            if self.realtime {
                tokio::time::sleep(Duration::from_millis(u64::from(interval_ms))).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Potentiostat for SimulatedPotentiostat {
    async fn identify(&mut self) -> DeviceResult<String> {
        Ok(self.descriptor.name.clone())
    }

    async fn set_sample_rate(&mut self, interval_ms: u32) -> DeviceResult<()> {
        if interval_ms == 0 {
            return Err(Self::driver_error("sample interval must be positive"));
        }
        self.record(DeviceCall::SetSampleRate(interval_ms));
        self.sample_interval_ms = Some(interval_ms);
        Ok(())
    }

    async fn set_current_range(&mut self, label: &str) -> DeviceResult<()> {
        self.descriptor.check_current_range(label)?;
        self.record(DeviceCall::SetCurrentRange(label.to_string()));
        Ok(())
    }

    async fn set_voltage_range(&mut self, label: &str) -> DeviceResult<()> {
        let range = self
            .descriptor
            .voltage_ranges
            .iter()
            .find(|r| r.label == label)
            .ok_or_else(|| Self::driver_error(format!("unknown voltage range {}", label)))?;
        self.voltage_range = Some(range.magnitude);
        self.record(DeviceCall::SetVoltageRange(label.to_string()));
        Ok(())
    }

    async fn run_constant(
        &mut self,
        voltage: f64,
        duration_ms: u64,
        on_point: &mut (dyn FnMut(DataPoint) + Send),
    ) -> DeviceResult<()> {
        self.record(DeviceCall::RunConstant {
            voltage,
            duration_ms,
        });
        self.sweep(duration_ms, move |_| voltage, on_point).await
    }

    async fn run_ramp(
        &mut self,
        voltage_start: f64,
        voltage_end: f64,
        duration_ms: u64,
        on_point: &mut (dyn FnMut(DataPoint) + Send),
    ) -> DeviceResult<()> {
        self.record(DeviceCall::RunRamp {
            start: voltage_start,
            end: voltage_end,
            duration_ms,
        });
        self.sweep(
            duration_ms,
            move |fraction| voltage_start + (voltage_end - voltage_start) * fraction,
            on_point,
        )
        .await
    }

    async fn set_digital_pin(&mut self, pin: u8, state: bool) -> DeviceResult<()> {
        if !self.descriptor.pins.iter().any(|p| p.pin == pin) {
            return Err(Self::driver_error(format!("pin {} is not controllable", pin)));
        }
        self.record(DeviceCall::SetPin { pin, state });
        Ok(())
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Disconnect);
        Ok(())
    }
}

/// Connector exposing a fixed set of ports, some of which have a simulated
/// device attached.
pub struct SimulatedConnector {
    ports: Vec<String>,
    attached: BTreeMap<String, DeviceDescriptor>,
    load_ohms: f64,
    realtime: bool,
    log: CallLog,
}

impl SimulatedConnector {
    /// A connector probing `ports`, none of which answer yet.
    pub fn new(ports: Vec<String>) -> Self {
        Self {
            ports,
            attached: BTreeMap::new(),
            load_ohms: 10_000.0,
            realtime: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach a device of model `descriptor` on `port`.
    pub fn with_device(mut self, port: impl Into<String>, descriptor: DeviceDescriptor) -> Self {
        self.attached.insert(port.into(), descriptor);
        self
    }

    /// Resistance of the simulated cell.
    pub fn with_load_ohms(mut self, load_ohms: f64) -> Self {
        self.load_ohms = load_ohms;
        self
    }

    /// Pace samples at the configured interval instead of returning at once.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Every call made to devices opened through this connector.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PortConnector for SimulatedConnector {
    fn candidate_ports(&self) -> Vec<String> {
        self.ports.clone()
    }

    async fn open(&self, port: &str) -> DeviceResult<Box<dyn Potentiostat>> {
        match self.attached.get(port) {
            Some(descriptor) => {
                debug!(port = %port, model = %descriptor.name, "Simulated device answered");
                Ok(Box::new(SimulatedPotentiostat::new(
                    descriptor.clone(),
                    self.load_ohms,
                    self.realtime,
                    Arc::clone(&self.log),
                )))
            }
            None => Err(DeviceError::Driver {
                message: format!("no response on {}", port),
            }),
        }
    }
}

use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{DeviceDescriptor, DeviceRegistry, PortConnector, Potentiostat};
use crate::error::{AppError, AppResult, DeviceError};
use crate::sequencer::{self, RunPhase};
use crate::store::{self, DataPoint, Step};
use crate::worker::{FrameSink, RunSpec, WorkerMessage};

/// What a finished run reports as its final payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Port the device was found on.
    pub port: String,
    /// Model name of the device.
    pub device: String,
    /// Label of the voltage range the run used.
    pub voltage_range: String,
    /// Number of device steps executed, relay toggles included.
    pub steps: usize,
    /// Number of telemetry points emitted.
    pub points: usize,
}

/// Drives one run against a potentiostat, reporting progress through a
/// [`FrameSink`].
pub struct RunExecutor<'a> {
    connector: &'a dyn PortConnector,
    registry: &'a DeviceRegistry,
    phase: RunPhase,
}

struct Connection {
    port: String,
    device: Box<dyn Potentiostat>,
    descriptor: DeviceDescriptor,
}

impl<'a> RunExecutor<'a> {
    pub fn new(connector: &'a dyn PortConnector, registry: &'a DeviceRegistry) -> Self {
        Self {
            connector,
            registry,
            phase: RunPhase::Idle,
        }
    }

    /// Current phase of the run.
    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(phase = %phase, "Run phase");
        self.phase = phase;
    }

    /// Execute `spec` to completion.
    ///
    /// Nothing is sent to the device before every step has been validated and
    /// the sample interval, current range and voltage range have all been
    /// checked against its descriptor.
    pub async fn execute<S: FrameSink + Send>(
        &mut self,
        spec: &RunSpec,
        sink: &mut S,
    ) -> AppResult<RunSummary> {
        self.enter(RunPhase::Connecting);
        sink.emit(WorkerMessage::Status("Searching for potentiostat".to_string()))?;

        let mut connection = match self.connect(spec.preferred_port.as_deref()).await {
            Ok(connection) => connection,
            Err(e) => {
                self.enter(RunPhase::Failed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        self.enter(RunPhase::Connected {
            port: connection.port.clone(),
        });
        sink.emit(WorkerMessage::PortInfo(connection.port.clone()))?;

        match self.drive(&mut connection, spec, sink).await {
            Ok(summary) => {
                if let Err(e) = connection.device.disconnect().await {
                    self.enter(RunPhase::Failed {
                        reason: e.to_string(),
                    });
                    return Err(e.into());
                }
                self.enter(RunPhase::Finished);
                info!(
                    port = %summary.port,
                    steps = summary.steps,
                    points = summary.points,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(disconnect_error) = connection.device.disconnect().await {
                    warn!(error = %disconnect_error, "Disconnect after failed run also failed");
                }
                self.enter(RunPhase::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Probe the preferred port, then every other candidate, until a known
    /// model answers.
    async fn connect(&self, preferred: Option<&str>) -> Result<Connection, DeviceError> {
        let preferred = preferred.filter(|p| !p.is_empty());
        let mut ports: Vec<String> = preferred.map(str::to_string).into_iter().collect();
        ports.extend(
            self.connector
                .candidate_ports()
                .into_iter()
                .filter(|p| Some(p.as_str()) != preferred),
        );

        for port in &ports {
            let mut device = match self.connector.open(port).await {
                Ok(device) => device,
                Err(e) => {
                    debug!(port = %port, error = %e, "No device on port");
                    continue;
                }
            };
            match device.identify().await {
                Ok(name) => {
                    if let Some(descriptor) = self.registry.find(&name) {
                        info!(port = %port, model = %name, "Potentiostat found");
                        return Ok(Connection {
                            port: port.clone(),
                            device,
                            descriptor: descriptor.clone(),
                        });
                    }
                    debug!(port = %port, model = %name, "Unknown device model");
                }
                Err(e) => debug!(port = %port, error = %e, "Device did not identify"),
            }
            if let Err(e) = device.disconnect().await {
                debug!(port = %port, error = %e, "Disconnect of rejected device failed");
            }
        }

        Err(DeviceError::DeviceNotFound { tried: ports })
    }

    async fn drive<S: FrameSink + Send>(
        &mut self,
        connection: &mut Connection,
        spec: &RunSpec,
        sink: &mut S,
    ) -> AppResult<RunSummary> {
        self.enter(RunPhase::Configuring);
        for (index, step) in spec.steps.iter().enumerate() {
            if let Some(problem) = store::step_problem(step) {
                return Err(DeviceError::InvalidStep {
                    step: index + 1,
                    problem: problem.to_string(),
                }
                .into());
            }
        }
        let descriptor = &connection.descriptor;
        let steps = sequencer::plan(&spec.steps, spec.relays_enabled);

        descriptor.check_sample_interval(spec.sample_interval_ms)?;
        descriptor.check_current_range(&spec.current_range)?;
        let range = sequencer::resolve_voltage_range(&steps, &descriptor.voltage_ranges)?;
        for step in &steps {
            if let Step::RelayToggle { relay, .. } = step {
                descriptor.pin_for(*relay)?;
            }
        }

        let device = connection.device.as_mut();
        device.set_sample_rate(spec.sample_interval_ms).await?;
        device.set_current_range(&spec.current_range).await?;
        device.set_voltage_range(&range.label).await?;
        sink.emit(WorkerMessage::Status(format!(
            "Configured {} ms interval, {} current range, {} voltage range",
            spec.sample_interval_ms, spec.current_range, range.label
        )))?;

        let total = steps.len();
        let mut offset_ms = 0u64;
        let mut points = 0usize;
        for (index, step) in steps.iter().enumerate() {
            self.enter(RunPhase::Executing {
                step: index + 1,
                of: total,
            });
            match step {
                Step::RelayToggle { relay, state } => {
                    let pin = descriptor.pin_for(*relay)?;
                    device.set_digital_pin(pin, *state).await?;
                    sink.emit(WorkerMessage::RelayState {
                        relay: *relay,
                        state: *state,
                    })?;
                }
                _ => {
                    points += run_step(device, step, offset_ms, sink).await?;
                }
            }
            offset_ms += step.duration_ms();
        }

        Ok(RunSummary {
            port: connection.port.clone(),
            device: descriptor.name.clone(),
            voltage_range: range.label.clone(),
            steps: total,
            points,
        })
    }
}

/// Run one constant or ramp step, emitting its telemetry shifted by the
/// duration of the steps before it. Returns the number of points emitted.
async fn run_step<S: FrameSink + Send>(
    device: &mut dyn Potentiostat,
    step: &Step,
    offset_ms: u64,
    sink: &mut S,
) -> AppResult<usize> {
    let collect = step.collects();
    let offset_s = offset_ms as f64 / 1000.0;
    let mut emitted = 0usize;
    let mut write_error: Option<io::Error> = None;

    let mut on_point = |p: DataPoint| {
        if !collect || write_error.is_some() {
            return;
        }
        let shifted = DataPoint::new(p.time + offset_s, p.voltage, p.current);
        match sink.emit(WorkerMessage::Telemetry(shifted)) {
            Ok(()) => emitted += 1,
            Err(e) => write_error = Some(e),
        }
    };

    match step {
        Step::Constant {
            voltage,
            duration_ms,
            ..
        } => {
            device
                .run_constant(*voltage, *duration_ms, &mut on_point)
                .await?
        }
        Step::Ramp {
            voltage_start,
            voltage_end,
            duration_ms,
            ..
        } => {
            device
                .run_ramp(*voltage_start, *voltage_end, *duration_ms, &mut on_point)
                .await?
        }
        Step::RelayToggle { .. } => {
            return Err(AppError::Internal {
                message: "relay toggle passed to run_step".to_string(),
            })
        }
    }

    match write_error {
        Some(e) => Err(e.into()),
        None => Ok(emitted),
    }
}

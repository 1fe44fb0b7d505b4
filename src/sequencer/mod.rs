//! Turns a method's step list into what the potentiostat executes.
//!
//! Two pure transformations live here:
//!
//! - **Relay bracketing**: the device keeps no implicit relay state, so every
//!   stirrer/vibrator transition becomes an explicit [`Step::RelayToggle`]
//!   placed right before the step that needs it, and relays still on after the
//!   last step are switched off.
//! - **Voltage-range resolution**: picks the narrowest device range that
//!   covers the most extreme voltage of the method.

use std::collections::BTreeMap;

use crate::device::VoltageRange;
use crate::error::{DeviceError, DeviceResult};
use crate::store::{Relay, Step};

/// Insert relay toggles around `steps`.
///
/// Toggles already present in the input are kept when they change a relay's
/// state and dropped when redundant.
pub fn bracket_relays(steps: &[Step]) -> Vec<Step> {
    let mut state: BTreeMap<Relay, bool> = Relay::ALL.iter().map(|r| (*r, false)).collect();
    let mut out = Vec::with_capacity(steps.len() + 2 * Relay::ALL.len());

    for step in steps {
        match step {
            Step::RelayToggle { relay, state: wanted } => {
                if state.insert(*relay, *wanted) != Some(*wanted) {
                    out.push(step.clone());
                }
            }
            _ => {
                for relay in Relay::ALL {
                    let wanted = step.relay_flag(relay).unwrap_or(false);
                    if state.insert(relay, wanted) != Some(wanted) {
                        out.push(Step::RelayToggle {
                            relay,
                            state: wanted,
                        });
                    }
                }
                out.push(step.clone());
            }
        }
    }

    for (relay, on) in state {
        if on {
            out.push(Step::RelayToggle {
                relay,
                state: false,
            });
        }
    }
    out
}

/// Drop every relay toggle; used when relays are disabled for a run.
pub fn strip_relays(steps: &[Step]) -> Vec<Step> {
    steps.iter().filter(|s| !s.is_relay()).cloned().collect()
}

/// The device step list for `steps`.
pub fn plan(steps: &[Step], relays_enabled: bool) -> Vec<Step> {
    if relays_enabled {
        bracket_relays(steps)
    } else {
        strip_relays(steps)
    }
}

/// Largest absolute voltage any constant or ramp step drives the cell to.
pub fn required_voltage(steps: &[Step]) -> f64 {
    steps
        .iter()
        .flat_map(Step::voltages)
        .map(f64::abs)
        .fold(0.0, f64::max)
}

/// Smallest range whose magnitude covers [`required_voltage`].
///
/// Exact coverage is enough; no margin is added.
pub fn resolve_voltage_range<'a>(
    steps: &[Step],
    ranges: &'a [VoltageRange],
) -> DeviceResult<&'a VoltageRange> {
    let required = required_voltage(steps);
    ranges
        .iter()
        .filter(|r| f64::from(r.magnitude) >= required)
        .min_by_key(|r| r.magnitude)
        .ok_or_else(|| DeviceError::VoltageRangeExceeded {
            required,
            maximum: ranges
                .iter()
                .map(|r| f64::from(r.magnitude))
                .fold(0.0, f64::max),
        })
}

/// Phase of a single run execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Idle,
    Connecting,
    Connected { port: String },
    Configuring,
    Executing { step: usize, of: usize },
    Finished,
    Failed { reason: String },
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Connecting => write!(f, "connecting"),
            RunPhase::Connected { port } => write!(f, "connected on {}", port),
            RunPhase::Configuring => write!(f, "configuring"),
            RunPhase::Executing { step, of } => write!(f, "executing step {} of {}", step, of),
            RunPhase::Finished => write!(f, "finished"),
            RunPhase::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

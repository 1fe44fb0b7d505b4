//! Sample document model and on-disk persistence.
//!
//! A sample file holds one [`Sample`]: its collection metadata, the methods
//! (step recipes) used on it, and the runs executed against a potentiostat,
//! each with its replicates and recorded telemetry.

mod document;


pub use document::{load, parse, persist, validate};
pub(crate) use document::step_problem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for method identifiers (`method-1`, `method-2`, ...).
pub const METHOD_ID_PREFIX: &str = "method-";
/// Prefix for run identifiers (`run-1`, `run-2`, ...).
pub const RUN_ID_PREFIX: &str = "run-";
/// Prefix for replicate identifiers, sequential from zero within a run.
pub const REPLICATE_ID_PREFIX: &str = "rep-";

/// One sample file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Display name of the sample.
    pub name: String,
    /// Where, when and by whom the sample was collected.
    #[serde(default)]
    pub collection: CollectionInfo,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// When the sample file was created.
    pub created_at: DateTime<Utc>,
    /// Step recipes referenced by runs.
    pub methods: Vec<Method>,
    /// Configured runs in creation order.
    pub runs: Vec<Run>,
}

/// Collection metadata of a sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionInfo {
    pub date: String,
    pub location: String,
    pub contact: String,
    pub collector: String,
}

/// Editable sample-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub name: String,
    #[serde(default)]
    pub collection: CollectionInfo,
    #[serde(default)]
    pub notes: String,
}

/// A reusable voltammetry recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    /// Prefixed identifier; left empty by callers that want one assigned.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Interval between telemetry samples.
    pub sample_interval_ms: u32,
    /// Device current-range label, e.g. `"100uA"`.
    pub current_range: String,
    /// Ordered steps.
    pub steps: Vec<Step>,
}

/// An auxiliary device switched through a digital output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relay {
    Stirrer,
    Vibrator,
}

impl Relay {
    /// Every controllable relay, in bracketing order.
    pub const ALL: [Relay; 2] = [Relay::Stirrer, Relay::Vibrator];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Relay::Stirrer => "stirrer",
            Relay::Vibrator => "vibrator",
        }
    }
}

impl std::fmt::Display for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Hold a fixed voltage.
    Constant {
        voltage: f64,
        duration_ms: u64,
        #[serde(default)]
        stir: bool,
        #[serde(default)]
        vibrate: bool,
        #[serde(default = "default_collect")]
        collect: bool,
    },
    /// Sweep linearly between two voltages.
    Ramp {
        voltage_start: f64,
        voltage_end: f64,
        duration_ms: u64,
        #[serde(default)]
        stir: bool,
        #[serde(default)]
        vibrate: bool,
        #[serde(default = "default_collect")]
        collect: bool,
    },
    /// Switch a relay on or off.
    RelayToggle { relay: Relay, state: bool },
}

fn default_collect() -> bool {
    true
}

impl Step {
    /// Create a constant-voltage step with both relays off.
    pub fn constant(voltage: f64, duration_ms: u64) -> Self {
        Step::Constant {
            voltage,
            duration_ms,
            stir: false,
            vibrate: false,
            collect: true,
        }
    }

    /// Create a ramp step with both relays off.
    pub fn ramp(voltage_start: f64, voltage_end: f64, duration_ms: u64) -> Self {
        Step::Ramp {
            voltage_start,
            voltage_end,
            duration_ms,
            stir: false,
            vibrate: false,
            collect: true,
        }
    }

    /// Set the stirrer flag on a non-relay step.
    pub fn with_stir(mut self, on: bool) -> Self {
        if let Step::Constant { stir, .. } | Step::Ramp { stir, .. } = &mut self {
            *stir = on;
        }
        self
    }

    /// Set the vibrator flag on a non-relay step.
    pub fn with_vibrate(mut self, on: bool) -> Self {
        if let Step::Constant { vibrate, .. } | Step::Ramp { vibrate, .. } = &mut self {
            *vibrate = on;
        }
        self
    }

    /// Set the data-collection flag on a non-relay step.
    pub fn with_collect(mut self, on: bool) -> Self {
        if let Step::Constant { collect, .. } | Step::Ramp { collect, .. } = &mut self {
            *collect = on;
        }
        self
    }

    /// Whether this step is a relay toggle.
    pub fn is_relay(&self) -> bool {
        matches!(self, Step::RelayToggle { .. })
    }

    /// Desired state of `relay` while this step runs. `None` for relay steps.
    pub fn relay_flag(&self, relay: Relay) -> Option<bool> {
        match self {
            Step::Constant { stir, vibrate, .. } | Step::Ramp { stir, vibrate, .. } => {
                Some(match relay {
                    Relay::Stirrer => *stir,
                    Relay::Vibrator => *vibrate,
                })
            }
            Step::RelayToggle { .. } => None,
        }
    }

    /// Whether telemetry from this step is recorded.
    pub fn collects(&self) -> bool {
        match self {
            Step::Constant { collect, .. } | Step::Ramp { collect, .. } => *collect,
            Step::RelayToggle { .. } => false,
        }
    }

    /// Step duration; zero for relay steps.
    pub fn duration_ms(&self) -> u64 {
        match self {
            Step::Constant { duration_ms, .. } | Step::Ramp { duration_ms, .. } => *duration_ms,
            Step::RelayToggle { .. } => 0,
        }
    }

    /// Voltages this step drives the cell to.
    pub fn voltages(&self) -> Vec<f64> {
        match self {
            Step::Constant { voltage, .. } => vec![*voltage],
            Step::Ramp {
                voltage_start,
                voltage_end,
                ..
            } => vec![*voltage_start, *voltage_end],
            Step::RelayToggle { .. } => Vec::new(),
        }
    }
}

/// Kind of run and its type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run_type", rename_all = "kebab-case")]
pub enum RunType {
    /// Supporting electrolyte only.
    Blank,
    /// Sample aliquot diluted to a total volume.
    Sample {
        sample_volume: f64,
        total_volume: f64,
    },
    /// Known standard spiked into the cell.
    StandardAddition {
        standard_volume: f64,
        standard_concentration: f64,
    },
}

impl RunType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Blank => "blank",
            RunType::Sample { .. } => "sample",
            RunType::StandardAddition { .. } => "standard-addition",
        }
    }
}

/// One configured application of a method against a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Prefixed identifier; left empty by callers that want one assigned.
    #[serde(default)]
    pub id: String,
    /// Method this run executes.
    pub method_id: String,
    /// Device name the run targets.
    pub device: String,
    /// Run kind and parameters.
    #[serde(flatten)]
    pub run_type: RunType,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// When the run was configured.
    pub created_at: DateTime<Utc>,
    /// Repeated trials.
    pub replicates: Vec<Replicate>,
}

impl Run {
    /// Create a run with `replicate_count` pending replicates.
    pub fn new(
        method_id: impl Into<String>,
        device: impl Into<String>,
        run_type: RunType,
        replicate_count: usize,
    ) -> Self {
        Self {
            id: String::new(),
            method_id: method_id.into(),
            device: device.into(),
            run_type,
            notes: String::new(),
            created_at: Utc::now(),
            replicates: (0..replicate_count)
                .map(|n| Replicate::pending(format!("{}{}", REPLICATE_ID_PREFIX, n)))
                .collect(),
        }
    }

    /// Set the run identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Find a replicate by id.
    pub fn replicate(&self, rep_id: &str) -> Option<&Replicate> {
        self.replicates.iter().find(|r| r.id == rep_id)
    }

    /// Editable run-level fields.
    pub fn fields(&self) -> RunFields {
        RunFields {
            method_id: self.method_id.clone(),
            device: self.device.clone(),
            run_type: self.run_type.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Editable run-level fields; replicates are never part of a field update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFields {
    pub method_id: String,
    pub device: String,
    #[serde(flatten)]
    pub run_type: RunType,
    #[serde(default)]
    pub notes: String,
}

/// Outcome of the last attempt at a replicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateStatus {
    /// Not yet attempted.
    #[default]
    Pending,
    /// Last attempt failed.
    Error,
    /// Data was recorded.
    Success,
    /// Recorded data has been analyzed.
    Analyzed,
}

impl std::fmt::Display for ReplicateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicateStatus::Pending => write!(f, "pending"),
            ReplicateStatus::Error => write!(f, "error"),
            ReplicateStatus::Success => write!(f, "success"),
            ReplicateStatus::Analyzed => write!(f, "analyzed"),
        }
    }
}

impl std::str::FromStr for ReplicateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReplicateStatus::Pending),
            "error" => Ok(ReplicateStatus::Error),
            "success" => Ok(ReplicateStatus::Success),
            "analyzed" => Ok(ReplicateStatus::Analyzed),
            _ => Err(format!("Unknown replicate status: {}", s)),
        }
    }
}

/// One executed trial of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replicate {
    /// `rep-N`, sequential within the run.
    pub id: String,
    pub status: ReplicateStatus,
    /// When the replicate was last attempted.
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    /// Recorded telemetry.
    #[serde(default)]
    pub data: Vec<DataPoint>,
    /// Background telemetry for subtraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Vec<DataPoint>>,
}

impl Replicate {
    /// Create a pending replicate without data.
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ReplicateStatus::Pending,
            last_attempt: None,
            notes: String::new(),
            data: Vec::new(),
            background: None,
        }
    }

    /// Whether any telemetry was recorded.
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Editable replicate fields.
    pub fn fields(&self) -> ReplicateFields {
        ReplicateFields {
            status: self.status,
            last_attempt: self.last_attempt,
            notes: self.notes.clone(),
        }
    }
}

/// Replicate metadata; never carries recorded data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateFields {
    pub status: ReplicateStatus,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
}

/// A `(time, voltage, current)` telemetry tuple.
///
/// Serialized as a three-element array to keep sample files compact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, f64)", into = "(f64, f64, f64)")]
pub struct DataPoint {
    /// Seconds since the start of the run.
    pub time: f64,
    /// Cell voltage in volts.
    pub voltage: f64,
    /// Cell current in microamps.
    pub current: f64,
}

impl DataPoint {
    pub fn new(time: f64, voltage: f64, current: f64) -> Self {
        Self {
            time,
            voltage,
            current,
        }
    }
}

impl From<(f64, f64, f64)> for DataPoint {
    fn from((time, voltage, current): (f64, f64, f64)) -> Self {
        Self::new(time, voltage, current)
    }
}

impl From<DataPoint> for (f64, f64, f64) {
    fn from(p: DataPoint) -> Self {
        (p.time, p.voltage, p.current)
    }
}

/// Address of one replicate, serialized as a `[run_id, rep_id]` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct TaskId {
    pub run_id: String,
    pub rep_id: String,
}

impl TaskId {
    pub fn new(run_id: impl Into<String>, rep_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            rep_id: rep_id.into(),
        }
    }
}

impl From<(String, String)> for TaskId {
    fn from((run_id, rep_id): (String, String)) -> Self {
        Self { run_id, rep_id }
    }
}

impl From<TaskId> for (String, String) {
    fn from(t: TaskId) -> Self {
        (t.run_id, t.rep_id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.run_id, self.rep_id)
    }
}

impl Sample {
    /// Create an empty sample.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: CollectionInfo::default(),
            notes: String::new(),
            created_at: Utc::now(),
            methods: Vec::new(),
            runs: Vec::new(),
        }
    }

    /// Editable sample-level fields.
    pub fn metadata(&self) -> SampleMetadata {
        SampleMetadata {
            name: self.name.clone(),
            collection: self.collection.clone(),
            notes: self.notes.clone(),
        }
    }

    /// Find a method by id.
    pub fn method(&self, method_id: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.id == method_id)
    }

    /// Find a run by id.
    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    /// Find a replicate by its task address.
    pub fn replicate(&self, task: &TaskId) -> Option<&Replicate> {
        self.run(&task.run_id)
            .and_then(|run| run.replicate(&task.rep_id))
    }

    /// Runs referencing `method_id`.
    pub fn runs_using(&self, method_id: &str) -> impl Iterator<Item = &Run> {
        let method_id = method_id.to_string();
        self.runs.iter().filter(move |r| r.method_id == method_id)
    }

    /// Next unused method id.
    pub fn next_method_id(&self) -> String {
        next_prefixed_id(
            METHOD_ID_PREFIX,
            self.methods.iter().map(|m| m.id.as_str()),
        )
    }

    /// Next unused run id.
    pub fn next_run_id(&self) -> String {
        next_prefixed_id(RUN_ID_PREFIX, self.runs.iter().map(|r| r.id.as_str()))
    }

    /// Copy of the sample without recorded telemetry.
    ///
    /// Workers hand this back to the interactive process, which only ever
    /// needs metadata and replicate statuses.
    pub fn without_data(&self) -> Sample {
        let mut stripped = self.clone();
        for run in &mut stripped.runs {
            for rep in &mut run.replicates {
                rep.data.clear();
                rep.background = None;
            }
        }
        stripped
    }
}

/// Returns `prefix` followed by one more than the largest numeric suffix in use,
/// starting at 1.
fn next_prefixed_id<'a>(prefix: &str, ids: impl Iterator<Item = &'a str>) -> String {
    let highest = ids
        .filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", prefix, highest + 1)
}

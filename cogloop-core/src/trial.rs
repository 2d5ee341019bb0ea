use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use cogloop_timing::CalibrationStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;
use crate::role::{Fast, LoopToken};

/// Opaque parameter bag produced by the design method.
pub type ParameterSet = serde_json::Map<String, Value>;

/// Parameter that marks a trial as belonging to an adaptive staircase.
pub const STAIRCASE_ID: &str = "staircaseID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Invalidated,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Response captured by the fast loop. The first capture wins.
#[derive(Debug, Default)]
pub struct ResponseSlot(OnceLock<Value>);

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a response was already captured.
    pub fn capture(&self, _token: &LoopToken<Fast>, value: Value) -> bool {
        self.0.set(value).is_ok()
    }

    pub fn get(&self) -> Option<&Value> {
        self.0.get()
    }
}

/// What the loops see of the running trial.
#[derive(Debug, Clone)]
pub struct TrialView {
    pub id: u64,
    pub parameters: Arc<ParameterSet>,
    pub response: Arc<ResponseSlot>,
    pub replayed: bool,
}

impl TrialView {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.get()
    }

    pub fn staircase_id(&self) -> Option<&Value> {
        self.parameters.get(STAIRCASE_ID)
    }
}

/// One trial from creation to persistence.
///
/// Status only moves forward: `Pending -> Running -> Completed | Invalidated`,
/// with `Pending -> Invalidated` allowed when the trial never got to run.
#[derive(Debug)]
pub struct Trial {
    id: u64,
    parameters: Arc<ParameterSet>,
    response: Option<Value>,
    status: TrialStatus,
    timestamps: BTreeMap<String, f64>,
    replayed: bool,
}

impl Trial {
    pub fn new(id: u64, parameters: ParameterSet, replayed: bool) -> Self {
        Self {
            id,
            parameters: Arc::new(parameters),
            response: None,
            status: TrialStatus::Pending,
            timestamps: BTreeMap::new(),
            replayed,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn status(&self) -> TrialStatus {
        self.status
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn replayed(&self) -> bool {
        self.replayed
    }

    pub fn timestamps(&self) -> &BTreeMap<String, f64> {
        &self.timestamps
    }

    pub fn staircase_id(&self) -> Option<&Value> {
        self.parameters.get(STAIRCASE_ID)
    }

    pub fn is_adaptive(&self) -> bool {
        self.staircase_id().is_some_and(|v| !v.is_null())
    }

    fn transition(&mut self, allowed: &[TrialStatus], to: TrialStatus) -> Result<(), StateError> {
        if !allowed.contains(&self.status) {
            return Err(StateError::InvalidTrialTransition {
                id: self.id,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        log::debug!("trial {}: {} -> {}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), StateError> {
        self.transition(&[TrialStatus::Pending], TrialStatus::Running)
    }

    pub fn complete(&mut self, response: Option<Value>) -> Result<(), StateError> {
        self.transition(&[TrialStatus::Running], TrialStatus::Completed)?;
        self.response = response;
        Ok(())
    }

    /// Invalidated trials never carry a response.
    pub fn invalidate(&mut self) -> Result<(), StateError> {
        self.transition(
            &[TrialStatus::Pending, TrialStatus::Running],
            TrialStatus::Invalidated,
        )?;
        self.response = None;
        Ok(())
    }

    /// Seconds since trial start.
    pub fn stamp(&mut self, event: impl Into<String>, secs: f64) {
        self.timestamps.insert(event.into(), secs);
    }

    /// Repeat events keep the first stamp under `event`; later ones become
    /// `event#2`, `event#3` and so on.
    pub fn merge_timestamps(&mut self, stamps: impl IntoIterator<Item = (String, f64)>) {
        for (event, secs) in stamps {
            let mut key = event.clone();
            let mut visit = 1;
            while self.timestamps.contains_key(&key) {
                visit += 1;
                key = format!("{event}#{visit}");
            }
            self.timestamps.insert(key, secs);
        }
    }

    pub fn view(&self) -> TrialView {
        TrialView {
            id: self.id,
            parameters: Arc::clone(&self.parameters),
            response: Arc::new(ResponseSlot::new()),
            replayed: self.replayed,
        }
    }

    pub fn to_record(&self) -> TrialRecord {
        TrialRecord {
            id: self.id,
            parameters: (*self.parameters).clone(),
            response: self.response.clone(),
            status: self.status,
            timestamps: self.timestamps.clone(),
            device_files: BTreeMap::new(),
            degraded_devices: Vec::new(),
            replayed: self.replayed,
            data: serde_json::Map::new(),
            frame_stats: None,
        }
    }
}

/// Frame pacing of the graphics loop during one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frames: usize,
    pub mean_ms: f64,
    pub jitter_ms: f64,
    pub max_ms: f64,
    pub fps: f64,
}

impl From<&CalibrationStats> for FrameSummary {
    fn from(stats: &CalibrationStats) -> Self {
        Self {
            frames: stats.frames,
            mean_ms: stats.average_frame_time_ns / 1e6,
            jitter_ms: stats.jitter_ns / 1e6,
            max_ms: stats.max_frame_time_ns / 1e6,
            fps: stats.effective_fps,
        }
    }
}

/// Persisted form of a finished trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: u64,
    pub parameters: ParameterSet,
    pub response: Option<Value>,
    pub status: TrialStatus,
    pub timestamps: BTreeMap<String, f64>,
    pub device_files: BTreeMap<String, String>,
    #[serde(default)]
    pub degraded_devices: Vec<String>,
    #[serde(default)]
    pub replayed: bool,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub frame_stats: Option<FrameSummary>,
}

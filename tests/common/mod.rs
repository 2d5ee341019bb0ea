#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cogloop::cogloop_experiment::{HistoryEntry, PauseConfig, PauseMode};
use cogloop::{
    Blueprint, ConfigError, Conditions, Constant, DeviceError, DeviceRegistry, DummyDevice,
    Experiment, Fast, Graphics, MemoryWriter, Method, Next, ParameterSet, PixmapDisplay, Session,
    SessionConfig, StateTable,
};
use serde_json::{Value, json};

pub const RESPOND: &str = "respond";

type StatesHook = Box<dyn Fn(&mut Blueprint) -> Result<(), ConfigError> + Send + Sync>;

/// One `respond` state in each loop. By default the fast loop answers
/// "tap" at once and the graphics loop leaves once it sees the answer.
pub struct TapExperiment {
    devices: Mutex<Vec<(DummyDevice, bool)>>,
    states: Option<StatesHook>,
}

impl TapExperiment {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            states: None,
        }
    }

    pub fn with_device(self, device: DummyDevice, required: bool) -> Self {
        self.devices.lock().unwrap().push((device, required));
        self
    }

    /// Replaces both default `respond` states. The hook must add `respond`
    /// to both tables.
    pub fn with_states<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Blueprint) -> Result<(), ConfigError> + Send + Sync + 'static,
    {
        self.states = Some(Box::new(hook));
        self
    }
}

impl Experiment for TapExperiment {
    fn name(&self) -> &str {
        "tap"
    }

    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError> {
        match &self.states {
            Some(hook) => hook(blueprint)?,
            None => {
                default_fast(&mut blueprint.fast)?;
                default_graphics(&mut blueprint.graphics)?;
            }
        }
        blueprint.fast.begin_with(RESPOND)?;
        blueprint.graphics.begin_with(RESPOND)
    }

    fn init_devices(
        &self,
        _config: &SessionConfig,
        devices: &mut DeviceRegistry,
    ) -> Result<(), DeviceError> {
        for (device, required) in self.devices.lock().unwrap().drain(..) {
            let name = format!("dummy{}", devices.len());
            devices.register(&name, Box::new(device), required)?;
        }
        Ok(())
    }
}

pub fn default_fast(table: &mut StateTable<Fast>) -> Result<(), ConfigError> {
    table.add(RESPOND)?.hold().body(|ctx| {
        ctx.capture_response(json!("tap"));
        ctx.move_on();
        Ok(())
    });
    Ok(())
}

pub fn default_graphics(table: &mut StateTable<Graphics>) -> Result<(), ConfigError> {
    table.add(RESPOND)?.hold().body(|ctx| {
        if ctx.trial().response().is_some() {
            ctx.move_on();
        }
        Ok(())
    });
    Ok(())
}

/// Adaptive method issuing `trials` staircase trials and counting reports.
pub struct CountingStaircase {
    pub remaining: usize,
    pub reports: Arc<AtomicUsize>,
}

impl Method for CountingStaircase {
    fn next(&mut self, history: &[HistoryEntry]) -> Next {
        self.reports.store(history.len(), Ordering::SeqCst);
        if self.remaining == 0 {
            return Next::Done;
        }
        self.remaining -= 1;
        let mut p = ParameterSet::new();
        p.insert("staircaseID".into(), json!(1));
        p.insert("intensity".into(), json!(0.5));
        Next::Trial(p)
    }
}

pub fn config(max_trials: Option<usize>) -> SessionConfig {
    let mut durations = BTreeMap::new();
    durations.insert("idle".to_string(), Some(0.0));
    SessionConfig {
        participant: "p01".into(),
        experiment: "tap".into(),
        durations,
        max_trials,
        refresh_rate_hz: 500.0,
        ..SessionConfig::default()
    }
}

pub fn count_pauses(every: usize) -> Option<PauseConfig> {
    Some(PauseConfig {
        mode: PauseMode::Count,
        interval: every as f64,
    })
}

pub fn constant(factor: &str, levels: Vec<Value>, repetition: usize) -> Box<dyn Method> {
    let mut factors = BTreeMap::new();
    factors.insert(factor.to_string(), levels);
    Box::new(Constant::new(&Conditions {
        factors,
        repetition,
        randomize: false,
    }))
}

pub fn session(
    config: SessionConfig,
    experiment: TapExperiment,
    method: Box<dyn Method>,
) -> (Session, MemoryWriter) {
    let writer = MemoryWriter::new();
    let display = PixmapDisplay::new(32, 32, config.refresh_rate_hz).unwrap();
    let session = Session::new(
        config,
        Arc::new(experiment),
        method,
        Box::new(display),
        Box::new(writer.clone()),
    )
    .unwrap();
    (session, writer)
}

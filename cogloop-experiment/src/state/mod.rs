//! Generic transition engine, instantiated once per loop.

mod context;
mod defaults;
mod machine;
mod table;

use std::sync::Arc;

use cogloop_core::{Fast, Graphics, LoopRole, LoopToken, StimulusSet, TrialShared, TriggerSchema};
use serde_json::Value;

use crate::device::DeviceRegistry;
use crate::experiment::Experiment;

pub use context::StateContext;
pub use machine::{StateMachine, Step};
pub use table::{StateBody, StateSpec, StateTable};

pub const LOADING: &str = "loading";
pub const IDLE: &str = "idle";
pub const ITI: &str = "iti";
pub const INIT: &str = "init";
pub const PAUSE: &str = "pause";
pub const END: &str = "end";

pub const DEFAULT_STATES: [&str; 6] = [LOADING, IDLE, ITI, INIT, PAUSE, END];

/// A loop role together with what its state bodies may touch exclusively.
pub trait Loop: LoopRole + Sized {
    type Resources: Send;

    fn install_defaults(table: &mut StateTable<Self>);

    /// Runs after every committed transition of this loop.
    fn after_commit(_token: &LoopToken<Self>, _shared: &TrialShared) {}
}

/// Owned by the fast loop for the duration of a trial.
#[derive(Debug)]
pub struct FastResources {
    pub devices: DeviceRegistry,
    /// Experiment values recorded during the trial, persisted with it.
    pub data: serde_json::Map<String, Value>,
}

impl FastResources {
    pub fn new(devices: DeviceRegistry) -> Self {
        Self {
            devices,
            data: serde_json::Map::new(),
        }
    }
}

/// Lives on the graphics thread for the whole session.
pub struct GraphicsResources {
    pub stimuli: StimulusSet,
    pub experiment: Arc<dyn Experiment>,
    pub welcome_text: String,
    pub pause_text: String,
}

impl GraphicsResources {
    pub fn new(experiment: Arc<dyn Experiment>, pause_text: impl Into<String>) -> Self {
        Self {
            stimuli: StimulusSet::new(),
            welcome_text: experiment.welcome_text(),
            experiment,
            pause_text: pause_text.into(),
        }
    }
}

impl Loop for Fast {
    type Resources = FastResources;

    fn install_defaults(table: &mut StateTable<Self>) {
        defaults::install_fast(table);
    }

    /// A button press moves the fast machine on by one state only.
    fn after_commit(token: &LoopToken<Self>, shared: &TrialShared) {
        shared
            .triggers
            .set(token, TriggerSchema::move_on(), false);
    }
}

impl Loop for Graphics {
    type Resources = GraphicsResources;

    fn install_defaults(table: &mut StateTable<Self>) {
        defaults::install_graphics(table);
    }
}

//! Dual-rate trial state machines for behavioural experiments.
//!
//! A session runs each trial on two threads: a fast loop that polls devices
//! and evaluates triggers, and a graphics loop paced by the display. Both run
//! their own [`StateMachine`] over the same state names and meet in `end`.

pub use cogloop_core;
pub use cogloop_experiment;
pub use cogloop_render;
pub use cogloop_timing;

pub use cogloop_core::{
    ConfigError, DeviceError, Display, Fast, Graphics, ParameterSet, StateError, Stimulus,
    StimulusSet, StimulusType, TrialRecord, TrialStatus, TrialView, TriggerSchema,
};
pub use cogloop_experiment::{
    Blueprint, Conditions, Constant, Device, DeviceRegistry, DummyDevice, Experiment,
    JsonLinesWriter, MemoryWriter, Method, Next, Session, SessionConfig, SessionError,
    SessionSummary, StateContext, StateMachine, StateTable,
};
pub use cogloop_render::PixmapDisplay;

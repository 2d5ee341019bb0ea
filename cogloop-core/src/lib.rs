pub mod error;
pub mod readout;
pub mod role;
pub mod shared;
pub mod stimulus;
pub mod timers;
pub mod trial;
pub mod trigger;

pub use error::{ConfigError, DataWriteError, DeviceError, DisplayError, StateError};
pub use readout::{AnyReadout, ReadoutKey, ReadoutSchema, ReadoutSet};
pub use role::{Fast, Graphics, LoopKind, LoopRole, LoopToken};
pub use shared::{SharedSchema, TrialShared};
pub use stimulus::{ArrowDirection, Display, Stimulus, StimulusSet, StimulusType};
pub use timers::{AnyTimer, RUNTIME_TIMER, TimerKey, TimerSchema, TimerSet};
pub use trial::{
    FrameSummary, ParameterSet, ResponseSlot, STAIRCASE_ID, Trial, TrialRecord, TrialStatus,
    TrialView,
};
pub use trigger::{
    AnyTrigger, MOVE_ON_REQUESTED, PAUSE_REQUESTED, QUIT_REQUESTED, QuitFlag, QuitOrigin,
    RESERVED_TRIGGERS, START_TRIGGER, SingleShotScope, TriggerKey, TriggerSchema, TriggerSet,
};

pub mod config;
pub mod coordinator;
pub mod design;
pub mod device;
pub mod error;
pub mod experiment;
pub mod pause;
pub mod record;
pub mod session;
pub mod state;

pub use config::{DeviceSettings, PauseConfig, PauseMode, SessionConfig};
pub use coordinator::{Coordinator, LoopOutcome, TrialRun};
pub use design::{Conditions, Constant, Design, HistoryEntry, Method, Next, TrialSpec};
pub use device::{
    Device, DeviceCall, DeviceLog, DeviceRegistry, DeviceReport, DummyDevice, FileNaming,
};
pub use error::{LoopFault, SessionError};
pub use experiment::{Blueprint, Experiment};
pub use pause::PauseSchedule;
pub use record::{JsonLinesWriter, MemoryWriter, RecordWriter, persist_with_retry};
pub use session::{Session, SessionSummary};
pub use state::{
    FastResources, GraphicsResources, Loop, StateBody, StateContext, StateMachine, StateSpec,
    StateTable, Step,
};

use cogloop_core::{
    ConfigError, DataWriteError, DeviceError, DisplayError, LoopKind, StateError,
};
use thiserror::Error;

/// Unhandled fault inside one loop. The loop stops and raises quit.
#[derive(Debug, Clone, Error)]
pub enum LoopFault {
    #[error("[{0}] {1}")]
    State(LoopKind, #[source] StateError),

    #[error("[graphics] {0}")]
    Display(#[from] DisplayError),

    #[error("[{0}] panicked: {1}")]
    Panicked(LoopKind, String),
}

/// Everything that aborts a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    DataWrite(#[from] DataWriteError),

    #[error("trial {trial} aborted the session: {fault}")]
    Loop { trial: u64, fault: LoopFault },

    #[error("the {0} loop thread is gone")]
    LoopDisconnected(LoopKind),

    #[error("failed to spawn a loop thread: {0}")]
    Spawn(#[source] std::io::Error),
}

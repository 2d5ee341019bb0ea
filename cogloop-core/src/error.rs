use std::path::PathBuf;

use thiserror::Error;

use crate::role::LoopKind;

/// Malformed or missing configuration. Fatal before any trial starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String },

    #[error("`{name}` is a reserved {kind} name")]
    ReservedName { kind: &'static str, name: String },

    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("state `{state}` is not registered in the {machine} machine")]
    MissingState { machine: LoopKind, state: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Logic defect detected while a loop runs. Always triggers a coordinated quit.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("{machine} machine cannot enter unknown state `{name}`")]
    UnknownState { machine: LoopKind, name: String },

    #[error("unknown trigger `{0}`")]
    UnknownTrigger(String),

    #[error("unknown timer `{0}`")]
    UnknownTimer(String),

    #[error("unknown readout `{0}`")]
    UnknownReadout(String),

    #[error("unknown stimulus `{0}`")]
    UnknownStimulus(String),

    #[error("{kind} `{name}` is owned by the {owner} loop, not {requested}")]
    OwnershipMismatch {
        kind: &'static str,
        name: String,
        owner: LoopKind,
        requested: LoopKind,
    },

    #[error("trial {id} cannot move from {from} to {to}")]
    InvalidTrialTransition { id: u64, from: String, to: String },

    #[error("state `{state}` failed: {message}")]
    Body { state: String, message: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl StateError {
    pub fn body(state: impl Into<String>, message: impl ToString) -> Self {
        StateError::Body {
            state: state.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("device `{device}` failed to {op}: {reason}")]
    Failed {
        device: String,
        op: &'static str,
        reason: String,
    },

    #[error("device `{0}` is not registered")]
    NotRegistered(String),

    #[error("device `{0}` is already registered")]
    Duplicate(String),
}

impl DeviceError {
    pub fn failed(device: impl Into<String>, op: &'static str, reason: impl ToString) -> Self {
        DeviceError::Failed {
            device: device.into(),
            op,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataWriteError {
    #[error("could not persist trial {trial} to {path} after {attempts} attempts: {source}")]
    Exhausted {
        trial: u64,
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize trial {trial}: {source}")]
    Serialize {
        trial: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Error)]
pub enum DisplayError {
    #[error("present failed: {0}")]
    Present(String),

    #[error("drawing `{name}` failed: {reason}")]
    Draw { name: String, reason: String },
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cogloop_core::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseMode {
    /// Break once `interval` seconds have passed since the last one.
    Time,
    /// Break after every `interval` completed trials.
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseConfig {
    pub mode: PauseMode,
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub enabled: bool,
    pub required: bool,
    pub dummy: bool,
    /// Extension of the auxiliary user file, if the device writes one.
    pub extension: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            dummy: true,
            extension: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub participant: String,
    pub experiment: String,
    pub session: u32,
    pub data_folder: PathBuf,
    /// Per-state deadlines in seconds. `null` means the state has no deadline.
    pub durations: BTreeMap<String, Option<f64>>,
    pub pause: Option<PauseConfig>,
    pub pause_text: String,
    pub max_trials: Option<usize>,
    pub replay_invalid: bool,
    pub devices: BTreeMap<String, DeviceSettings>,
    pub refresh_rate_hz: f64,
    pub write_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            participant: "anonymous".to_string(),
            experiment: "experiment".to_string(),
            session: 1,
            data_folder: PathBuf::from("data"),
            durations: BTreeMap::new(),
            pause: None,
            pause_text: "Take a break. Press the button to continue.".to_string(),
            max_trials: None,
            replay_invalid: false,
            devices: BTreeMap::new(),
            refresh_rate_hz: 60.0,
            write_retries: 3,
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("participant", &self.participant),
            ("experiment", &self.experiment),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if value.contains(['/', '\\']) {
                return Err(invalid(field, "must not contain path separators"));
            }
        }
        for (state, secs) in &self.durations {
            if let Some(secs) = secs {
                if !secs.is_finite() || *secs < 0.0 {
                    return Err(invalid(
                        &format!("durations.{state}"),
                        "must be a non-negative number of seconds or null",
                    ));
                }
            }
        }
        if let Some(pause) = &self.pause {
            if !pause.interval.is_finite() || pause.interval <= 0.0 {
                return Err(invalid("pause.interval", "must be positive"));
            }
            if pause.mode == PauseMode::Count && pause.interval.fract() != 0.0 {
                return Err(invalid("pause.interval", "count mode needs a whole number"));
            }
        }
        if self.max_trials == Some(0) {
            return Err(invalid("max_trials", "must be at least 1"));
        }
        if !self.refresh_rate_hz.is_finite() || self.refresh_rate_hz <= 0.0 {
            return Err(invalid("refresh_rate_hz", "must be positive"));
        }
        if self.write_retries == 0 {
            return Err(invalid("write_retries", "must be at least 1"));
        }
        Ok(())
    }

    pub fn duration(&self, state: &str) -> Option<Duration> {
        self.durations
            .get(state)
            .copied()
            .flatten()
            .map(Duration::from_secs_f64)
    }

    /// `{participant}_{experiment}_{session}`, the stem of every file the session writes.
    pub fn base_file_name(&self) -> String {
        format!("{}_{}_{}", self.participant, self.experiment, self.session)
    }

    pub fn device(&self, name: &str) -> DeviceSettings {
        self.devices.get(name).cloned().unwrap_or_default()
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

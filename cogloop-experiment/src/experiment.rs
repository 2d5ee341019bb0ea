use cogloop_core::{ConfigError, DeviceError, Fast, Graphics, SharedSchema, StimulusSet, TrialView};

use crate::config::SessionConfig;
use crate::device::DeviceRegistry;
use crate::state::StateTable;

/// Everything an experiment declares before the session starts.
pub struct Blueprint {
    pub schema: SharedSchema,
    pub fast: StateTable<Fast>,
    pub graphics: StateTable<Graphics>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self {
            schema: SharedSchema::new(),
            fast: StateTable::new(),
            graphics: StateTable::new(),
        }
    }

    /// Applies configured state durations to every machine that has the state.
    pub fn apply_durations(&mut self, config: &SessionConfig) -> Result<(), ConfigError> {
        for state in config.durations.keys() {
            let deadline = config.duration(state);
            let in_fast = self.fast.set_deadline(state, deadline);
            let in_graphics = self.graphics.set_deadline(state, deadline);
            if !in_fast && !in_graphics {
                return Err(ConfigError::Invalid {
                    field: format!("durations.{state}"),
                    reason: "no machine has this state".into(),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fast.validate()?;
        self.graphics.validate()
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Experiment-specific behaviour plugged into the generic engine.
pub trait Experiment: Send + Sync {
    fn name(&self) -> &str;

    /// Declares triggers, timers, readouts and the states of both machines.
    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError>;

    fn init_devices(
        &self,
        _config: &SessionConfig,
        _devices: &mut DeviceRegistry,
    ) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Fills the stimulus set at the start of each trial.
    fn init_stimuli(&self, _trial: &TrialView, _stimuli: &mut StimulusSet) {}

    /// Whether a trial that ran to `end` counts as completed.
    fn is_valid(&self, trial: &TrialView) -> bool {
        trial.response().is_some()
    }

    fn welcome_text(&self) -> String {
        format!("{}: press the button to start", self.name())
    }
}

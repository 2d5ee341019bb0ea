use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::ConfigError;
use crate::readout::{ReadoutKey, ReadoutSchema, ReadoutSet};
use crate::role::{Fast, LoopRole, LoopToken};
use crate::timers::{TimerKey, TimerSchema, TimerSet};
use crate::trial::TrialView;
use crate::trigger::{QuitFlag, TriggerKey, TriggerSchema, TriggerSet};

/// Names declared once per session and shared by every trial.
#[derive(Debug, Clone, Default)]
pub struct SharedSchema {
    triggers: Arc<TriggerSchema>,
    timers: Arc<TimerSchema>,
    readouts: Arc<ReadoutSchema>,
}

impl SharedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trigger<L: LoopRole>(
        &mut self,
        name: &str,
        initial: bool,
    ) -> Result<TriggerKey<L>, ConfigError> {
        Arc::make_mut(&mut self.triggers).add(name, initial)
    }

    pub fn add_timer<L: LoopRole>(&mut self, name: &str) -> Result<TimerKey<L>, ConfigError> {
        Arc::make_mut(&mut self.timers).add(name)
    }

    pub fn add_readout<L: LoopRole>(
        &mut self,
        name: &str,
        initial: f64,
    ) -> Result<ReadoutKey<L>, ConfigError> {
        Arc::make_mut(&mut self.readouts).add(name, initial)
    }

    pub fn triggers(&self) -> &TriggerSchema {
        &self.triggers
    }

    pub fn timers(&self) -> &TimerSchema {
        &self.timers
    }

    pub fn readouts(&self) -> &ReadoutSchema {
        &self.readouts
    }
}

/// Everything both loops see during one trial.
///
/// Every field is either immutable for the trial or a single-writer atomic
/// whose writer is fixed by the key type used to write it.
#[derive(Debug)]
pub struct TrialShared {
    pub trial: TrialView,
    pub triggers: TriggerSet,
    pub timers: TimerSet,
    pub readouts: ReadoutSet,
    pub origin: Instant,
    aborted: AtomicBool,
}

impl TrialShared {
    pub fn new(schema: &SharedSchema, trial: TrialView, quit: Arc<QuitFlag>) -> Self {
        let origin = Instant::now();
        Self {
            trial,
            triggers: TriggerSet::new(Arc::clone(&schema.triggers), quit),
            timers: TimerSet::new(Arc::clone(&schema.timers), origin),
            readouts: ReadoutSet::new(Arc::clone(&schema.readouts)),
            origin,
            aborted: AtomicBool::new(false),
        }
    }

    pub fn quit(&self) -> &QuitFlag {
        self.triggers.quit()
    }

    /// Cuts this trial short without ending the session. Only the fast loop,
    /// which owns the devices, may abort.
    pub fn abort(&self, _token: &LoopToken<Fast>) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Either the session is quitting or the trial was aborted.
    pub fn should_end(&self) -> bool {
        self.quit().is_requested() || self.is_aborted()
    }

    /// Seconds since the trial's shared state was created.
    pub fn since_origin(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

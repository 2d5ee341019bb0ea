use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cogloop_timing::Stopwatch;

use crate::error::{ConfigError, StateError};
use crate::role::{Fast, LoopKind, LoopRole, LoopToken};

/// Tracks the whole trial. Owned by the fast loop and always present.
pub const RUNTIME_TIMER: &str = "runtime";

pub struct TimerKey<L: LoopRole> {
    index: usize,
    _role: PhantomData<fn() -> L>,
}

impl<L: LoopRole> TimerKey<L> {
    fn new(index: usize) -> Self {
        Self {
            index,
            _role: PhantomData,
        }
    }

    pub fn any(self) -> AnyTimer {
        AnyTimer { index: self.index }
    }
}

impl<L: LoopRole> Clone for TimerKey<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: LoopRole> Copy for TimerKey<L> {}

impl<L: LoopRole> fmt::Debug for TimerKey<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerKey<{}>({})", L::KIND, self.index)
    }
}

impl<L: LoopRole> From<TimerKey<L>> for AnyTimer {
    fn from(key: TimerKey<L>) -> Self {
        key.any()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyTimer {
    index: usize,
}

#[derive(Debug, Clone)]
pub struct TimerSchema {
    names: Vec<(String, LoopKind)>,
    index: HashMap<String, usize>,
}

impl TimerSchema {
    pub fn new() -> Self {
        let mut index = HashMap::new();
        index.insert(RUNTIME_TIMER.to_string(), 0);
        Self {
            names: vec![(RUNTIME_TIMER.to_string(), LoopKind::Fast)],
            index,
        }
    }

    pub fn add<L: LoopRole>(&mut self, name: &str) -> Result<TimerKey<L>, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "timer" });
        }
        if name == RUNTIME_TIMER {
            return Err(ConfigError::ReservedName {
                kind: "timer",
                name: name.to_string(),
            });
        }
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicateName {
                kind: "timer",
                name: name.to_string(),
            });
        }
        let index = self.names.len();
        self.names.push((name.to_string(), L::KIND));
        self.index.insert(name.to_string(), index);
        Ok(TimerKey::new(index))
    }

    pub fn key<L: LoopRole>(&self, name: &str) -> Result<TimerKey<L>, StateError> {
        let index = self.position(name)?;
        let owner = self.names[index].1;
        if owner != L::KIND {
            return Err(StateError::OwnershipMismatch {
                kind: "timer",
                name: name.to_string(),
                owner,
                requested: L::KIND,
            });
        }
        Ok(TimerKey::new(index))
    }

    pub fn lookup(&self, name: &str) -> Result<AnyTimer, StateError> {
        self.position(name).map(|index| AnyTimer { index })
    }

    fn position(&self, name: &str) -> Result<usize, StateError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StateError::UnknownTimer(name.to_string()))
    }

    pub fn runtime() -> TimerKey<Fast> {
        TimerKey::new(0)
    }

    pub fn name(&self, timer: AnyTimer) -> &str {
        &self.names[timer.index].0
    }
}

impl Default for TimerSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-trial stopwatches, all measured from the same trial origin.
#[derive(Debug)]
pub struct TimerSet {
    schema: Arc<TimerSchema>,
    watches: Vec<Stopwatch>,
}

impl TimerSet {
    pub fn new(schema: Arc<TimerSchema>, origin: Instant) -> Self {
        let watches = schema
            .names
            .iter()
            .map(|_| Stopwatch::with_origin(origin))
            .collect();
        Self { schema, watches }
    }

    pub fn start<L: LoopRole>(&self, _token: &LoopToken<L>, key: TimerKey<L>) {
        self.watches[key.index].start();
    }

    pub fn stop<L: LoopRole>(&self, _token: &LoopToken<L>, key: TimerKey<L>) {
        self.watches[key.index].stop();
    }

    pub fn reset<L: LoopRole>(&self, _token: &LoopToken<L>, key: TimerKey<L>) {
        self.watches[key.index].reset();
    }

    /// Stops every running timer owned by `L`. Returns how many were stopped.
    pub fn stop_owned<L: LoopRole>(&self, _token: &LoopToken<L>) -> usize {
        let mut stopped = 0;
        for ((_, owner), watch) in self.schema.names.iter().zip(&self.watches) {
            if *owner == L::KIND && watch.is_running() {
                watch.stop();
                stopped += 1;
            }
        }
        stopped
    }

    pub fn elapsed(&self, timer: impl Into<AnyTimer>) -> Duration {
        self.watches[timer.into().index].elapsed()
    }

    pub fn is_running(&self, timer: impl Into<AnyTimer>) -> bool {
        self.watches[timer.into().index].is_running()
    }

    pub fn elapsed_by_name(&self, name: &str) -> Result<Duration, StateError> {
        self.schema.lookup(name).map(|t| self.elapsed(t))
    }

    pub fn runtime(&self) -> Duration {
        self.elapsed(TimerSchema::runtime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Graphics;
    use std::thread;

    #[test]
    fn runtime_cannot_be_redeclared() {
        let mut schema = TimerSchema::new();
        assert!(matches!(
            schema.add::<Graphics>(RUNTIME_TIMER),
            Err(ConfigError::ReservedName { .. })
        ));
        assert!(schema.lookup(RUNTIME_TIMER).is_ok());
    }

    #[test]
    fn owners_stop_only_their_timers() {
        let mut schema = TimerSchema::new();
        let flash = schema.add::<Graphics>("flash").unwrap();
        let timers = TimerSet::new(Arc::new(schema), Instant::now());
        // SAFETY: this test thread is the only writer.
        let (fast, graphics) =
            unsafe { (LoopToken::<Fast>::mint(), LoopToken::<Graphics>::mint()) };

        timers.start(&fast, TimerSchema::runtime());
        timers.start(&graphics, flash);
        thread::sleep(Duration::from_millis(2));

        assert_eq!(timers.stop_owned(&fast), 1);
        assert!(!timers.is_running(TimerSchema::runtime()));
        assert!(timers.is_running(flash));
        assert!(timers.runtime() >= Duration::from_millis(2));
    }

    #[test]
    fn unknown_timer_name() {
        let timers = TimerSet::new(Arc::new(TimerSchema::new()), Instant::now());
        assert!(matches!(
            timers.elapsed_by_name("missing"),
            Err(StateError::UnknownTimer(_))
        ));
    }
}

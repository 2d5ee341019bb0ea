//! Trial sequencing: the `Method` contract, a full-factorial constant method,
//! and the `Design` wrapper adding trial ids, caps and replays.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use cogloop_core::{ConfigError, ParameterSet};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A finished adaptive trial as seen by the method.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub parameters: ParameterSet,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Trial(ParameterSet),
    Done,
}

/// Produces the next trial's parameters from the adaptive response history.
pub trait Method: Send {
    fn next(&mut self, history: &[HistoryEntry]) -> Next;
}

/// Condition file of the constant method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub factors: BTreeMap<String, Vec<Value>>,
    #[serde(default = "one")]
    pub repetition: usize,
    #[serde(default)]
    pub randomize: bool,
}

fn one() -> usize {
    1
}

impl Conditions {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let conditions: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        conditions.validate()?;
        Ok(conditions)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factors.is_empty() {
            return Err(ConfigError::Invalid {
                field: "factors".into(),
                reason: "at least one factor is needed".into(),
            });
        }
        if let Some((name, _)) = self.factors.iter().find(|(_, levels)| levels.is_empty()) {
            return Err(ConfigError::Invalid {
                field: format!("factors.{name}"),
                reason: "a factor needs at least one level".into(),
            });
        }
        Ok(())
    }
}

/// Every combination of factor levels, `repetition` times, optionally shuffled.
/// Ignores the history.
#[derive(Debug, Clone)]
pub struct Constant {
    queue: VecDeque<ParameterSet>,
}

impl Constant {
    pub fn new(conditions: &Conditions) -> Self {
        Self::with_rng(conditions, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(conditions: &Conditions, rng: &mut R) -> Self {
        let mut combos: Vec<ParameterSet> = vec![ParameterSet::new()];
        // Factors are in name order; the first one varies fastest.
        for (name, levels) in conditions.factors.iter().rev() {
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    levels.iter().map(move |level| {
                        let mut p = base.clone();
                        p.insert(name.clone(), level.clone());
                        p
                    })
                })
                .collect();
        }

        let mut trials: Vec<ParameterSet> = (0..conditions.repetition)
            .flat_map(|_| combos.iter().cloned())
            .collect();
        if conditions.randomize {
            trials.shuffle(rng);
        }
        Self {
            queue: trials.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Method for Constant {
    fn next(&mut self, _history: &[HistoryEntry]) -> Next {
        match self.queue.pop_front() {
            Some(p) => Next::Trial(p),
            None => Next::Done,
        }
    }
}

/// A trial the controller should run next.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec {
    pub id: u64,
    pub parameters: ParameterSet,
    pub replayed: bool,
}

/// Wraps a method with 1-based trial ids, an optional cap and a replay queue
/// that is drained after the method is done.
pub struct Design {
    method: Box<dyn Method>,
    history: Vec<HistoryEntry>,
    replays: VecDeque<ParameterSet>,
    max_trials: Option<usize>,
    issued: u64,
    method_done: bool,
}

impl Design {
    pub fn new(method: Box<dyn Method>) -> Self {
        Self {
            method,
            history: Vec::new(),
            replays: VecDeque::new(),
            max_trials: None,
            issued: 0,
            method_done: false,
        }
    }

    pub fn with_max_trials(mut self, max_trials: Option<usize>) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn next_trial(&mut self) -> Option<TrialSpec> {
        if self
            .max_trials
            .is_some_and(|max| self.issued >= max as u64)
        {
            return None;
        }

        let (parameters, replayed) = match self.regular() {
            Some(p) => (p, false),
            None => (self.replays.pop_front()?, true),
        };
        self.issued += 1;
        Some(TrialSpec {
            id: self.issued,
            parameters,
            replayed,
        })
    }

    fn regular(&mut self) -> Option<ParameterSet> {
        if self.method_done {
            return None;
        }
        match self.method.next(&self.history) {
            Next::Trial(p) => Some(p),
            Next::Done => {
                self.method_done = true;
                None
            }
        }
    }

    /// Feeds a completed adaptive trial back to the method.
    pub fn report(&mut self, parameters: ParameterSet, response: Value) {
        self.history.push(HistoryEntry {
            parameters,
            response,
        });
    }

    /// Schedules an invalidated trial to run again after the regular list.
    pub fn requeue(&mut self, parameters: ParameterSet) {
        self.replays.push_back(parameters);
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}

impl std::fmt::Debug for Design {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Design")
            .field("issued", &self.issued)
            .field("history", &self.history.len())
            .field("replays", &self.replays.len())
            .field("max_trials", &self.max_trials)
            .finish()
    }
}

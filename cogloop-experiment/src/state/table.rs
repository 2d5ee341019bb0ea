use std::collections::HashMap;
use std::time::Duration;

use cogloop_core::{AnyTrigger, ConfigError, StateError};

use super::context::StateContext;
use super::{DEFAULT_STATES, END, IDLE, INIT, ITI, LOADING, Loop, PAUSE};

pub type StateBody<L> =
    Box<dyn FnMut(&mut StateContext<'_, L>) -> Result<(), StateError> + Send>;

/// One state: its body and how it is left.
pub struct StateSpec<L: Loop> {
    pub(crate) next: String,
    pub(crate) body: Option<StateBody<L>>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) move_on: Option<AnyTrigger>,
    pub(crate) hold: bool,
}

impl<L: Loop> StateSpec<L> {
    fn new(next: &str) -> Self {
        Self {
            next: next.to_string(),
            body: None,
            deadline: None,
            move_on: None,
            hold: false,
        }
    }

    /// State entered when this one is left through its gate.
    pub fn then(&mut self, next: &str) -> &mut Self {
        self.next = next.to_string();
        self
    }

    pub fn body<F>(&mut self, body: F) -> &mut Self
    where
        F: FnMut(&mut StateContext<'_, L>) -> Result<(), StateError> + Send + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    pub fn deadline(&mut self, deadline: Option<Duration>) -> &mut Self {
        self.deadline = deadline;
        self
    }

    /// Leave once `trigger` is raised during the visit.
    pub fn move_on(&mut self, trigger: impl Into<AnyTrigger>) -> &mut Self {
        self.move_on = Some(trigger.into());
        self
    }

    /// Do not pass through when there is no gate; stay until the body moves on.
    pub fn hold(&mut self) -> &mut Self {
        self.hold = true;
        self
    }

    pub fn next_state(&self) -> &str {
        &self.next
    }

    pub fn has_gate(&self) -> bool {
        self.move_on.is_some() || self.deadline.is_some()
    }
}

/// States of one machine.
///
/// Always contains the default lifecycle states wired as
/// `loading -> idle -> iti -> init -> <first> ... -> end` and `pause -> iti`.
pub struct StateTable<L: Loop> {
    states: HashMap<String, StateSpec<L>>,
    order: Vec<String>,
    pub(crate) every_iteration: Option<StateBody<L>>,
}

impl<L: Loop> StateTable<L> {
    pub fn new() -> Self {
        let mut table = Self {
            states: HashMap::new(),
            order: Vec::new(),
            every_iteration: None,
        };
        for (name, next) in [
            (LOADING, IDLE),
            (IDLE, ITI),
            (ITI, INIT),
            (INIT, END),
            (PAUSE, ITI),
            (END, END),
        ] {
            table.insert(name, StateSpec::new(next));
        }
        L::install_defaults(&mut table);
        table
    }

    fn insert(&mut self, name: &str, spec: StateSpec<L>) {
        self.order.push(name.to_string());
        self.states.insert(name.to_string(), spec);
    }

    /// Adds an experiment state, leading to `end` until told otherwise.
    pub fn add(&mut self, name: &str) -> Result<&mut StateSpec<L>, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "state" });
        }
        if self.states.contains_key(name) {
            return Err(ConfigError::DuplicateName {
                kind: "state",
                name: name.to_string(),
            });
        }
        self.insert(name, StateSpec::new(END));
        self.spec_mut(name)
    }

    /// Replaces the body of an existing state. The transition graph is untouched.
    pub fn on<F>(&mut self, name: &str, body: F) -> Result<(), ConfigError>
    where
        F: FnMut(&mut StateContext<'_, L>) -> Result<(), StateError> + Send + 'static,
    {
        self.spec_mut(name)?.body(body);
        Ok(())
    }

    /// First experiment state, entered after `init`.
    pub fn begin_with(&mut self, first: &str) -> Result<(), ConfigError> {
        if !self.states.contains_key(first) {
            return Err(missing::<L>(first));
        }
        self.spec_mut(INIT)?.then(first);
        Ok(())
    }

    /// Body run at the start of every iteration, whatever the state.
    pub fn every_iteration<F>(&mut self, body: F)
    where
        F: FnMut(&mut StateContext<'_, L>) -> Result<(), StateError> + Send + 'static,
    {
        self.every_iteration = Some(Box::new(body));
    }

    pub(crate) fn set_deadline(&mut self, name: &str, deadline: Option<Duration>) -> bool {
        match self.states.get_mut(name) {
            Some(spec) => {
                spec.deadline = deadline;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_body<F>(&mut self, name: &str, body: F)
    where
        F: FnMut(&mut StateContext<'_, L>) -> Result<(), StateError> + Send + 'static,
    {
        if let Some(spec) = self.states.get_mut(name) {
            spec.body(body);
        }
    }

    pub(crate) fn set_move_on(&mut self, name: &str, trigger: AnyTrigger) {
        if let Some(spec) = self.states.get_mut(name) {
            spec.move_on = Some(trigger);
        }
    }

    pub(crate) fn set_hold(&mut self, name: &str) {
        if let Some(spec) = self.states.get_mut(name) {
            spec.hold = true;
        }
    }

    fn spec_mut(&mut self, name: &str) -> Result<&mut StateSpec<L>, ConfigError> {
        self.states.get_mut(name).ok_or_else(|| missing::<L>(name))
    }

    pub fn get(&self, name: &str) -> Option<&StateSpec<L>> {
        self.states.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut StateSpec<L>> {
        self.states.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// State names in registration order, defaults first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Every declared successor must exist. Experiment states nothing leads to are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in &self.order {
            let spec = &self.states[name];
            if !self.states.contains_key(&spec.next) {
                return Err(missing::<L>(&spec.next));
            }
        }
        for name in self.names().filter(|n| !DEFAULT_STATES.contains(n)) {
            let reachable = self.states.values().any(|s| s.next == name);
            if !reachable {
                log::warn!("[{}] state `{name}` is never entered through the graph", L::KIND);
            }
        }
        Ok(())
    }
}

fn missing<L: Loop>(name: &str) -> ConfigError {
    ConfigError::MissingState {
        machine: L::KIND,
        state: name.to_string(),
    }
}

impl<L: Loop> Default for StateTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

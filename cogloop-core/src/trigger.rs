//! Named boolean triggers shared by both loops.
//!
//! Every trigger has an owning loop fixed at registration. Writes go through a
//! [`TriggerKey`] typed with that loop and a [`LoopToken`] only that loop's
//! thread holds; everybody else reads through [`AnyTrigger`] or by name.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{ConfigError, StateError};
use crate::role::{Fast, Graphics, LoopKind, LoopRole, LoopToken};

pub const MOVE_ON_REQUESTED: &str = "moveOnRequested";
pub const PAUSE_REQUESTED: &str = "pauseRequested";
pub const START_TRIGGER: &str = "startTrigger";
pub const QUIT_REQUESTED: &str = "quitRequested";

pub const RESERVED_TRIGGERS: [&str; 4] = [
    MOVE_ON_REQUESTED,
    PAUSE_REQUESTED,
    START_TRIGGER,
    QUIT_REQUESTED,
];

/// Write handle for a trigger owned by loop `L`.
pub struct TriggerKey<L: LoopRole> {
    index: usize,
    _role: PhantomData<fn() -> L>,
}

impl<L: LoopRole> TriggerKey<L> {
    fn new(index: usize) -> Self {
        Self {
            index,
            _role: PhantomData,
        }
    }

    pub fn any(self) -> AnyTrigger {
        AnyTrigger { index: self.index }
    }
}

impl<L: LoopRole> Clone for TriggerKey<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: LoopRole> Copy for TriggerKey<L> {}

impl<L: LoopRole> fmt::Debug for TriggerKey<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TriggerKey<{}>({})", L::KIND, self.index)
    }
}

impl<L: LoopRole> From<TriggerKey<L>> for AnyTrigger {
    fn from(key: TriggerKey<L>) -> Self {
        key.any()
    }
}

/// Read-only reference to a trigger of either loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyTrigger {
    index: usize,
}

#[derive(Debug, Clone)]
struct TriggerDecl {
    name: String,
    owner: LoopKind,
    initial: bool,
}

/// Session-wide trigger declarations. Each trial instantiates a fresh [`TriggerSet`].
#[derive(Debug, Clone)]
pub struct TriggerSchema {
    decls: Vec<TriggerDecl>,
    index: HashMap<String, usize>,
}

impl TriggerSchema {
    const MOVE_ON: usize = 0;
    const PAUSE: usize = 1;
    const START: usize = 2;

    pub fn new() -> Self {
        let mut schema = Self {
            decls: Vec::new(),
            index: HashMap::new(),
        };
        schema.declare(MOVE_ON_REQUESTED, LoopKind::Fast, false);
        schema.declare(PAUSE_REQUESTED, LoopKind::Graphics, false);
        schema.declare(START_TRIGGER, LoopKind::Fast, false);
        schema
    }

    fn declare(&mut self, name: &str, owner: LoopKind, initial: bool) -> usize {
        let index = self.decls.len();
        self.decls.push(TriggerDecl {
            name: name.to_string(),
            owner,
            initial,
        });
        self.index.insert(name.to_string(), index);
        index
    }

    /// Registers an experiment trigger written by loop `L`.
    pub fn add<L: LoopRole>(
        &mut self,
        name: &str,
        initial: bool,
    ) -> Result<TriggerKey<L>, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "trigger" });
        }
        if RESERVED_TRIGGERS.contains(&name) {
            return Err(ConfigError::ReservedName {
                kind: "trigger",
                name: name.to_string(),
            });
        }
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicateName {
                kind: "trigger",
                name: name.to_string(),
            });
        }
        Ok(TriggerKey::new(self.declare(name, L::KIND, initial)))
    }

    /// Typed key for a registered trigger, checked against its owner.
    pub fn key<L: LoopRole>(&self, name: &str) -> Result<TriggerKey<L>, StateError> {
        let index = self.position(name)?;
        let owner = self.decls[index].owner;
        if owner != L::KIND {
            return Err(StateError::OwnershipMismatch {
                kind: "trigger",
                name: name.to_string(),
                owner,
                requested: L::KIND,
            });
        }
        Ok(TriggerKey::new(index))
    }

    pub fn lookup(&self, name: &str) -> Result<AnyTrigger, StateError> {
        self.position(name).map(|index| AnyTrigger { index })
    }

    fn position(&self, name: &str) -> Result<usize, StateError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StateError::UnknownTrigger(name.to_string()))
    }

    pub fn move_on() -> TriggerKey<Fast> {
        TriggerKey::new(Self::MOVE_ON)
    }

    pub fn pause() -> TriggerKey<Graphics> {
        TriggerKey::new(Self::PAUSE)
    }

    pub fn start() -> TriggerKey<Fast> {
        TriggerKey::new(Self::START)
    }

    pub fn name(&self, trigger: AnyTrigger) -> &str {
        &self.decls[trigger.index].name
    }

    pub fn owner(&self, trigger: AnyTrigger) -> LoopKind {
        self.decls[trigger.index].owner
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decls.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

impl Default for TriggerSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Who asked the session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitOrigin {
    Loop(LoopKind),
    Controller,
}

/// Set-only stop flag shared by both loops and the controller.
#[derive(Debug, Default)]
pub struct QuitFlag {
    requested: AtomicBool,
    origin: OnceLock<QuitOrigin>,
}

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the request that actually raised the flag.
    pub fn request(&self, origin: QuitOrigin) -> bool {
        let first = self.origin.set(origin).is_ok();
        self.requested.store(true, Ordering::Release);
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn origin(&self) -> Option<QuitOrigin> {
        self.origin.get().copied()
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: AtomicBool,
    raised: AtomicU64,
}

/// Per-trial trigger values.
///
/// Besides its level, every trigger counts its rising edges so a reader that
/// samples less often than the writer toggles can still tell that it fired.
#[derive(Debug)]
pub struct TriggerSet {
    schema: Arc<TriggerSchema>,
    slots: Vec<Slot>,
    quit: Arc<QuitFlag>,
}

impl TriggerSet {
    pub fn new(schema: Arc<TriggerSchema>, quit: Arc<QuitFlag>) -> Self {
        let slots = schema
            .decls
            .iter()
            .map(|d| Slot {
                value: AtomicBool::new(d.initial),
                raised: AtomicU64::new(0),
            })
            .collect();
        Self {
            schema,
            slots,
            quit,
        }
    }

    /// Overrides an initial value before the set is shared with the loops.
    pub fn preset(&mut self, name: &str, value: bool) -> Result<(), StateError> {
        let index = self.schema.position(name)?;
        *self.slots[index].value.get_mut() = value;
        Ok(())
    }

    pub fn schema(&self) -> &TriggerSchema {
        &self.schema
    }

    pub fn value(&self, trigger: impl Into<AnyTrigger>) -> bool {
        self.slots[trigger.into().index].value.load(Ordering::Acquire)
    }

    pub fn raised_count(&self, trigger: impl Into<AnyTrigger>) -> u64 {
        self.slots[trigger.into().index].raised.load(Ordering::Acquire)
    }

    /// Reads a trigger by name. `quitRequested` reads the session quit flag.
    pub fn get(&self, name: &str) -> Result<bool, StateError> {
        if name == QUIT_REQUESTED {
            return Ok(self.quit.is_requested());
        }
        self.schema.lookup(name).map(|t| self.value(t))
    }

    pub fn set<L: LoopRole>(&self, _token: &LoopToken<L>, key: TriggerKey<L>, value: bool) {
        let slot = &self.slots[key.index];
        let previous = slot.value.swap(value, Ordering::AcqRel);
        if value && !previous {
            slot.raised.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn quit(&self) -> &QuitFlag {
        &self.quit
    }

    /// Name/value pairs, for logging.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.schema
            .decls
            .iter()
            .zip(&self.slots)
            .map(|(d, s)| (d.name.clone(), s.value.load(Ordering::Acquire)))
            .collect()
    }
}

/// Single-shot bookkeeping of one machine.
///
/// The generation is bumped on every committed state entry. A labeled block
/// runs when its label has not yet run in the current generation.
#[derive(Debug, Default)]
pub struct SingleShotScope {
    state: String,
    generation: u64,
    fired: HashMap<String, u64>,
}

impl SingleShotScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_singleshot_scope(&mut self, state: &str) {
        self.state.clear();
        self.state.push_str(state);
        self.generation += 1;
    }

    /// Returns `true` exactly once per label per generation.
    pub fn fire(&mut self, label: &str) -> bool {
        match self.fired.get_mut(label) {
            Some(generation) if *generation == self.generation => false,
            Some(generation) => {
                *generation = self.generation;
                true
            }
            None => {
                self.fired.insert(label.to_string(), self.generation);
                true
            }
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

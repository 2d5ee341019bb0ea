//! Continuous samples (positions, axis values) published by one loop and read by both.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ConfigError, StateError};
use crate::role::{LoopKind, LoopRole, LoopToken};

pub struct ReadoutKey<L: LoopRole> {
    index: usize,
    _role: PhantomData<fn() -> L>,
}

impl<L: LoopRole> Clone for ReadoutKey<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: LoopRole> Copy for ReadoutKey<L> {}

impl<L: LoopRole> fmt::Debug for ReadoutKey<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadoutKey<{}>({})", L::KIND, self.index)
    }
}

impl<L: LoopRole> From<ReadoutKey<L>> for AnyReadout {
    fn from(key: ReadoutKey<L>) -> Self {
        AnyReadout { index: key.index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyReadout {
    index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReadoutSchema {
    decls: Vec<(String, LoopKind, f64)>,
    index: HashMap<String, usize>,
}

impl ReadoutSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: LoopRole>(&mut self, name: &str, initial: f64) -> Result<ReadoutKey<L>, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "readout" });
        }
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicateName {
                kind: "readout",
                name: name.to_string(),
            });
        }
        let index = self.decls.len();
        self.decls.push((name.to_string(), L::KIND, initial));
        self.index.insert(name.to_string(), index);
        Ok(ReadoutKey {
            index,
            _role: PhantomData,
        })
    }

    pub fn key<L: LoopRole>(&self, name: &str) -> Result<ReadoutKey<L>, StateError> {
        let index = self.position(name)?;
        let owner = self.decls[index].1;
        if owner != L::KIND {
            return Err(StateError::OwnershipMismatch {
                kind: "readout",
                name: name.to_string(),
                owner,
                requested: L::KIND,
            });
        }
        Ok(ReadoutKey {
            index,
            _role: PhantomData,
        })
    }

    pub fn lookup(&self, name: &str) -> Result<AnyReadout, StateError> {
        self.position(name).map(|index| AnyReadout { index })
    }

    fn position(&self, name: &str) -> Result<usize, StateError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StateError::UnknownReadout(name.to_string()))
    }
}

/// `f64` cells stored as bits so loads and stores stay lock-free.
#[derive(Debug)]
pub struct ReadoutSet {
    schema: Arc<ReadoutSchema>,
    cells: Vec<AtomicU64>,
}

impl ReadoutSet {
    pub fn new(schema: Arc<ReadoutSchema>) -> Self {
        let cells = schema
            .decls
            .iter()
            .map(|(_, _, initial)| AtomicU64::new(initial.to_bits()))
            .collect();
        Self { schema, cells }
    }

    pub fn store<L: LoopRole>(&self, _token: &LoopToken<L>, key: ReadoutKey<L>, value: f64) {
        self.cells[key.index].store(value.to_bits(), Ordering::Release);
    }

    pub fn load(&self, readout: impl Into<AnyReadout>) -> f64 {
        f64::from_bits(self.cells[readout.into().index].load(Ordering::Acquire))
    }

    pub fn load_by_name(&self, name: &str) -> Result<f64, StateError> {
        self.schema.lookup(name).map(|r| self.load(r))
    }
}

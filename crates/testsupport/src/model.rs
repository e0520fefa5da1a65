//! In-memory reference multimap.

use std::collections::{BTreeMap, BTreeSet};

use crate::proptest_generators::Op;

/// What a multimap should answer, kept as a `BTreeMap` of value sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModelMultimap {
    entries: BTreeMap<u32, BTreeSet<i32>>,
}

/// Expected result of one [`Op`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// Whether the insert or erase changed anything.
    Changed(bool),
    Values(Vec<i32>),
}

impl ModelMultimap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u32, value: i32) -> bool {
        self.entries.entry(key).or_default().insert(value)
    }

    pub fn erase(&mut self, key: u32, value: i32) -> bool {
        let Some(values) = self.entries.get_mut(&key) else {
            return false;
        };
        let removed = values.remove(&value);
        if values.is_empty() {
            self.entries.remove(&key);
        }
        removed
    }

    pub fn find(&self, key: u32) -> Vec<i32> {
        self.entries
            .get(&key)
            .map(|values| values.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn apply(&mut self, op: &Op) -> Expected {
        match *op {
            Op::Insert { key, value } => Expected::Changed(self.insert(key, value)),
            Op::Erase { key, value } => Expected::Changed(self.erase(key, value)),
            Op::Find { key } => Expected::Values(self.find(key)),
        }
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn value_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

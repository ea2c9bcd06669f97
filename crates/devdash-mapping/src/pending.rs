//! Pending toggle set
//!
//! A staged pair means "flip membership relative to the committed set". The
//! set only ever holds pairs whose effective state differs from committed, so
//! flipping a pair twice leaves no trace.

use crate::relation::RelationTuple;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToggles<L, R> {
    by_left: BTreeMap<L, BTreeSet<R>>,
}

impl<L, R> Default for PendingToggles<L, R> {
    fn default() -> Self {
        Self {
            by_left: BTreeMap::new(),
        }
    }
}

impl<L: Ord, R: Ord> PendingToggles<L, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the pair. Returns whether it is staged afterwards.
    pub fn toggle(&mut self, left: L, right: R) -> bool {
        match self.by_left.entry(left) {
            Entry::Vacant(slot) => {
                slot.insert(BTreeSet::from([right]));
                true
            }
            Entry::Occupied(mut slot) => {
                let rights = slot.get_mut();
                if rights.remove(&right) {
                    if rights.is_empty() {
                        slot.remove();
                    }
                    false
                } else {
                    rights.insert(right);
                    true
                }
            }
        }
    }

    /// Force the pair's staged state.
    pub fn set(&mut self, left: L, right: R, staged: bool) {
        if self.contains(&left, &right) != staged {
            self.toggle(left, right);
        }
    }

    pub fn contains(&self, left: &L, right: &R) -> bool {
        self.by_left
            .get(left)
            .is_some_and(|rights| rights.contains(right))
    }

    pub fn is_empty(&self) -> bool {
        self.by_left.is_empty()
    }

    /// Number of staged pairs.
    pub fn len(&self) -> usize {
        self.by_left.values().map(BTreeSet::len).sum()
    }

    pub fn for_left<'a>(&'a self, left: &L) -> impl Iterator<Item = &'a R> + 'a {
        self.by_left.get(left).into_iter().flatten()
    }

    pub fn lefts(&self) -> impl Iterator<Item = &L> {
        self.by_left.keys()
    }

    /// Staged pairs ordered by `(left, right)`.
    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> {
        self.by_left
            .iter()
            .flat_map(|(left, rights)| rights.iter().map(move |right| (left, right)))
    }

    pub fn clear(&mut self) {
        self.by_left.clear();
    }
}

impl<L: Ord + Clone, R: Ord + Clone> PendingToggles<L, R> {
    pub fn tuples(&self) -> Vec<RelationTuple<L, R>> {
        self.iter()
            .map(|(left, right)| RelationTuple::new(left.clone(), right.clone()))
            .collect()
    }
}

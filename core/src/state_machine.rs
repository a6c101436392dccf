//! Generic transition-table machinery shared by the Order, Payment, and
//! Fulfillment state machines.
//!
//! Processes contribute [`TransitionMap`]s; the engine folds them in
//! registration order into one [`Transitions`] table. A later map can
//! append to a state's targets or replace them wholesale, which is how
//! host applications splice custom states into the built-in graphs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// How a contributed transition entry combines with earlier entries for
/// the same source state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionMergeMode {
    /// Append targets to whatever earlier processes allowed.
    #[default]
    Merge,
    /// Discard earlier targets for the state and use only these.
    Replace,
}

/// Transition entries contributed by one process, in declaration order.
#[derive(Clone, Debug)]
pub struct TransitionMap<S> {
    entries: Vec<(S, Vec<S>, TransitionMergeMode)>,
}

impl<S> Default for TransitionMap<S> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<S: Clone + Eq + Hash> TransitionMap<S> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows transitions from `from` to each of `to`, merging with
    /// whatever earlier processes declared for `from`.
    #[must_use]
    pub fn allow(self, from: S, to: impl IntoIterator<Item = S>) -> Self {
        self.allow_with(from, to, TransitionMergeMode::Merge)
    }

    /// Like [`allow`](Self::allow) but with an explicit merge mode.
    #[must_use]
    pub fn allow_with(
        mut self,
        from: S,
        to: impl IntoIterator<Item = S>,
        mode: TransitionMergeMode,
    ) -> Self {
        self.entries.push((from, to.into_iter().collect(), mode));
        self
    }

    /// Declared entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(S, Vec<S>, TransitionMergeMode)] {
        &self.entries
    }
}

/// The merged transition table for one state machine.
#[derive(Clone, Debug)]
pub struct Transitions<S> {
    table: HashMap<S, Vec<S>>,
}

impl<S: Clone + Eq + Hash> Transitions<S> {
    /// Folds process maps, in registration order, into one table.
    #[must_use]
    pub fn from_maps<'a, I>(maps: I) -> Self
    where
        S: 'a,
        I: IntoIterator<Item = &'a TransitionMap<S>>,
    {
        let mut table: HashMap<S, Vec<S>> = HashMap::new();
        for map in maps {
            for (from, targets, mode) in map.entries() {
                let row = table.entry(from.clone()).or_default();
                if *mode == TransitionMergeMode::Replace {
                    row.clear();
                }
                for target in targets {
                    if !row.contains(target) {
                        row.push(target.clone());
                    }
                }
            }
        }
        Self { table }
    }

    /// Whether a transition from `from` to `to` is declared.
    #[must_use]
    pub fn can(&self, from: &S, to: &S) -> bool {
        self.table.get(from).is_some_and(|row| row.contains(to))
    }

    /// Declared targets out of `from`, in declaration order.
    #[must_use]
    pub fn targets(&self, from: &S) -> &[S] {
        self.table.get(from).map_or(&[], Vec::as_slice)
    }
}

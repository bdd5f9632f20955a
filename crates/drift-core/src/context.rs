//! Causal context: the set of dots a replica has observed.
//!
//! Stored sparsely as `replica -> set of counters`. The context is used for
//! two things: minting the next local dot (`max_for` + 1) and deduplicating
//! remote deltas (`contains`). It need not be dense; deltas may arrive in
//! any order, so gaps are normal.
//!
//! Invariant kept by every operation here: per-replica sets only ever hold
//! positive counters, and no empty per-replica set is retained. A missing
//! replica entry is therefore exactly equivalent to an empty set, which lets
//! derived equality coincide with the semantic per-replica equality.

use crate::id::{Dot, ReplicaId};
use crate::ordset::OrdSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sparse per-replica event-counter set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    entries: BTreeMap<ReplicaId, OrdSet<u64>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Build from dots; duplicates collapse, counter-0 dots are ignored.
    pub fn from_dots(dots: impl IntoIterator<Item = Dot>) -> Self {
        let mut ctx = Self::new();
        for dot in dots {
            ctx.add(dot);
        }
        ctx
    }

    pub fn contains(&self, dot: Dot) -> bool {
        self.entries
            .get(&dot.replica)
            .is_some_and(|set| set.contains(&dot.counter))
    }

    /// Record an observed dot. Counter 0 names no event and is ignored.
    pub fn add(&mut self, dot: Dot) {
        if dot.counter == 0 {
            return;
        }
        self.entries.entry(dot.replica).or_default().insert(dot.counter);
    }

    /// The largest counter observed for `replica`, or 0 if none.
    ///
    /// The next dot minted by `replica` is `max_for(replica) + 1`.
    pub fn max_for(&self, replica: &ReplicaId) -> u64 {
        self.entries
            .get(replica)
            .and_then(|set| set.max().copied())
            .unwrap_or(0)
    }

    /// Strict subset over the union of replica keys: every per-replica set
    /// of `self` is contained in the corresponding set of `other`, and at
    /// least one containment is strict.
    pub fn lt(&self, other: &Context) -> bool {
        let mut strict = false;
        for (replica, set) in &self.entries {
            match other.entries.get(replica) {
                Some(theirs) => {
                    if !set.is_subset(theirs) {
                        return false;
                    }
                    if set.len() < theirs.len() {
                        strict = true;
                    }
                }
                // Non-empty set on our side, empty on theirs.
                None => return false,
            }
        }
        for (replica, theirs) in &other.entries {
            if !self.entries.contains_key(replica) && !theirs.is_empty() {
                strict = true;
            }
        }
        strict
    }

    /// Per-replica set union. Commutative and idempotent.
    pub fn join(&self, other: &Context) -> Context {
        let mut entries = self.entries.clone();
        for (replica, theirs) in &other.entries {
            entries
                .entry(*replica)
                .and_modify(|ours| *ours = ours.union(theirs))
                .or_insert_with(|| theirs.clone());
        }
        Context { entries }
    }

    /// Dots in `self` that `earlier` has not observed.
    ///
    /// Replicas missing from `earlier` contribute their whole set; replicas
    /// present only in `earlier` contribute nothing. Replicas with an empty
    /// remainder are dropped.
    pub fn since(&self, earlier: &Context) -> Context {
        let mut entries = BTreeMap::new();
        for (replica, set) in &self.entries {
            let remainder = match earlier.entries.get(replica) {
                Some(seen) => set.difference(seen),
                None => set.clone(),
            };
            if !remainder.is_empty() {
                entries.insert(*replica, remainder);
            }
        }
        Context { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|set| set.is_empty())
    }

    /// Iterate `(replica, counters)` pairs in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &OrdSet<u64>)> {
        self.entries.iter()
    }

    /// Enumerate every observed dot.
    pub fn dots(&self) -> impl Iterator<Item = Dot> + '_ {
        self.entries.iter().flat_map(|(replica, set)| {
            set.iter().map(move |counter| Dot::new(*replica, *counter))
        })
    }
}

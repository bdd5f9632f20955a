//! Delta bundles: shipments of `(dot, delta)` items grouped by CRDT.
//!
//! A bundle is what one replica sends another to close a sync gap. Item
//! order within a CRDT is whatever `combine` produced; receivers must apply
//! independently of order, which the CRDT lattice guarantees.

use drift_core::{CrdtDelta, CrdtId, Dot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One shipped item: the event identifier and the delta it produced.
pub type BundleItem = (Dot, CrdtDelta);

/// A map from CRDT id to an ordered sequence of `(dot, delta)` items.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaBundle {
    entries: BTreeMap<CrdtId, Vec<BundleItem>>,
}

impl DeltaBundle {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Replace the item list for one CRDT. Empty lists are dropped.
    pub fn insert(&mut self, crdt: CrdtId, items: Vec<BundleItem>) {
        if !items.is_empty() {
            self.entries.insert(crdt, items);
        }
    }

    /// Append one item to a CRDT's list.
    pub fn push(&mut self, crdt: CrdtId, dot: Dot, delta: CrdtDelta) {
        self.entries.entry(crdt).or_default().push((dot, delta));
    }

    /// Per-CRDT concatenation, `self`'s items first; disjoint CRDT ids are
    /// unioned. Not commutative as a sequence, but commutative as a
    /// multiset under application.
    pub fn combine(&self, other: &DeltaBundle) -> DeltaBundle {
        let mut entries = self.entries.clone();
        for (crdt, items) in &other.entries {
            entries
                .entry(crdt.clone())
                .or_default()
                .extend(items.iter().cloned());
        }
        DeltaBundle { entries }
    }

    pub fn items(&self, crdt: &CrdtId) -> Option<&[BundleItem]> {
        self.entries.get(crdt).map(|v| v.as_slice())
    }

    /// Number of CRDTs with at least one item.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of items across all CRDTs.
    pub fn total_items(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CrdtId, &Vec<BundleItem>)> {
        self.entries.iter()
    }
}

impl FromIterator<(CrdtId, Vec<BundleItem>)> for DeltaBundle {
    fn from_iter<I: IntoIterator<Item = (CrdtId, Vec<BundleItem>)>>(iter: I) -> Self {
        let mut bundle = Self::new();
        for (crdt, items) in iter {
            bundle.insert(crdt, items);
        }
        bundle
    }
}

impl IntoIterator for DeltaBundle {
    type Item = (CrdtId, Vec<BundleItem>);
    type IntoIter = std::collections::btree_map::IntoIter<CrdtId, Vec<BundleItem>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

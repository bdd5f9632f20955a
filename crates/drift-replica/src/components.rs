//! The append-only per-CRDT delta log.
//!
//! Logically a three-level map `crdt -> origin -> (counter -> delta)`.
//! Counters are unique per `(crdt, origin)` but need not arrive in order;
//! callers dedupe through the causal context, the log just refuses exact
//! duplicates. Nothing is ever removed during the core's lifetime;
//! compaction is a host policy that does not exist yet.

use crate::bundle::DeltaBundle;
use crate::digest::Digest;
use crate::error::ReplicaError;
use drift_core::{CrdtDelta, CrdtId, Dot, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type OriginLog = BTreeMap<u64, CrdtDelta>;

/// The per-CRDT component log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    logs: BTreeMap<CrdtId, BTreeMap<ReplicaId, OriginLog>>,
}

impl Components {
    pub fn new() -> Self {
        Self {
            logs: BTreeMap::new(),
        }
    }

    /// Record the delta produced at `(crdt, origin, counter)`.
    ///
    /// Fails with `Duplicate` if that exact slot is already recorded and
    /// with `InvalidDot` on counter 0. Out-of-order counters are accepted.
    /// On failure nothing is recorded.
    pub fn append(
        &mut self,
        crdt: &CrdtId,
        origin: ReplicaId,
        counter: u64,
        delta: CrdtDelta,
    ) -> Result<(), ReplicaError> {
        if counter == 0 {
            return Err(ReplicaError::InvalidDot(Dot::new(origin, counter)));
        }
        let log = self
            .logs
            .entry(crdt.clone())
            .or_default()
            .entry(origin)
            .or_default();
        if log.contains_key(&counter) {
            return Err(ReplicaError::Duplicate {
                crdt: crdt.clone(),
                origin,
                counter,
            });
        }
        log.insert(counter, delta);
        Ok(())
    }

    /// Entries for `(crdt, origin)` with `counter > after`, ascending.
    pub fn since(&self, crdt: &CrdtId, origin: &ReplicaId, after: u64) -> Vec<(u64, CrdtDelta)> {
        self.logs
            .get(crdt)
            .and_then(|per_origin| per_origin.get(origin))
            .map(|log| {
                log.range(after.saturating_add(1)..)
                    .map(|(counter, delta)| (*counter, delta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Everything a peer summarized by `digest` is missing, per CRDT.
    ///
    /// For each CRDT known to the log:
    /// - digest has an entry `(origin, counter)`: entries of that origin
    ///   strictly beyond `counter`;
    /// - digest is non-empty but misses the CRDT: all entries from the
    ///   digest's *first* origin (not from every origin);
    /// - digest is empty: all entries across all origins (full sync).
    ///
    /// CRDTs yielding no items are omitted. Order across origins is
    /// unspecified; receivers must be order-independent.
    pub fn since_digest(&self, digest: &Digest) -> DeltaBundle {
        let mut bundle = DeltaBundle::new();
        for crdt in self.logs.keys() {
            let items = match digest.get(crdt) {
                Some(entry) => self.items_since(crdt, &entry.origin, entry.counter),
                None => match digest.first_origin() {
                    Some(first) => self.items_since(crdt, &first, 0),
                    None => self.all_items(crdt),
                },
            };
            bundle.insert(crdt.clone(), items);
        }
        bundle
    }

    fn items_since(&self, crdt: &CrdtId, origin: &ReplicaId, after: u64) -> Vec<(Dot, CrdtDelta)> {
        self.since(crdt, origin, after)
            .into_iter()
            .map(|(counter, delta)| (Dot::new(*origin, counter), delta))
            .collect()
    }

    fn all_items(&self, crdt: &CrdtId) -> Vec<(Dot, CrdtDelta)> {
        let Some(per_origin) = self.logs.get(crdt) else {
            return Vec::new();
        };
        per_origin
            .iter()
            .flat_map(|(origin, log)| {
                log.iter()
                    .map(|(counter, delta)| (Dot::new(*origin, *counter), delta.clone()))
            })
            .collect()
    }

    /// Origins that have recorded at least one entry for `crdt`.
    pub fn origins(&self, crdt: &CrdtId) -> Vec<ReplicaId> {
        self.logs
            .get(crdt)
            .map(|per_origin| per_origin.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Largest recorded counter for `(crdt, origin)`, 0 if none.
    pub fn max_counter(&self, crdt: &CrdtId, origin: &ReplicaId) -> u64 {
        self.logs
            .get(crdt)
            .and_then(|per_origin| per_origin.get(origin))
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0)
    }

    /// Per-origin maxima for one CRDT.
    pub fn frontier(&self, crdt: &CrdtId) -> BTreeMap<ReplicaId, u64> {
        self.logs
            .get(crdt)
            .map(|per_origin| {
                per_origin
                    .iter()
                    .filter_map(|(origin, log)| {
                        log.keys().next_back().map(|counter| (*origin, *counter))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of recorded entries.
    pub fn len(&self) -> usize {
        self.logs
            .values()
            .flat_map(|per_origin| per_origin.values())
            .map(|log| log.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{CrdtKind, CrdtOp};

    fn rid(b: u8) -> ReplicaId {
        ReplicaId::from_bytes([b; 16])
    }

    fn delta(n: u64) -> CrdtDelta {
        let (_, delta) = CrdtKind::GCounter
            .zero()
            .mutate(&CrdtOp::IncBy(n), Dot::new(rid(0xff), 1))
            .unwrap();
        delta
    }

    fn cid(s: &str) -> CrdtId {
        CrdtId::from(s)
    }

    #[test]
    fn test_append_rejects_duplicates_and_zero() {
        let mut log = Components::new();
        log.append(&cid("a"), rid(1), 1, delta(1)).unwrap();

        let before = log.clone();
        assert!(matches!(
            log.append(&cid("a"), rid(1), 1, delta(2)),
            Err(ReplicaError::Duplicate { counter: 1, .. })
        ));
        assert_eq!(log, before);

        assert!(matches!(
            log.append(&cid("a"), rid(1), 0, delta(2)),
            Err(ReplicaError::InvalidDot(_))
        ));
        assert_eq!(log, before);
    }

    #[test]
    fn test_append_accepts_out_of_order_counters() {
        let mut log = Components::new();
        log.append(&cid("a"), rid(1), 5, delta(5)).unwrap();
        log.append(&cid("a"), rid(1), 2, delta(2)).unwrap();
        assert_eq!(log.max_counter(&cid("a"), &rid(1)), 5);
        assert_eq!(
            log.since(&cid("a"), &rid(1), 0)
                .iter()
                .map(|(c, _)| *c)
                .collect::<Vec<_>>(),
            vec![2, 5]
        );
    }

    #[test]
    fn test_since_is_exclusive_and_sorted() {
        let mut log = Components::new();
        for counter in [1, 2, 3] {
            log.append(&cid("a"), rid(1), counter, delta(counter)).unwrap();
        }
        let entries = log.since(&cid("a"), &rid(1), 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 3);

        assert!(log.since(&cid("a"), &rid(1), 3).is_empty());
        assert!(log.since(&cid("missing"), &rid(1), 0).is_empty());
    }

    #[test]
    fn test_since_digest_with_matching_entry() {
        let mut log = Components::new();
        for counter in [1, 2, 3] {
            log.append(&cid("a"), rid(1), counter, delta(counter)).unwrap();
        }

        let mut digest = Digest::new();
        digest.insert(cid("a"), rid(1), 2);
        let bundle = log.since_digest(&digest);
        let items = bundle.items(&cid("a")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, Dot::new(rid(1), 3));
    }

    // A CRDT missing from a non-empty digest falls back to "everything
    // from the digest's first origin", not "everything".
    #[test]
    fn test_since_digest_fallback_uses_first_origin_only() {
        let mut log = Components::new();
        log.append(&cid("b"), rid(1), 1, delta(1)).unwrap();
        log.append(&cid("b"), rid(2), 1, delta(2)).unwrap();

        let mut digest = Digest::new();
        digest.insert(cid("other"), rid(1), 4);

        let bundle = log.since_digest(&digest);
        let items = bundle.items(&cid("b")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, Dot::new(rid(1), 1));
    }

    #[test]
    fn test_since_digest_empty_digest_is_full_sync() {
        let mut log = Components::new();
        log.append(&cid("a"), rid(1), 1, delta(1)).unwrap();
        log.append(&cid("a"), rid(2), 1, delta(2)).unwrap();
        log.append(&cid("b"), rid(1), 1, delta(3)).unwrap();

        let bundle = log.since_digest(&Digest::new());
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.items(&cid("a")).unwrap().len(), 2);
        assert_eq!(bundle.items(&cid("b")).unwrap().len(), 1);
    }

    #[test]
    fn test_since_digest_omits_caught_up_crdts() {
        let mut log = Components::new();
        log.append(&cid("a"), rid(1), 1, delta(1)).unwrap();

        let mut digest = Digest::new();
        digest.insert(cid("a"), rid(1), 1);
        assert!(log.since_digest(&digest).is_empty());
    }

    #[test]
    fn test_frontier_and_origins() {
        let mut log = Components::new();
        log.append(&cid("a"), rid(1), 3, delta(1)).unwrap();
        log.append(&cid("a"), rid(1), 1, delta(1)).unwrap();
        log.append(&cid("a"), rid(2), 7, delta(1)).unwrap();

        assert_eq!(log.origins(&cid("a")), vec![rid(1), rid(2)]);
        let frontier = log.frontier(&cid("a"));
        assert_eq!(frontier.get(&rid(1)), Some(&3));
        assert_eq!(frontier.get(&rid(2)), Some(&7));
        assert_eq!(log.max_counter(&cid("a"), &rid(9)), 0);
    }
}

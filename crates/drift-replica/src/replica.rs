//! The replica state machine.
//!
//! A replica owns its causal context, its component log, and the states of
//! the CRDT instances it hosts. Local mutations mint fresh dots; remote
//! deltas are deduplicated through the context and merged through the CRDT
//! lattice. Every operation is atomic: on any error the replica is left
//! exactly as it was.

use crate::bundle::DeltaBundle;
use crate::components::Components;
use crate::digest::Digest;
use crate::error::ReplicaError;
use drift_core::{Context, CrdtDelta, CrdtId, CrdtKind, CrdtOp, CrdtState, CrdtValue, Dot, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Client-owned metadata attached to a CRDT binding.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Host policy options. Stored verbatim; nothing in the core reads them
/// yet (log retention and compaction are deferred).
pub type Policy = BTreeMap<String, String>;

/// One hosted CRDT instance: which implementation governs it, its current
/// state, and the client's metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrdtInstance {
    kind: CrdtKind,
    state: CrdtState,
    meta: Meta,
}

impl CrdtInstance {
    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    pub fn state(&self) -> &CrdtState {
        &self.state
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }
}

/// Options for [`Replica::add_crdt`].
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// Replace an existing binding instead of failing `AlreadyExists`.
    pub overwrite: bool,
    /// Start from this state instead of the kind's zero.
    pub initial_state: Option<CrdtState>,
    /// Initial client metadata.
    pub meta: Meta,
}

/// A delta-state CRDT replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    id: ReplicaId,
    crdts: BTreeMap<CrdtId, CrdtInstance>,
    ctx: Context,
    components: Components,
    policy: Policy,
}

impl Replica {
    pub fn new(id: ReplicaId, policy: Policy) -> Self {
        Self {
            id,
            crdts: BTreeMap::new(),
            ctx: Context::new(),
            components: Components::new(),
            policy,
        }
    }

    /// Validating constructor for hosts that carry raw id bytes; anything
    /// but exactly 16 bytes fails with `InvalidId`.
    pub fn from_id_slice(id: &[u8], policy: Policy) -> Result<Self, ReplicaError> {
        Ok(Self::new(ReplicaId::from_slice(id)?, policy))
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Bind a CRDT instance under `id`.
    ///
    /// Fails `AlreadyExists` when bound and `overwrite` is unset, and
    /// `KindMismatch` when an initial state disagrees with the declared
    /// kind. The fresh binding starts from the supplied state or the
    /// kind's zero.
    pub fn add_crdt(
        &mut self,
        id: CrdtId,
        kind: CrdtKind,
        options: AddOptions,
    ) -> Result<(), ReplicaError> {
        if !options.overwrite && self.crdts.contains_key(&id) {
            return Err(ReplicaError::AlreadyExists(id));
        }
        let state = match options.initial_state {
            Some(state) => {
                if state.kind() != kind {
                    return Err(ReplicaError::KindMismatch {
                        id,
                        expected: kind,
                        found: state.kind(),
                    });
                }
                state
            }
            None => kind.zero(),
        };
        debug!(crdt = %id, %kind, "bind crdt");
        self.crdts.insert(
            id,
            CrdtInstance {
                kind,
                state,
                meta: options.meta,
            },
        );
        Ok(())
    }

    /// Idempotent [`Replica::add_crdt`]: succeeds without changes when the
    /// id is already bound.
    pub fn ensure_crdt(
        &mut self,
        id: CrdtId,
        kind: CrdtKind,
        options: AddOptions,
    ) -> Result<(), ReplicaError> {
        if self.crdts.contains_key(&id) {
            return Ok(());
        }
        self.add_crdt(id, kind, options)
    }

    pub fn fetch_crdt(&self, id: &CrdtId) -> Result<&CrdtInstance, ReplicaError> {
        self.crdts
            .get(id)
            .ok_or_else(|| ReplicaError::CrdtNotFound(id.clone()))
    }

    /// Iterate bindings: id, kind, and metadata.
    pub fn list_crdts(&self) -> impl Iterator<Item = (&CrdtId, CrdtKind, &Meta)> {
        self.crdts
            .iter()
            .map(|(id, instance)| (id, instance.kind, &instance.meta))
    }

    /// The externally visible value of one hosted CRDT.
    pub fn value(&self, id: &CrdtId) -> Result<CrdtValue, ReplicaError> {
        Ok(self.fetch_crdt(id)?.state.value())
    }

    /// Replace a binding's metadata. Only JSON objects are accepted.
    pub fn update_crdt_meta(
        &mut self,
        id: &CrdtId,
        meta: serde_json::Value,
    ) -> Result<(), ReplicaError> {
        let object = match meta {
            serde_json::Value::Object(object) => object,
            other => return Err(ReplicaError::InvalidMeta(other)),
        };
        let instance = self
            .crdts
            .get_mut(id)
            .ok_or_else(|| ReplicaError::CrdtNotFound(id.clone()))?;
        instance.meta = object;
        Ok(())
    }

    /// Replace a binding's metadata via a pure function of the current
    /// metadata. The result must be a JSON object.
    pub fn update_crdt_meta_with(
        &mut self,
        id: &CrdtId,
        f: impl FnOnce(&Meta) -> serde_json::Value,
    ) -> Result<(), ReplicaError> {
        let next = f(&self.fetch_crdt(id)?.meta);
        self.update_crdt_meta(id, next)
    }

    /// Apply a local mutation, atomically.
    ///
    /// Mints the next dot for this replica, runs the CRDT's mutator,
    /// appends the delta to the log, and extends the context. If any step
    /// fails the replica is unchanged. Returns the minted dot.
    pub fn apply_op(&mut self, id: &CrdtId, op: &CrdtOp) -> Result<Dot, ReplicaError> {
        let dot = Dot::new(self.id, self.ctx.max_for(&self.id) + 1);
        let instance = self
            .crdts
            .get_mut(id)
            .ok_or_else(|| ReplicaError::CrdtNotFound(id.clone()))?;
        let (new_state, delta) = instance.state.mutate(op, dot)?;

        self.components.append(id, self.id, dot.counter, delta)?;
        // Fallible steps are done; commit.
        instance.state = new_state;
        self.ctx.add(dot);
        debug!(crdt = %id, %dot, "applied local op");
        Ok(dot)
    }

    /// Ingest one remote `(dot, delta)`, idempotently.
    ///
    /// A dot already present in the context is a success that changes
    /// nothing and reports `false`. Otherwise the delta is merged, logged,
    /// and the context extended; `true` is reported. A log duplicate for a
    /// dot the context has not seen is an invariant violation and fails
    /// without touching any state.
    pub fn apply_remote(
        &mut self,
        id: &CrdtId,
        dot: Dot,
        delta: &CrdtDelta,
    ) -> Result<bool, ReplicaError> {
        if self.ctx.contains(dot) {
            trace!(crdt = %id, %dot, "remote delta already seen");
            return Ok(false);
        }
        if dot.counter == 0 {
            return Err(ReplicaError::InvalidDot(dot));
        }
        let instance = self
            .crdts
            .get_mut(id)
            .ok_or_else(|| ReplicaError::CrdtNotFound(id.clone()))?;
        let new_state = instance.state.apply_delta(delta, &self.ctx)?;

        self.components
            .append(id, dot.replica, dot.counter, delta.clone())?;
        // Fallible steps are done; commit.
        instance.state = new_state;
        self.ctx.add(dot);
        debug!(crdt = %id, %dot, "applied remote delta");
        Ok(true)
    }

    /// Summarize local progress for anti-entropy.
    ///
    /// Every bound CRDT is reported with this replica's own id and the
    /// largest counter it has minted. The same local maximum is used for
    /// every CRDT: the digest summarizes what this replica could send from
    /// its own authorship, not per-CRDT activity.
    pub fn digest(&self) -> Digest {
        let max = self.ctx.max_for(&self.id);
        let mut digest = Digest::new();
        for id in self.crdts.keys() {
            digest.insert(id.clone(), self.id, max);
        }
        trace!(counter = max, crdts = self.crdts.len(), "built digest");
        digest
    }

    /// The requester-side digest for a sync round with a peer: for every
    /// CRDT in the peer's digest, how far this replica has observed that
    /// entry's origin. The peer's `delta` answers with exactly the
    /// entries beyond these counters.
    pub fn seen_digest(&self, peer: &Digest) -> Digest {
        let mut digest = Digest::new();
        for (crdt, entry) in peer.iter() {
            digest.insert(crdt.clone(), entry.origin, self.ctx.max_for(&entry.origin));
        }
        digest
    }

    /// The deltas this replica authored that `since` has not seen.
    ///
    /// For each bound CRDT, emits the log entries of this replica's own
    /// origin whose counter strictly exceeds the digest's (missing = 0).
    /// CRDTs yielding nothing are omitted.
    pub fn delta(&self, since: &Digest) -> DeltaBundle {
        let mut bundle = DeltaBundle::new();
        for id in self.crdts.keys() {
            let after = since.counter_of(id);
            let items = self
                .components
                .since(id, &self.id, after)
                .into_iter()
                .map(|(counter, delta)| (Dot::new(self.id, counter), delta))
                .collect();
            bundle.insert(id.clone(), items);
        }
        trace!(items = bundle.total_items(), "built delta bundle");
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rid(b: u8) -> ReplicaId {
        ReplicaId::from_bytes([b; 16])
    }

    fn cid(s: &str) -> CrdtId {
        CrdtId::from(s)
    }

    fn replica(b: u8) -> Replica {
        Replica::new(rid(b), Policy::new())
    }

    fn bound_replica(b: u8, crdt: &str) -> Replica {
        let mut r = replica(b);
        r.add_crdt(cid(crdt), CrdtKind::GCounter, AddOptions::default())
            .unwrap();
        r
    }

    #[test]
    fn test_from_id_slice_validates_length() {
        assert!(Replica::from_id_slice(&[1; 16], Policy::new()).is_ok());
        assert!(matches!(
            Replica::from_id_slice(&[1; 5], Policy::new()),
            Err(ReplicaError::InvalidId(_))
        ));
    }

    #[test]
    fn test_policy_is_stored_verbatim() {
        let mut policy = Policy::new();
        policy.insert("log.retention".into(), "unbounded".into());
        let r = Replica::new(rid(1), policy.clone());
        assert_eq!(r.policy(), &policy);
    }

    #[test]
    fn test_add_crdt_respects_overwrite() {
        let mut r = bound_replica(1, "a");
        assert!(matches!(
            r.add_crdt(cid("a"), CrdtKind::GCounter, AddOptions::default()),
            Err(ReplicaError::AlreadyExists(_))
        ));
        r.add_crdt(
            cid("a"),
            CrdtKind::GCounter,
            AddOptions {
                overwrite: true,
                ..AddOptions::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_ensure_crdt_is_idempotent() {
        let mut r = bound_replica(1, "a");
        r.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();
        let before = r.clone();
        r.ensure_crdt(cid("a"), CrdtKind::GCounter, AddOptions::default())
            .unwrap();
        assert_eq!(r, before);
    }

    #[test]
    fn test_fetch_and_list() {
        let r = bound_replica(1, "a");
        assert_eq!(r.fetch_crdt(&cid("a")).unwrap().kind(), CrdtKind::GCounter);
        assert!(matches!(
            r.fetch_crdt(&cid("nope")),
            Err(ReplicaError::CrdtNotFound(_))
        ));
        assert_eq!(r.list_crdts().count(), 1);
    }

    #[test]
    fn test_update_meta_rejects_non_objects() {
        let mut r = bound_replica(1, "a");
        r.update_crdt_meta(&cid("a"), json!({"owner": "cart-service"}))
            .unwrap();
        assert_eq!(
            r.fetch_crdt(&cid("a")).unwrap().meta()["owner"],
            json!("cart-service")
        );

        assert!(matches!(
            r.update_crdt_meta(&cid("a"), json!([1, 2])),
            Err(ReplicaError::InvalidMeta(_))
        ));

        r.update_crdt_meta_with(&cid("a"), |meta| {
            let mut next = meta.clone();
            next.insert("rev".into(), json!(2));
            serde_json::Value::Object(next)
        })
        .unwrap();
        assert_eq!(r.fetch_crdt(&cid("a")).unwrap().meta()["rev"], json!(2));
    }

    #[test]
    fn test_apply_op_mints_contiguous_dots() {
        let mut r = bound_replica(1, "a");
        for expected in 1..=4 {
            let dot = r.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();
            assert_eq!(dot, Dot::new(rid(1), expected));
        }
        assert_eq!(r.context().max_for(&rid(1)), 4);
    }

    #[test]
    fn test_apply_op_failure_leaves_state_untouched() {
        let mut r = bound_replica(1, "a");
        r.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();

        let before = r.clone();
        assert!(r.apply_op(&cid("a"), &CrdtOp::IncBy(0)).is_err());
        assert_eq!(r, before);
        assert!(r.apply_op(&cid("missing"), &CrdtOp::Inc).is_err());
        assert_eq!(r, before);

        // The next mint is unaffected by the failures.
        assert_eq!(r.apply_op(&cid("a"), &CrdtOp::Inc).unwrap().counter, 2);
    }

    #[test]
    fn test_apply_remote_deduplicates() {
        let mut a = bound_replica(1, "a");
        a.apply_op(&cid("a"), &CrdtOp::IncBy(3)).unwrap();
        let bundle = a.delta(&Digest::new());
        let (dot, delta) = bundle.items(&cid("a")).unwrap()[0].clone();

        let mut b = bound_replica(2, "a");
        assert!(b.apply_remote(&cid("a"), dot, &delta).unwrap());
        let once = b.clone();
        assert!(!b.apply_remote(&cid("a"), dot, &delta).unwrap());
        assert_eq!(b, once);
        assert_eq!(b.value(&cid("a")).unwrap(), CrdtValue::Counter(3));
    }

    #[test]
    fn test_apply_remote_rejects_zero_counter() {
        let mut b = bound_replica(2, "a");
        let delta = {
            let (_, d) = CrdtKind::GCounter
                .zero()
                .mutate(&CrdtOp::Inc, Dot::new(rid(1), 1))
                .unwrap();
            d
        };
        let before = b.clone();
        assert!(matches!(
            b.apply_remote(&cid("a"), Dot::new(rid(1), 0), &delta),
            Err(ReplicaError::InvalidDot(_))
        ));
        assert_eq!(b, before);
    }

    #[test]
    fn test_apply_remote_log_duplicate_is_an_error() {
        let delta = {
            let (_, d) = CrdtKind::GCounter
                .zero()
                .mutate(&CrdtOp::Inc, Dot::new(rid(1), 1))
                .unwrap();
            d
        };

        // Invariant violation: the log already holds the slot but the
        // context never saw the dot. Seed the log out of band.
        let mut seeded = bound_replica(3, "a");
        seeded
            .components
            .append(&cid("a"), rid(1), 1, delta.clone())
            .unwrap();
        let before = seeded.clone();
        assert!(matches!(
            seeded.apply_remote(&cid("a"), Dot::new(rid(1), 1), &delta),
            Err(ReplicaError::Duplicate { .. })
        ));
        assert_eq!(seeded, before);
    }

    // The digest reports the replica's own progress for every bound CRDT,
    // not per-CRDT activity. A CRDT this replica never touched still
    // carries the local maximum.
    #[test]
    fn test_digest_uses_local_progress_for_every_crdt() {
        let mut r = bound_replica(1, "a");
        r.add_crdt(cid("b"), CrdtKind::GCounter, AddOptions::default())
            .unwrap();
        for _ in 0..3 {
            r.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();
        }

        let digest = r.digest();
        assert_eq!(digest.len(), 2);
        assert_eq!(digest.counter_of(&cid("a")), 3);
        assert_eq!(digest.counter_of(&cid("b")), 3);
        assert_eq!(digest.get(&cid("b")).unwrap().origin, rid(1));
    }

    // Replica::delta always filters on the replica's own origin, even when
    // the log holds entries from other origins.
    #[test]
    fn test_delta_ships_own_authorship_only() {
        let mut a = bound_replica(1, "a");
        a.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();

        let foreign = {
            let (_, d) = CrdtKind::GCounter
                .zero()
                .mutate(&CrdtOp::Inc, Dot::new(rid(9), 1))
                .unwrap();
            d
        };
        a.apply_remote(&cid("a"), Dot::new(rid(9), 1), &foreign)
            .unwrap();

        let bundle = a.delta(&Digest::new());
        let items = bundle.items(&cid("a")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0.replica, rid(1));
    }

    #[test]
    fn test_seen_digest_reports_peer_origin_progress() {
        let mut a = bound_replica(1, "a");
        for _ in 0..2 {
            a.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();
        }

        let mut b = bound_replica(2, "a");
        let bundle = a.delta(&Digest::new());
        for (dot, delta) in bundle.items(&cid("a")).unwrap() {
            b.apply_remote(&cid("a"), *dot, delta).unwrap();
        }

        let request = b.seen_digest(&a.digest());
        assert_eq!(request.counter_of(&cid("a")), 2);
        assert_eq!(request.get(&cid("a")).unwrap().origin, rid(1));
        // Fully caught up: the peer has nothing beyond the request.
        assert!(a.delta(&request).is_empty());
    }

    #[test]
    fn test_delta_respects_since_digest() {
        let mut a = bound_replica(1, "a");
        for _ in 0..3 {
            a.apply_op(&cid("a"), &CrdtOp::Inc).unwrap();
        }

        let mut since = Digest::new();
        since.insert(cid("a"), rid(1), 2);
        let bundle = a.delta(&since);
        let items = bundle.items(&cid("a")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0.counter, 3);

        since.insert(cid("a"), rid(1), 3);
        assert!(a.delta(&since).is_empty());
    }
}

//! End-to-end replica scenarios with pinned identifiers and values.
//!
//! Replica ids are 16-byte binaries written as lowercase hex, matching how
//! hosts address replicas in practice.

use drift_core::{CrdtId, CrdtKind, CrdtOp, CrdtValue, Dot, ReplicaId};
use drift_replica::{AddOptions, Digest, Policy, Replica};

fn replica_a_id() -> ReplicaId {
    let mut raw = [0u8; 16];
    raw[15] = 0x0a;
    ReplicaId::from_bytes(raw)
}

fn counter_id() -> CrdtId {
    CrdtId::from([0x11; 16])
}

fn replica_a() -> Replica {
    let mut a = Replica::new(replica_a_id(), Policy::new());
    a.add_crdt(counter_id(), CrdtKind::GCounter, AddOptions::default())
        .unwrap();
    // inc, inc(3), inc
    a.apply_op(&counter_id(), &CrdtOp::Inc).unwrap();
    a.apply_op(&counter_id(), &CrdtOp::IncBy(3)).unwrap();
    a.apply_op(&counter_id(), &CrdtOp::Inc).unwrap();
    a
}

// Local increments and digest: three ops yield value 5, digest counter 3,
// and three log entries at counters 1..=3.
#[test]
fn test_local_increments_and_digest() {
    let a = replica_a();

    assert_eq!(a.value(&counter_id()).unwrap(), CrdtValue::Counter(5));

    let digest = a.digest();
    assert_eq!(digest.len(), 1);
    let entry = digest.get(&counter_id()).unwrap();
    assert_eq!(entry.origin, replica_a_id());
    assert_eq!(entry.counter, 3);

    let entries = a.components().since(&counter_id(), &replica_a_id(), 0);
    assert_eq!(
        entries.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

// Reapplying a known (dot, delta) succeeds and changes nothing.
#[test]
fn test_duplicate_apply_remote() {
    let mut b = Replica::new(ReplicaId::from_bytes([0x0b; 16]), Policy::new());
    b.add_crdt(counter_id(), CrdtKind::GCounter, AddOptions::default())
        .unwrap();

    let dot = Dot::new(replica_a_id(), 1);
    let (_, delta) = CrdtKind::GCounter.zero().mutate(&CrdtOp::Inc, dot).unwrap();

    assert!(b.apply_remote(&counter_id(), dot, &delta).unwrap());
    let after_first = b.clone();

    assert!(!b.apply_remote(&counter_id(), dot, &delta).unwrap());
    assert_eq!(b, after_first);
    assert_eq!(b.value(&counter_id()).unwrap(), CrdtValue::Counter(1));
    assert_eq!(b.components().len(), 1);
}

// Convergence by bundle: B hands A its digest, ingests the three-item
// bundle, and both land on value 5.
#[test]
fn test_convergence_by_bundle() {
    let a = replica_a();
    let mut b = Replica::new(ReplicaId::from_bytes([0x0b; 16]), Policy::new());
    b.add_crdt(counter_id(), CrdtKind::GCounter, AddOptions::default())
        .unwrap();

    let bundle = a.delta(&b.digest());
    assert_eq!(bundle.total_items(), 3);

    for (crdt, items) in bundle {
        for (dot, delta) in items {
            b.apply_remote(&crdt, dot, &delta).unwrap();
        }
    }

    assert_eq!(a.value(&counter_id()).unwrap(), CrdtValue::Counter(5));
    assert_eq!(b.value(&counter_id()).unwrap(), CrdtValue::Counter(5));
}

// Partial catch-up: B takes counters 1-2, then its refreshed digest pulls
// only the counter-3 item.
#[test]
fn test_partial_catch_up() {
    let a = replica_a();
    let mut b = Replica::new(ReplicaId::from_bytes([0x0b; 16]), Policy::new());
    b.add_crdt(counter_id(), CrdtKind::GCounter, AddOptions::default())
        .unwrap();

    let bundle = a.delta(&Digest::new());
    for (dot, delta) in bundle.items(&counter_id()).unwrap() {
        if dot.counter <= 2 {
            b.apply_remote(&counter_id(), *dot, delta).unwrap();
        }
    }

    let digest = b.digest();
    // B has seen nothing of its own authorship; ask with A's progress.
    let mut request = Digest::new();
    request.insert(counter_id(), replica_a_id(), b.context().max_for(&replica_a_id()));
    assert_eq!(request.counter_of(&counter_id()), 2);
    assert_eq!(digest.counter_of(&counter_id()), 0);

    let rest = a.delta(&request);
    let items = rest.items(&counter_id()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0, Dot::new(replica_a_id(), 3));

    for (dot, delta) in items {
        b.apply_remote(&counter_id(), *dot, delta).unwrap();
    }
    assert_eq!(b.value(&counter_id()).unwrap(), CrdtValue::Counter(5));
}

//! Drift replica - the delta-state CRDT replica state machine
//!
//! A [`Replica`] hosts independent CRDT instances, tags every local
//! mutation with a causally-unique [`Dot`](drift_core::Dot), retains an
//! append-only per-CRDT delta log ([`Components`]), and answers the
//! anti-entropy queries ([`Digest`], [`DeltaBundle`]) that `drift-proto`
//! carries over the wire.
//!
//! The whole crate is a single-threaded pure state machine: every
//! operation either succeeds or fails atomically with respect to the
//! replica state, and no call blocks. Hosts own all concurrency and I/O,
//! typically by serializing mutations behind one actor or mutex per
//! replica.

pub mod bundle;
pub mod components;
pub mod digest;
pub mod error;
pub mod replica;

pub use bundle::DeltaBundle;
pub use components::Components;
pub use digest::{Digest, DigestEntry};
pub use error::ReplicaError;
pub use replica::{AddOptions, CrdtInstance, Meta, Policy, Replica};

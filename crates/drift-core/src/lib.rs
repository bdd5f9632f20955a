//! Drift core - building blocks for a delta-state CRDT replica
//!
//! This crate holds the leaf types the replica machinery is built from:
//!
//! - Identifiers: [`ReplicaId`], [`Dot`], [`CrdtId`]
//! - [`Context`]: the sparse per-replica set of observed event counters
//! - The CRDT capability contract ([`DeltaCrdt`]) and its closed-world
//!   dispatch layer ([`CrdtState`], [`CrdtOp`], [`CrdtDelta`])
//! - [`GCounter`]: the reference CRDT implementation
//! - Deterministic big-endian codec primitives shared by every wire format
//!
//! Everything here is plain data: no I/O, no clocks, no background tasks.
//! The replica state machine lives in `drift-replica`; the anti-entropy
//! wire protocol lives in `drift-proto`.

pub mod codec;
pub mod context;
pub mod crdt;
pub mod error;
pub mod gcounter;
pub mod id;
pub mod ordset;

pub use context::Context;
pub use crdt::{CrdtDelta, CrdtKind, CrdtOp, CrdtState, CrdtValue, DeltaCrdt};
pub use error::CrdtError;
pub use gcounter::GCounter;
pub use id::{CrdtId, Dot, IdError, ReplicaId};
pub use ordset::OrdSet;

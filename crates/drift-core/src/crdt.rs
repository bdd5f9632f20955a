//! The CRDT capability contract and its closed-world dispatch layer.
//!
//! Every hosted CRDT implements [`DeltaCrdt`]. The replica itself stays
//! type-agnostic by storing [`CrdtState`] values and routing ops and deltas
//! through the matching variant. Adding a CRDT kind means adding a variant
//! to each enum here and wiring the delegation arms; an implementation that
//! misses a capability simply does not compile.

use crate::codec::{put_u8, CodecError, Reader};
use crate::context::Context;
use crate::error::CrdtError;
use crate::gcounter::GCounter;
use crate::id::Dot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The capability contract every CRDT implementation honors.
///
/// Laws the replica relies on:
/// - `value(zero())` is the identity of the value domain.
/// - `apply_delta(s, d, _)` is monotone in the lattice and commutative,
///   associative, and idempotent over `(state, delta)` for deltas produced
///   by any replica.
/// - `join` is the lattice least upper bound.
/// - `encode`/`decode` round-trip and embed `VERSION` so readers can reject
///   mismatches.
pub trait DeltaCrdt: Sized + Clone + PartialEq {
    type Op;
    type Delta: Clone;
    type Value;

    /// Wire-format tag embedded in encoded state and deltas.
    const VERSION: u16;

    /// Lattice bottom.
    fn zero() -> Self;

    /// Pure projection to the externally visible value.
    fn value(&self) -> Self::Value;

    /// Apply a local op at `dot`, returning the new state and a delta that
    /// reproduces the new information on another replica.
    fn mutate(&self, op: &Self::Op, dot: Dot) -> Result<(Self, Self::Delta), CrdtError>;

    /// Monotone merge of a delta, possibly consulting the causal context.
    fn apply_delta(&self, delta: &Self::Delta, ctx: &Context) -> Result<Self, CrdtError>;

    /// Lattice least upper bound.
    fn join(&self, other: &Self) -> Result<Self, CrdtError>;

    /// The causal context embedded in the state. Empty for purely
    /// state-based CRDTs such as counters.
    fn context(&self) -> Context;

    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    fn encode_delta(delta: &Self::Delta) -> Vec<u8>;
    fn decode_delta(bytes: &[u8]) -> Result<Self::Delta, CodecError>;
}

/// Wire tag for [`CrdtKind::GCounter`] blobs.
const KIND_TAG_GCOUNTER: u8 = 1;

/// The type tag naming which implementation governs a hosted instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CrdtKind {
    GCounter,
}

impl CrdtKind {
    /// One-byte tag used in state and delta blobs.
    pub fn tag(self) -> u8 {
        match self {
            CrdtKind::GCounter => KIND_TAG_GCOUNTER,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            KIND_TAG_GCOUNTER => Ok(CrdtKind::GCounter),
            other => Err(CodecError::InvalidEntry(format!(
                "unknown crdt kind tag: {}",
                other
            ))),
        }
    }

    /// The lattice bottom for this kind.
    pub fn zero(self) -> CrdtState {
        match self {
            CrdtKind::GCounter => CrdtState::GCounter(GCounter::zero()),
        }
    }

    pub fn version(self) -> u16 {
        match self {
            CrdtKind::GCounter => GCounter::VERSION,
        }
    }
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrdtKind::GCounter => write!(f, "g-counter"),
        }
    }
}

/// An operation submitted by a client against a hosted CRDT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtOp {
    /// Increment a counter by 1.
    Inc,
    /// Increment a counter by `n >= 1`.
    IncBy(u64),
}

impl CrdtOp {
    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtOp::Inc | CrdtOp::IncBy(_) => CrdtKind::GCounter,
        }
    }
}

/// The state of one hosted CRDT instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CrdtState {
    GCounter(GCounter),
}

impl CrdtState {
    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtState::GCounter(_) => CrdtKind::GCounter,
        }
    }

    pub fn value(&self) -> CrdtValue {
        match self {
            CrdtState::GCounter(state) => CrdtValue::Counter(state.value()),
        }
    }

    pub fn version(&self) -> u16 {
        self.kind().version()
    }

    pub fn mutate(&self, op: &CrdtOp, dot: Dot) -> Result<(CrdtState, CrdtDelta), CrdtError> {
        match (self, op) {
            (CrdtState::GCounter(state), CrdtOp::Inc | CrdtOp::IncBy(_)) => {
                let (next, delta) = state.mutate(op, dot)?;
                Ok((CrdtState::GCounter(next), CrdtDelta::Counter(delta)))
            }
        }
    }

    pub fn apply_delta(&self, delta: &CrdtDelta, ctx: &Context) -> Result<CrdtState, CrdtError> {
        match (self, delta) {
            (CrdtState::GCounter(state), CrdtDelta::Counter(delta)) => {
                Ok(CrdtState::GCounter(state.apply_delta(delta, ctx)?))
            }
        }
    }

    pub fn join(&self, other: &CrdtState) -> Result<CrdtState, CrdtError> {
        match (self, other) {
            (CrdtState::GCounter(left), CrdtState::GCounter(right)) => {
                Ok(CrdtState::GCounter(left.join(right)?))
            }
        }
    }

    pub fn context(&self) -> Context {
        match self {
            CrdtState::GCounter(state) => state.context(),
        }
    }

    /// Encode as a kind-tagged blob: `u8 kind || versioned state bytes`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u8(&mut out, self.kind().tag());
        match self {
            CrdtState::GCounter(state) => out.extend_from_slice(&state.encode()),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let kind = CrdtKind::from_tag(r.u8()?)?;
        let body = r.rest();
        match kind {
            CrdtKind::GCounter => Ok(CrdtState::GCounter(GCounter::decode(body)?)),
        }
    }
}

/// A delta produced by one mutation, shipped between replicas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CrdtDelta {
    Counter(GCounter),
}

impl CrdtDelta {
    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtDelta::Counter(_) => CrdtKind::GCounter,
        }
    }

    /// Encode as a kind-tagged blob: `u8 kind || versioned delta bytes`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u8(&mut out, self.kind().tag());
        match self {
            CrdtDelta::Counter(delta) => out.extend_from_slice(&GCounter::encode_delta(delta)),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let kind = CrdtKind::from_tag(r.u8()?)?;
        let body = r.rest();
        match kind {
            CrdtKind::GCounter => Ok(CrdtDelta::Counter(GCounter::decode_delta(body)?)),
        }
    }
}

/// The externally visible value of a hosted CRDT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtValue {
    Counter(u64),
}

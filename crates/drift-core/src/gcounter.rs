//! Grow-only counter, the reference implementation of the CRDT contract.
//!
//! State is a map `replica -> slot`, the value is the sum of all slots, and
//! both `join` and `apply_delta` take the pointwise maximum. A mutation at
//! dot `(r, _)` bumps slot `r` and emits the singleton map `{r: slot}` as
//! its delta, so the delta type is the state type.

use crate::codec::{put_u16, put_u32, put_u64, CodecError, Reader};
use crate::context::Context;
use crate::crdt::{CrdtOp, DeltaCrdt};
use crate::error::CrdtError;
use crate::id::{Dot, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A grow-only counter CRDT.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    slots: BTreeMap<ReplicaId, u64>,
}

impl GCounter {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// The slot recorded for one replica, 0 if absent.
    pub fn slot(&self, replica: &ReplicaId) -> u64 {
        self.slots.get(replica).copied().unwrap_or(0)
    }

    /// Pointwise maximum of the two slot maps.
    fn merge_max(&self, other: &Self) -> Self {
        let mut slots = self.slots.clone();
        for (replica, value) in &other.slots {
            slots
                .entry(*replica)
                .and_modify(|slot| *slot = (*slot).max(*value))
                .or_insert(*value);
        }
        Self { slots }
    }
}

impl DeltaCrdt for GCounter {
    type Op = CrdtOp;
    type Delta = GCounter;
    type Value = u64;

    const VERSION: u16 = 1;

    fn zero() -> Self {
        Self::new()
    }

    fn value(&self) -> u64 {
        self.slots.values().sum()
    }

    fn mutate(&self, op: &CrdtOp, dot: Dot) -> Result<(Self, Self), CrdtError> {
        let amount = match op {
            CrdtOp::Inc => 1,
            CrdtOp::IncBy(0) => return Err(CrdtError::ZeroIncrement),
            CrdtOp::IncBy(n) => *n,
        };

        let mut next = self.clone();
        let slot = next.slots.entry(dot.replica).or_insert(0);
        *slot = slot.saturating_add(amount);
        let delta = Self {
            slots: BTreeMap::from([(dot.replica, *slot)]),
        };
        Ok((next, delta))
    }

    fn apply_delta(&self, delta: &Self, _ctx: &Context) -> Result<Self, CrdtError> {
        Ok(self.merge_max(delta))
    }

    fn join(&self, other: &Self) -> Result<Self, CrdtError> {
        Ok(self.merge_max(other))
    }

    fn context(&self) -> Context {
        Context::new()
    }

    /// `u16 version || u32 entry_count || entries`, each entry
    /// `u16 id_len || id_bytes || u64 value`, ascending by replica id.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.slots.len() * (2 + ReplicaId::LEN + 8));
        put_u16(&mut out, Self::VERSION);
        put_u32(&mut out, self.slots.len() as u32);
        for (replica, value) in &self.slots {
            put_u16(&mut out, ReplicaId::LEN as u16);
            out.extend_from_slice(replica.as_bytes());
            put_u64(&mut out, *value);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.u16()?;
        if version != Self::VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let count = r.u32()?;
        let mut slots = BTreeMap::new();
        for _ in 0..count {
            let raw = r.bytes_u16()?;
            if raw.len() != ReplicaId::LEN {
                return Err(CodecError::InvalidEntry(format!(
                    "replica id must be {} bytes (got {})",
                    ReplicaId::LEN,
                    raw.len()
                )));
            }
            let mut id = [0u8; ReplicaId::LEN];
            id.copy_from_slice(raw);
            let value = r.u64()?;
            if slots.insert(ReplicaId::from_bytes(id), value).is_some() {
                return Err(CodecError::DuplicateKey);
            }
        }
        r.finish()?;
        Ok(Self { slots })
    }

    fn encode_delta(delta: &Self) -> Vec<u8> {
        delta.encode()
    }

    fn decode_delta(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode(bytes)
    }
}

//! Per-CRDT progress summaries exchanged during anti-entropy.
//!
//! A digest maps each CRDT id to an `(origin, counter)` pair. The counter
//! is authoritative; the origin is informational (in a replica's own digest
//! it is the replica's id). A missing entry means counter 0. Peers exchange
//! digests to compute the minimum delta needed to close the gap.

use drift_core::codec::{put_bytes_u16, put_u16, put_u32, put_u64, CodecError, Reader};
use drift_core::{CrdtId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Digest wire-format version.
pub const DIGEST_VERSION: u16 = 1;

/// Progress recorded for one CRDT.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub origin: ReplicaId,
    pub counter: u64,
}

impl DigestEntry {
    pub fn new(origin: ReplicaId, counter: u64) -> Self {
        Self { origin, counter }
    }
}

/// A per-CRDT progress summary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    entries: BTreeMap<CrdtId, DigestEntry>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, crdt: CrdtId, origin: ReplicaId, counter: u64) {
        self.entries.insert(crdt, DigestEntry::new(origin, counter));
    }

    pub fn get(&self, crdt: &CrdtId) -> Option<&DigestEntry> {
        self.entries.get(crdt)
    }

    /// The recorded counter for `crdt`; missing entries mean 0.
    pub fn counter_of(&self, crdt: &CrdtId) -> u64 {
        self.entries.get(crdt).map(|e| e.counter).unwrap_or(0)
    }

    /// The origin of the first entry in id order, if any.
    pub fn first_origin(&self) -> Option<ReplicaId> {
        self.entries.values().next().map(|e| e.origin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CrdtId, &DigestEntry)> {
        self.entries.iter()
    }

    /// Per-CRDT maximum by counter; the origin follows the winning counter,
    /// and ties keep `self`.
    pub fn merge(&self, other: &Digest) -> Digest {
        let mut entries = self.entries.clone();
        for (crdt, theirs) in &other.entries {
            entries
                .entry(crdt.clone())
                .and_modify(|ours| {
                    if theirs.counter > ours.counter {
                        *ours = *theirs;
                    }
                })
                .or_insert(*theirs);
        }
        Digest { entries }
    }

    /// Counter equality across the union of keys; origins are ignored and
    /// missing entries count as 0.
    pub fn eq_counters(&self, other: &Digest) -> bool {
        self.entries
            .keys()
            .chain(other.entries.keys())
            .all(|crdt| self.counter_of(crdt) == other.counter_of(crdt))
    }

    /// Strict dominance by counter: every entry of `self` is at least as
    /// far as `other`'s (missing = 0), at least one is strictly further,
    /// and every non-zero key of `other` is present in `self`.
    pub fn dominates(&self, other: &Digest) -> bool {
        if !self.covers_nonzero(other) {
            return false;
        }
        let mut strict = false;
        for (crdt, entry) in &self.entries {
            let theirs = other.counter_of(crdt);
            if entry.counter < theirs {
                return false;
            }
            if entry.counter > theirs {
                strict = true;
            }
        }
        strict
    }

    /// Entries of `self` that are strictly ahead of `earlier`.
    pub fn since(&self, earlier: &Digest) -> Digest {
        let entries = self
            .entries
            .iter()
            .filter(|(crdt, entry)| entry.counter > earlier.counter_of(crdt))
            .map(|(crdt, entry)| (crdt.clone(), *entry))
            .collect();
        Digest { entries }
    }

    /// Whether every key with a non-zero counter in `other` is present in
    /// `self`.
    pub fn covers_nonzero(&self, other: &Digest) -> bool {
        other
            .entries
            .iter()
            .filter(|(_, entry)| entry.counter > 0)
            .all(|(crdt, _)| self.entries.contains_key(crdt))
    }

    /// Version-1 binary encoding: `u16 version || u32 entry_count ||
    /// entries`, each `u16 id_len || id || u16 origin_len || origin ||
    /// u64 counter`, ascending by `(crdt_id, origin)`.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        put_u16(&mut out, DIGEST_VERSION);
        put_u32(&mut out, self.entries.len() as u32);
        for (crdt, entry) in &self.entries {
            put_bytes_u16(&mut out, crdt.as_bytes())?;
            put_bytes_u16(&mut out, entry.origin.as_bytes())?;
            put_u64(&mut out, entry.counter);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.u16()?;
        if version != DIGEST_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let count = r.u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let crdt = CrdtId::from(r.bytes_u16()?);
            let raw_origin = r.bytes_u16()?;
            let origin = ReplicaId::from_slice(raw_origin).map_err(|_| {
                CodecError::InvalidEntry(format!(
                    "digest origin must be {} bytes (got {})",
                    ReplicaId::LEN,
                    raw_origin.len()
                ))
            })?;
            let counter = r.u64()?;
            if entries
                .insert(crdt, DigestEntry::new(origin, counter))
                .is_some()
            {
                return Err(CodecError::DuplicateKey);
            }
        }
        r.finish()?;
        Ok(Self { entries })
    }
}

impl FromIterator<(CrdtId, DigestEntry)> for Digest {
    fn from_iter<I: IntoIterator<Item = (CrdtId, DigestEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Digest {
    type Item = (CrdtId, DigestEntry);
    type IntoIter = std::collections::btree_map::IntoIter<CrdtId, DigestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

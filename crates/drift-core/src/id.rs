//! Identifier atoms: replica ids, event dots, CRDT instance ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from identifier construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("replica id must be {expected} bytes (got {got})")]
    WrongLength { expected: usize, got: usize },

    #[error("invalid hex id {raw:?}: {reason}")]
    InvalidHex { raw: String, reason: String },
}

/// A replica identifier: 16 opaque bytes.
///
/// Equality and ordering are byte-wise. Rendered as lowercase hex, also in
/// serialized form so ids can key JSON maps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId([u8; 16]);

impl ReplicaId {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Validating constructor; fails unless the slice is exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let raw: [u8; 16] = bytes.try_into().map_err(|_| IdError::WrongLength {
            expected: Self::LEN,
            got: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    /// Parse a 32-character lowercase-hex rendering.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = decode_hex(s)?;
        Self::from_slice(&bytes)
    }

    /// Mint a fresh id. ULIDs are exactly 16 bytes and unique enough for
    /// replica identity.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaId({})", self)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for ReplicaId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReplicaId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ReplicaId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An event identifier: one event minted by one replica.
///
/// Two equal dots name the same event regardless of how they travelled.
/// Valid event counters start at 1; counter 0 means "no event" and is
/// rejected at the replica boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub replica: ReplicaId,
    pub counter: u64,
}

impl Dot {
    pub fn new(replica: ReplicaId, counter: u64) -> Self {
        Self { replica, counter }
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.replica, self.counter)
    }
}

/// A CRDT instance identifier: an opaque byte string.
///
/// Hosts commonly use UTF-8 names or 16-byte binaries; the core does not
/// care. Wire codecs bound the length at `u16::MAX` bytes. Serialized as
/// lowercase hex so ids can key JSON maps.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrdtId(Vec<u8>);

impl CrdtId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_hex(s)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CrdtId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for CrdtId {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<[u8; 16]> for CrdtId {
    fn from(b: [u8; 16]) -> Self {
        Self(b.to_vec())
    }
}

impl fmt::Debug for CrdtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrdtId({})", self)
    }
}

impl fmt::Display for CrdtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for CrdtId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CrdtId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CrdtId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, IdError> {
    if s.len() % 2 != 0 {
        return Err(IdError::InvalidHex {
            raw: s.to_string(),
            reason: "odd number of hex digits".into(),
        });
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for chunk in s.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).map_err(|_| IdError::InvalidHex {
            raw: s.to_string(),
            reason: "contains invalid UTF-8".into(),
        })?;
        let byte = u8::from_str_radix(pair, 16).map_err(|_| IdError::InvalidHex {
            raw: s.to_string(),
            reason: format!("contains invalid hex: {}", pair),
        })?;
        out.push(byte);
    }
    Ok(out)
}

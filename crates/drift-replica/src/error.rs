//! Error taxonomy for the replica state machine.

use drift_core::codec::CodecError;
use drift_core::{CrdtError, CrdtId, Dot, IdError, ReplicaId};
use thiserror::Error;

/// Errors returned by replica operations.
///
/// Every variant is returned as a value; a failing operation leaves the
/// replica state exactly as it found it.
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error(transparent)]
    InvalidId(#[from] IdError),

    /// A dot whose counter is 0; valid event counters start at 1.
    #[error("invalid dot {0}: event counters start at 1")]
    InvalidDot(Dot),

    /// Client metadata must be a JSON object.
    #[error("metadata must be a JSON object (got {0})")]
    InvalidMeta(serde_json::Value),

    #[error("crdt {0} is already bound")]
    AlreadyExists(CrdtId),

    #[error("crdt not found: {0}")]
    CrdtNotFound(CrdtId),

    /// The supplied initial state does not match the declared kind.
    #[error("crdt {id} bound as {expected}, got initial state of kind {found}")]
    KindMismatch {
        id: CrdtId,
        expected: drift_core::CrdtKind,
        found: drift_core::CrdtKind,
    },

    /// The same `(crdt, origin, counter)` appended to the log twice.
    #[error("duplicate log entry for ({crdt}, {origin}, {counter})")]
    Duplicate {
        crdt: CrdtId,
        origin: ReplicaId,
        counter: u64,
    },

    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

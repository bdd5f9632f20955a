//! Domain errors produced by CRDT implementations.

use thiserror::Error;

/// A failure from `mutate`, `apply_delta`, or `join` on a hosted CRDT.
///
/// These propagate verbatim through the replica state machine; the
/// operation that triggered one leaves all replica state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    /// Counter increments must move the value forward.
    #[error("increment amount must be at least 1")]
    ZeroIncrement,
}

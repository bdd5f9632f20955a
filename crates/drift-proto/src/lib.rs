//! Drift proto - the anti-entropy wire protocol
//!
//! Frames are a fixed 12-byte header followed by a length-prefixed binary
//! payload; all integers big-endian. Four message types drive one sync
//! round:
//!
//! 1. `DigestRequest` - empty probe
//! 2. `DigestResponse` - the peer's per-CRDT progress summary
//! 3. `SyncRequest` - "send me what I'm missing", optionally carrying the
//!    requester's own digest
//! 4. `SyncResponse` - a delta bundle, optionally with the responder's
//!    digest
//!
//! Encoders are deterministic; decoders are strict. Unknown message types,
//! unsupported versions, non-zero flag bits, truncated frames, trailing
//! bytes, and duplicated map keys are all hard failures, surfaced before
//! the replica state machine sees anything.
//!
//! The [`endpoint`] module holds the pure request/response logic a host
//! wires behind its transport.

pub mod endpoint;
pub mod header;
pub mod message;

pub use header::{Header, MessageType, HEADER_LEN, PROTOCOL_VERSION};
pub use message::{Message, SyncType};

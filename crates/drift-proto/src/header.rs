//! The fixed 12-byte frame header.
//!
//! Layout: `u16 protocol_version || u16 message_type || u32 flags ||
//! u32 payload_length`. The version must be non-zero, the flags must be
//! all-zero (the field is reserved for extension without a version bump),
//! and the payload length must match what follows the header exactly.

use drift_core::codec::{put_u16, put_u32, CodecError, Reader};

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 12;

/// The four anti-entropy message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    DigestRequest,
    DigestResponse,
    SyncRequest,
    SyncResponse,
}

impl MessageType {
    pub fn id(self) -> u16 {
        match self {
            MessageType::DigestRequest => 1,
            MessageType::DigestResponse => 2,
            MessageType::SyncRequest => 3,
            MessageType::SyncResponse => 4,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, CodecError> {
        match id {
            1 => Ok(MessageType::DigestRequest),
            2 => Ok(MessageType::DigestResponse),
            3 => Ok(MessageType::SyncRequest),
            4 => Ok(MessageType::SyncResponse),
            other => Err(CodecError::InvalidMessageType(other)),
        }
    }
}

/// A decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub message_type: MessageType,
    pub flags: u32,
    pub payload_len: u32,
}

impl Header {
    /// A version-1, zero-flags header for `message_type`.
    pub fn new(message_type: MessageType, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type,
            flags: 0,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = Vec::with_capacity(HEADER_LEN);
        put_u16(&mut out, self.version);
        put_u16(&mut out, self.message_type.id());
        put_u32(&mut out, self.flags);
        put_u32(&mut out, self.payload_len);
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&out);
        raw
    }

    /// Decode exactly [`HEADER_LEN`] bytes.
    ///
    /// Rejects version 0, non-zero flag bits, and unknown message types.
    /// Version compatibility beyond "non-zero" is the envelope's concern.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.u16()?;
        if version == 0 {
            return Err(CodecError::InvalidVersion(0));
        }
        let message_type = MessageType::from_id(r.u16()?)?;
        let flags = r.u32()?;
        if flags != 0 {
            return Err(CodecError::InvalidFlags(flags));
        }
        let payload_len = r.u32()?;
        r.finish()?;
        Ok(Self {
            version,
            message_type,
            flags,
            payload_len,
        })
    }
}

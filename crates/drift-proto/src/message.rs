//! Message envelopes and payload codecs.
//!
//! An envelope is the concatenation of an encoded header and an encoded
//! payload; the encoder stamps the payload length into the header, the
//! decoder insists the declared length matches the bytes that follow.

use crate::header::{Header, MessageType, HEADER_LEN, PROTOCOL_VERSION};
use drift_core::codec::{put_bytes_u16, put_bytes_u32, put_u32, put_u64, put_u8, CodecError, Reader};
use drift_core::{CrdtDelta, CrdtId, Dot, ReplicaId};
use drift_replica::{DeltaBundle, Digest};

/// How much a sync requester wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncType {
    /// Everything the responder's log holds.
    Full,
    /// Only entries beyond the supplied digest.
    Delta,
}

impl SyncType {
    fn id(self) -> u8 {
        match self {
            SyncType::Full => 0,
            SyncType::Delta => 1,
        }
    }

    fn from_id(id: u8) -> Result<Self, CodecError> {
        match id {
            0 => Ok(SyncType::Full),
            1 => Ok(SyncType::Delta),
            other => Err(CodecError::InvalidEntry(format!(
                "unknown sync type: {}",
                other
            ))),
        }
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    DigestRequest,
    DigestResponse(Digest),
    SyncRequest {
        sync_type: SyncType,
        digest: Option<Digest>,
    },
    SyncResponse {
        digest: Option<Digest>,
        bundle: DeltaBundle,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::DigestRequest => MessageType::DigestRequest,
            Message::DigestResponse(_) => MessageType::DigestResponse,
            Message::SyncRequest { .. } => MessageType::SyncRequest,
            Message::SyncResponse { .. } => MessageType::SyncResponse,
        }
    }

    /// Encode the full envelope: header (with stamped payload length)
    /// followed by the payload.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CodecError::InvalidLength(payload.len() as u64))?;
        let header = Header::new(self.message_type(), len);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a full envelope.
    ///
    /// The header's declared payload length must equal the remaining
    /// bytes; short input is `Truncated`, excess is `TrailingBytes`.
    pub fn decode(bytes: &[u8]) -> Result<(Header, Message), CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                missing: HEADER_LEN - bytes.len(),
            });
        }
        let header = Header::decode(&bytes[..HEADER_LEN])?;
        if header.version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(header.version));
        }

        let payload = &bytes[HEADER_LEN..];
        let declared = header.payload_len as usize;
        if payload.len() < declared {
            return Err(CodecError::Truncated {
                missing: declared - payload.len(),
            });
        }
        if payload.len() > declared {
            return Err(CodecError::TrailingBytes(payload.len() - declared));
        }

        let message = Self::decode_payload(header.message_type, payload)?;
        Ok((header, message))
    }

    fn encode_payload(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        match self {
            Message::DigestRequest => {}
            Message::DigestResponse(digest) => {
                out = digest.encode()?;
            }
            Message::SyncRequest { sync_type, digest } => {
                put_u8(&mut out, sync_type.id());
                match digest {
                    Some(digest) => {
                        put_u8(&mut out, 1);
                        put_bytes_u32(&mut out, &digest.encode()?)?;
                    }
                    None => {
                        put_u8(&mut out, 0);
                        put_u32(&mut out, 0);
                    }
                }
            }
            Message::SyncResponse { digest, bundle } => {
                match digest {
                    Some(digest) => {
                        put_u8(&mut out, 1);
                        put_bytes_u32(&mut out, &digest.encode()?)?;
                    }
                    None => {
                        put_u8(&mut out, 0);
                        put_u32(&mut out, 0);
                    }
                }
                encode_bundle(&mut out, bundle)?;
            }
        }
        Ok(out)
    }

    fn decode_payload(message_type: MessageType, payload: &[u8]) -> Result<Message, CodecError> {
        let message = match message_type {
            MessageType::DigestRequest => {
                if !payload.is_empty() {
                    return Err(CodecError::TrailingBytes(payload.len()));
                }
                Message::DigestRequest
            }
            MessageType::DigestResponse => Message::DigestResponse(Digest::decode(payload)?),
            MessageType::SyncRequest => {
                let mut r = Reader::new(payload);
                let sync_type = SyncType::from_id(r.u8()?)?;
                let digest = decode_optional_digest(&mut r)?;
                r.finish()?;
                Message::SyncRequest { sync_type, digest }
            }
            MessageType::SyncResponse => {
                let mut r = Reader::new(payload);
                let digest = decode_optional_digest(&mut r)?;
                let bundle = decode_bundle(&mut r)?;
                r.finish()?;
                Message::SyncResponse { digest, bundle }
            }
        };
        Ok(message)
    }
}

/// `u8 flag || u32 digest_len || [digest if flag = 1]`. A cleared flag
/// demands a zero length.
fn decode_optional_digest(r: &mut Reader<'_>) -> Result<Option<Digest>, CodecError> {
    let flag = r.u8()?;
    match flag {
        0 => {
            let len = r.u32()?;
            if len != 0 {
                return Err(CodecError::InvalidPayload(format!(
                    "digest flag cleared but digest_len = {}",
                    len
                )));
            }
            Ok(None)
        }
        1 => {
            let bytes = r.bytes_u32()?;
            Ok(Some(Digest::decode(bytes)?))
        }
        other => Err(CodecError::InvalidPayload(format!(
            "digest flag must be 0 or 1 (got {})",
            other
        ))),
    }
}

/// `u32 crdt_count || entries`, entry `u16 id_len || id || u32 item_count
/// || items`, item `origin[16] || u64 counter || u32 delta_len || delta`.
/// Entries ascend by crdt id, items by `(origin, counter)`.
fn encode_bundle(out: &mut Vec<u8>, bundle: &DeltaBundle) -> Result<(), CodecError> {
    put_u32(out, bundle.len() as u32);
    for (crdt, items) in bundle.iter() {
        put_bytes_u16(out, crdt.as_bytes())?;
        put_u32(out, items.len() as u32);

        let mut sorted: Vec<_> = items.iter().collect();
        sorted.sort_by_key(|(dot, _)| (dot.replica, dot.counter));
        for (dot, delta) in sorted {
            out.extend_from_slice(dot.replica.as_bytes());
            put_u64(out, dot.counter);
            put_bytes_u32(out, &delta.encode())?;
        }
    }
    Ok(())
}

fn decode_bundle(r: &mut Reader<'_>) -> Result<DeltaBundle, CodecError> {
    let crdt_count = r.u32()?;
    let mut bundle = DeltaBundle::new();
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..crdt_count {
        let crdt = CrdtId::from(r.bytes_u16()?);
        if !seen.insert(crdt.clone()) {
            return Err(CodecError::DuplicateKey);
        }
        let item_count = r.u32()?;
        let mut items = Vec::new();
        for _ in 0..item_count {
            let origin = ReplicaId::from_bytes(r.array::<16>()?);
            let counter = r.u64()?;
            let delta = CrdtDelta::decode(r.bytes_u32()?)?;
            items.push((Dot::new(origin, counter), delta));
        }
        bundle.insert(crdt, items);
    }
    Ok(bundle)
}

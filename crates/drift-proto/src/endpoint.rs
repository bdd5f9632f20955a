//! The pure request/response side of an anti-entropy exchange.
//!
//! A host owns the socket; these functions own the decisions. One round
//! between peers A and B:
//!
//! ```text
//! A -> B  DigestRequest
//! B -> A  DigestResponse(B's digest)
//! A -> B  SyncRequest { Delta, A's digest }
//! B -> A  SyncResponse { B's digest, deltas A is missing }
//! ```
//!
//! Every function takes the replica by reference and returns plain
//! [`Message`] values; nothing here blocks or talks to a network.

use crate::message::{Message, SyncType};
use drift_replica::{Digest, Replica, ReplicaError};
use tracing::debug;

/// The opening probe of a sync round.
pub fn digest_request() -> Message {
    Message::DigestRequest
}

/// A delta sync request against a peer whose digest is known: the carried
/// digest says how far this replica has seen each reported origin, so the
/// peer's reply is exactly the missing tail.
pub fn sync_request(replica: &Replica, peer_digest: &Digest) -> Message {
    Message::SyncRequest {
        sync_type: SyncType::Delta,
        digest: Some(replica.seen_digest(peer_digest)),
    }
}

/// A full sync request: the responder ships its whole log.
pub fn full_sync_request() -> Message {
    Message::SyncRequest {
        sync_type: SyncType::Full,
        digest: None,
    }
}

/// React to one incoming message, possibly mutating the replica and
/// possibly producing a reply for the host to send back.
///
/// - `DigestRequest` answers with this replica's digest.
/// - `DigestResponse` answers with a delta `SyncRequest` when the peer
///   reports progress this replica has not observed, and nothing when it
///   is already covered.
/// - `SyncRequest` answers with a `SyncResponse`: the whole component log
///   for [`SyncType::Full`], this replica's own authorship beyond the
///   requester's counters for [`SyncType::Delta`].
/// - `SyncResponse` ingests every item through the deduplicating remote
///   path and produces no reply.
///
/// Bundle items are applied independently; an error aborts the remaining
/// items but previously applied ones stay, which the lattice makes safe.
pub fn handle(replica: &mut Replica, message: &Message) -> Result<Option<Message>, ReplicaError> {
    match message {
        Message::DigestRequest => Ok(Some(Message::DigestResponse(replica.digest()))),

        Message::DigestResponse(theirs) => {
            if replica.seen_digest(theirs).eq_counters(theirs) {
                debug!("peer digest already covered, nothing to pull");
                Ok(None)
            } else {
                Ok(Some(sync_request(replica, theirs)))
            }
        }

        Message::SyncRequest { sync_type, digest } => {
            let bundle = match sync_type {
                // Everything in the log, all origins; receivers dedupe.
                SyncType::Full => replica.components().since_digest(&Digest::new()),
                // Our own authorship beyond the requester's counters.
                SyncType::Delta => replica.delta(&digest.clone().unwrap_or_default()),
            };
            debug!(items = bundle.total_items(), "answering sync request");
            Ok(Some(Message::SyncResponse {
                digest: Some(replica.digest()),
                bundle,
            }))
        }

        Message::SyncResponse { bundle, .. } => {
            let mut applied = 0usize;
            for (crdt, items) in bundle.iter() {
                for (dot, delta) in items {
                    if replica.apply_remote(crdt, *dot, delta)? {
                        applied += 1;
                    }
                }
            }
            debug!(applied, total = bundle.total_items(), "ingested sync response");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{CrdtId, CrdtKind, CrdtOp, CrdtValue, ReplicaId};
    use drift_replica::{AddOptions, Policy};

    fn rid(b: u8) -> ReplicaId {
        ReplicaId::from_bytes([b; 16])
    }

    fn bound_replica(b: u8) -> Replica {
        let mut r = Replica::new(rid(b), Policy::new());
        r.add_crdt(CrdtId::from("hits"), CrdtKind::GCounter, AddOptions::default())
            .unwrap();
        r
    }

    #[test]
    fn test_digest_request_yields_digest_response() {
        let mut r = bound_replica(1);
        let reply = handle(&mut r, &digest_request()).unwrap().unwrap();
        assert_eq!(reply, Message::DigestResponse(r.digest()));
    }

    #[test]
    fn test_matching_digests_end_the_round() {
        let mut r = bound_replica(1);
        let theirs = r.digest();
        assert!(handle(&mut r, &Message::DigestResponse(theirs))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_diverged_digest_triggers_sync_request() {
        let mut a = bound_replica(1);
        let mut b = bound_replica(2);
        b.apply_op(&CrdtId::from("hits"), &CrdtOp::Inc).unwrap();

        let reply = handle(&mut a, &Message::DigestResponse(b.digest()))
            .unwrap()
            .unwrap();
        assert!(matches!(
            reply,
            Message::SyncRequest {
                sync_type: SyncType::Delta,
                digest: Some(_)
            }
        ));
    }

    #[test]
    fn test_full_round_converges_two_replicas() {
        let mut a = bound_replica(1);
        let mut b = bound_replica(2);
        let hits = CrdtId::from("hits");
        b.apply_op(&hits, &CrdtOp::IncBy(4)).unwrap();
        b.apply_op(&hits, &CrdtOp::Inc).unwrap();

        // Run the whole round over encoded frames, as a host would.
        let mut wire = digest_request().encode().unwrap();
        let mut from_b = true;
        loop {
            let (_, message) = Message::decode(&wire).unwrap();
            let target = if from_b { &mut b } else { &mut a };
            match handle(target, &message).unwrap() {
                Some(reply) => {
                    wire = reply.encode().unwrap();
                    from_b = !from_b;
                }
                None => break,
            }
        }

        assert_eq!(a.value(&hits).unwrap(), CrdtValue::Counter(5));
        assert_eq!(a.value(&hits).unwrap(), b.value(&hits).unwrap());
    }
}

/// Message routing engine for the ToM core.
///
/// Pure decision logic — receives a parsed envelope, returns a
/// `RoutingAction` telling the runtime what to do (deliver, forward,
/// drop, reject). No I/O, no transport dependency.
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::CoreError;
use crate::relay::RelaySelector;
use crate::subnet::EphemeralSubnets;
use crate::topology::Topology;
use crate::types::{MessageType, NodeId, MESSAGE_TTL_MS};

/// Maximum relay chain depth.
pub const MAX_RELAY_DEPTH: usize = 4;

/// Bound for the dedup and anti-replay caches (DoS protection).
const MAX_CACHE_SIZE: usize = 10_000;

/// Maximum age for read receipt timestamps (7 days in ms).
const READ_RECEIPT_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

// ── Routing decisions ──────────────────────────────────────────────────

/// What to do with an incoming envelope.
#[derive(Debug)]
pub enum RoutingAction {
    /// Message for us — deliver to the application.
    /// `ack` is an unsigned delivery ACK routed back over the reversed
    /// relay chain; the caller signs it before sending.
    Deliver { envelope: Envelope, ack: Envelope },
    /// ACK for one of our outbound messages — update the tracker.
    Ack {
        message_id: String,
        kind: AckKind,
        from: NodeId,
    },
    /// Read receipt for one of our outbound messages.
    ReadReceipt {
        message_id: String,
        read_at: u64,
        from: NodeId,
    },
    /// Not for us — relay to `next_hop` (TTL already decremented).
    Forward { envelope: Envelope, next_hop: NodeId },
    /// Protocol violation by the sender — drop silently, count it.
    Reject { reason: RejectReason },
    /// Routine drop — duplicate, expired, unroutable.
    Drop { reason: DropReason },
}

/// Protocol violations (§ sender misbehaved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSignature,
    Malformed,
    DecryptionFailed,
}

/// Routine drops — nothing wrong with the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    TtlExpired,
    SelfLoop,
    Unroutable,
}

// ── ACK payloads ───────────────────────────────────────────────────────

/// ACK subtypes for the message status pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckKind {
    /// A relay confirms it forwarded the message.
    Relayed,
    /// The final recipient confirms delivery.
    Delivered,
}

/// Serialized payload of an ACK envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_id: String,
    pub kind: AckKind,
}

impl AckPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("AckPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Serialized payload of a read-receipt envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    pub message_id: String,
    pub read_at: u64,
}

impl ReadReceiptPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("ReadReceiptPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

// ── Router ─────────────────────────────────────────────────────────────

/// Pure routing engine — no I/O, no transport.
///
/// Call `route()` with an incoming envelope; act on the returned action.
pub struct Router {
    local_id: NodeId,
    /// Seen envelope ids → first-seen unix ms. Covers both delivered and
    /// forwarded envelopes, so a relay never forwards the same id twice.
    seen: LruCache<String, u64>,
    /// ACK/read-receipt anti-replay: "msg_id:from:kind" → first seen.
    ack_seen: LruCache<String, u64>,
    /// Eviction age for both caches (matches the 24 h message TTL).
    dedup_ttl_ms: u64,
}

impl Router {
    pub fn new(local_id: NodeId) -> Self {
        Self::with_dedup_ttl(local_id, MESSAGE_TTL_MS)
    }

    pub fn with_dedup_ttl(local_id: NodeId, dedup_ttl_ms: u64) -> Self {
        let cap = NonZeroUsize::new(MAX_CACHE_SIZE).expect("cache size is non-zero");
        Self {
            local_id,
            seen: LruCache::new(cap),
            ack_seen: LruCache::new(cap),
            dedup_ttl_ms,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Route an incoming envelope. Returns the action to take.
    ///
    /// Returned ACK envelopes are **unsigned** — the caller signs them.
    pub fn route(
        &mut self,
        envelope: Envelope,
        selector: &mut RelaySelector,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
    ) -> RoutingAction {
        // 1. Authenticity first — nothing unverified goes further.
        if envelope.verify_signature().is_err() {
            return RoutingAction::Reject {
                reason: RejectReason::InvalidSignature,
            };
        }

        if envelope.via.len() > MAX_RELAY_DEPTH {
            return RoutingAction::Reject {
                reason: RejectReason::Malformed,
            };
        }

        // 2. Dedup before any further work.
        if self.seen.contains(&envelope.id) {
            return RoutingAction::Drop {
                reason: DropReason::Duplicate,
            };
        }

        // 3. Hop count.
        if envelope.ttl == 0 {
            return RoutingAction::Drop {
                reason: DropReason::TtlExpired,
            };
        }

        // 4. For us?
        if envelope.to == self.local_id {
            return self.handle_local(envelope, now);
        }

        // 5. Relay path.
        self.handle_forward(envelope, selector, topology, subnets, now)
    }

    /// Evict cache entries older than the dedup TTL.
    pub fn cleanup_caches(&mut self, now: u64) {
        let ttl = self.dedup_ttl_ms;
        let expired: Vec<String> = self
            .seen
            .iter()
            .filter(|(_, &first_seen)| now.saturating_sub(first_seen) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.seen.pop(&key);
        }

        let expired: Vec<String> = self
            .ack_seen
            .iter()
            .filter(|(_, &first_seen)| now.saturating_sub(first_seen) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.ack_seen.pop(&key);
        }
    }

    /// Current sizes of (seen, ack_seen) caches.
    pub fn cache_sizes(&self) -> (usize, usize) {
        (self.seen.len(), self.ack_seen.len())
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn handle_local(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        match envelope.msg_type {
            MessageType::Ack => self.handle_ack(envelope, now),
            MessageType::ReadReceipt => self.handle_read_receipt(envelope, now),
            _ => {
                self.seen.put(envelope.id.clone(), now);
                let ack = self.create_delivery_ack(&envelope);
                RoutingAction::Deliver { envelope, ack }
            }
        }
    }

    fn handle_ack(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        let ack = match AckPayload::from_bytes(&envelope.payload) {
            Ok(a) => a,
            Err(_) => {
                return RoutingAction::Reject {
                    reason: RejectReason::Malformed,
                }
            }
        };

        let cache_key = format!("{}:{}:{:?}", ack.message_id, envelope.from, ack.kind);
        if self.ack_seen.contains(&cache_key) {
            return RoutingAction::Drop {
                reason: DropReason::Duplicate,
            };
        }
        self.ack_seen.put(cache_key, now);

        RoutingAction::Ack {
            message_id: ack.message_id,
            kind: ack.kind,
            from: envelope.from,
        }
    }

    fn handle_read_receipt(&mut self, envelope: Envelope, now: u64) -> RoutingAction {
        let rr = match ReadReceiptPayload::from_bytes(&envelope.payload) {
            Ok(r) => r,
            Err(_) => {
                return RoutingAction::Reject {
                    reason: RejectReason::Malformed,
                }
            }
        };

        let cache_key = format!("{}:{}:read", rr.message_id, envelope.from);
        if self.ack_seen.contains(&cache_key) {
            return RoutingAction::Drop {
                reason: DropReason::Duplicate,
            };
        }
        self.ack_seen.put(cache_key, now);

        // Clamp read_at: not in the future, not older than 7 days.
        let read_at = rr
            .read_at
            .min(now)
            .max(now.saturating_sub(READ_RECEIPT_MAX_AGE_MS));

        RoutingAction::ReadReceipt {
            message_id: rr.message_id,
            read_at,
            from: envelope.from,
        }
    }

    fn handle_forward(
        &mut self,
        mut envelope: Envelope,
        selector: &mut RelaySelector,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
    ) -> RoutingAction {
        // A message we originated must never come back to us as a relay.
        if envelope.from == self.local_id {
            return RoutingAction::Drop {
                reason: DropReason::SelfLoop,
            };
        }

        let next_hop = if let Some(pos) = envelope.via.iter().position(|id| *id == self.local_id) {
            // Appearing more than once in the chain means the chain loops.
            if envelope.via.iter().filter(|id| **id == self.local_id).count() > 1 {
                return RoutingAction::Drop {
                    reason: DropReason::SelfLoop,
                };
            }
            if pos + 1 < envelope.via.len() {
                envelope.via[pos + 1]
            } else {
                envelope.to
            }
        } else if topology.is_online(&envelope.to) || topology.get(&envelope.to).is_none() {
            // Direct neighbor (or a peer we simply haven't mapped yet —
            // let the transport try).
            envelope.to
        } else {
            // Recipient known-offline and no explicit chain left: find a relay.
            match selector
                .select_best(envelope.to, topology, subnets, now)
                .relay_id
            {
                Some(relay) if relay != self.local_id => relay,
                _ => {
                    return RoutingAction::Drop {
                        reason: DropReason::Unroutable,
                    }
                }
            }
        };

        if envelope.decrement_ttl().is_err() {
            return RoutingAction::Drop {
                reason: DropReason::TtlExpired,
            };
        }

        // Remember the id so a replay of this envelope is not re-forwarded.
        self.seen.put(envelope.id.clone(), now);

        RoutingAction::Forward { envelope, next_hop }
    }

    /// Create a delivery ACK routed back through the reversed relay chain.
    fn create_delivery_ack(&self, original: &Envelope) -> Envelope {
        let payload = AckPayload {
            message_id: original.id.clone(),
            kind: AckKind::Delivered,
        }
        .to_bytes();

        let via: Vec<NodeId> = original.via.iter().rev().copied().collect();
        Envelope::new_via(self.local_id, original.from, via, MessageType::Ack, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeBuilder;
    use crate::topology::PeerInfo;
    use crate::types::DEFAULT_TTL;

    fn keypair(seed: u8) -> ([u8; 32], NodeId) {
        let seed_bytes = [seed; 32];
        let signing = ed25519_dalek::SigningKey::from_bytes(&seed_bytes);
        (seed_bytes, NodeId::from_bytes(signing.verifying_key().to_bytes()))
    }

    fn node_id(seed: u8) -> NodeId {
        keypair(seed).1
    }

    struct Ctx {
        selector: RelaySelector,
        topology: Topology,
        subnets: EphemeralSubnets,
    }

    impl Ctx {
        fn new(me: NodeId) -> Self {
            Self {
                selector: RelaySelector::new(me),
                topology: Topology::new(),
                subnets: EphemeralSubnets::new(me),
            }
        }
    }

    fn route(router: &mut Router, ctx: &mut Ctx, env: Envelope) -> RoutingAction {
        router.route(env, &mut ctx.selector, &ctx.topology, &ctx.subnets, 1_000_000)
    }

    /// Signed chat envelope from → to.
    fn chat(from_seed: u8, to: NodeId, payload: &[u8]) -> Envelope {
        let (sk, from) = keypair(from_seed);
        EnvelopeBuilder::new(from, to, MessageType::Chat, payload.to_vec()).sign(&sk)
    }

    fn chat_via(from_seed: u8, to: NodeId, via: Vec<NodeId>, ttl: u32) -> Envelope {
        let (sk, from) = keypair(from_seed);
        EnvelopeBuilder::new(from, to, MessageType::Chat, b"relayed".to_vec())
            .via(via)
            .ttl(ttl)
            .sign(&sk)
    }

    fn ack_envelope(from_seed: u8, to: NodeId, original_id: &str, kind: AckKind) -> Envelope {
        let (sk, from) = keypair(from_seed);
        let payload = AckPayload {
            message_id: original_id.to_string(),
            kind,
        }
        .to_bytes();
        EnvelopeBuilder::new(from, to, MessageType::Ack, payload).sign(&sk)
    }

    // ── Deliver ────────────────────────────────────────────────────────

    #[test]
    fn deliver_message_for_us() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat(2, me, b"hello");
        let sender = env.from;
        let msg_id = env.id.clone();

        match route(&mut router, &mut ctx, env) {
            RoutingAction::Deliver { envelope, ack } => {
                assert_eq!(envelope.payload, b"hello");
                assert_eq!(ack.to, sender);
                assert_eq!(ack.from, me);
                assert_eq!(ack.msg_type, MessageType::Ack);

                let payload = AckPayload::from_bytes(&ack.payload).unwrap();
                assert_eq!(payload.message_id, msg_id);
                assert_eq!(payload.kind, AckKind::Delivered);
            }
            other => panic!("expected Deliver, got {:?}", other),
        }
    }

    #[test]
    fn delivery_ack_reverses_via_chain() {
        let me = node_id(1);
        let relay1 = node_id(10);
        let relay2 = node_id(11);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat_via(2, me, vec![relay1, relay2], DEFAULT_TTL);

        match route(&mut router, &mut ctx, env) {
            RoutingAction::Deliver { ack, .. } => {
                assert_eq!(ack.via, vec![relay2, relay1]);
            }
            other => panic!("expected Deliver, got {:?}", other),
        }
    }

    #[test]
    fn dedup_drops_duplicate() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat(2, me, b"once");
        let env2 = env.clone();

        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Deliver { .. }
        ));
        assert!(matches!(
            route(&mut router, &mut ctx, env2),
            RoutingAction::Drop {
                reason: DropReason::Duplicate
            }
        ));
    }

    #[test]
    fn unsigned_rejected() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = Envelope::new(node_id(2), me, MessageType::Chat, b"nope".to_vec());
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Reject {
                reason: RejectReason::InvalidSignature
            }
        ));
    }

    #[test]
    fn tampered_payload_rejected() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let mut env = chat(2, me, b"original");
        env.payload = b"tampered".to_vec();
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Reject {
                reason: RejectReason::InvalidSignature
            }
        ));
    }

    #[test]
    fn ttl_zero_dropped() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat_via(2, me, vec![], 0);
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Drop {
                reason: DropReason::TtlExpired
            }
        ));
    }

    // ── Forward ────────────────────────────────────────────────────────

    #[test]
    fn forward_in_chain_last_relay() {
        let me = node_id(10);
        let recipient = node_id(2);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat_via(1, recipient, vec![me], 3);
        let sig = env.signature.clone();

        match route(&mut router, &mut ctx, env) {
            RoutingAction::Forward { envelope, next_hop } => {
                assert_eq!(next_hop, recipient);
                assert_eq!(envelope.ttl, 2);
                // TTL is outside the signature — no re-sign needed
                assert_eq!(envelope.signature, sig);
            }
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn forward_multi_hop_chain() {
        let relay1 = node_id(10);
        let relay2 = node_id(11);
        let recipient = node_id(2);
        let mut router = Router::new(relay1);
        let mut ctx = Ctx::new(relay1);

        let env = chat_via(1, recipient, vec![relay1, relay2], 3);

        match route(&mut router, &mut ctx, env) {
            RoutingAction::Forward { next_hop, .. } => assert_eq!(next_hop, relay2),
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn direct_forward_when_target_reachable() {
        let me = node_id(10);
        let recipient = node_id(2);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);
        ctx.topology.upsert(PeerInfo::bare(recipient, 1000));

        let env = chat(1, recipient, b"passing through");
        match route(&mut router, &mut ctx, env) {
            RoutingAction::Forward { next_hop, .. } => assert_eq!(next_hop, recipient),
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn unroutable_when_target_offline_and_no_relay() {
        let me = node_id(10);
        let recipient = node_id(2);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let mut info = PeerInfo::bare(recipient, 1000);
        info.status = crate::topology::PeerStatus::Offline;
        ctx.topology.upsert(info);

        let env = chat(1, recipient, b"stranded");
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Drop {
                reason: DropReason::Unroutable
            }
        ));
    }

    #[test]
    fn self_loop_dropped() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        // We are the original sender but the message came back to us
        let (sk, from) = keypair(1);
        let env = EnvelopeBuilder::new(from, node_id(2), MessageType::Chat, b"loop".to_vec())
            .sign(&sk);

        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Drop {
                reason: DropReason::SelfLoop
            }
        ));
    }

    #[test]
    fn duplicate_via_entry_dropped_as_self_loop() {
        let me = node_id(10);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat_via(1, node_id(2), vec![me, node_id(11), me], 4);
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Drop {
                reason: DropReason::SelfLoop
            }
        ));
    }

    #[test]
    fn forwarded_id_not_forwarded_twice() {
        let me = node_id(10);
        let recipient = node_id(2);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = chat_via(1, recipient, vec![me], 3);
        let replay = env.clone();

        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Forward { .. }
        ));
        assert!(matches!(
            route(&mut router, &mut ctx, replay),
            RoutingAction::Drop {
                reason: DropReason::Duplicate
            }
        ));
    }

    #[test]
    fn reject_deep_relay_chain() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let via: Vec<NodeId> = (10..16).map(node_id).collect(); // 6 > MAX_RELAY_DEPTH
        let env = chat_via(2, me, via, 4);

        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Reject {
                reason: RejectReason::Malformed
            }
        ));
    }

    #[test]
    fn exact_max_relay_depth_allowed() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let via: Vec<NodeId> = (10..14).map(node_id).collect(); // exactly 4
        let env = chat_via(2, me, via, 4);
        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Deliver { .. }
        ));
    }

    // ── ACKs ───────────────────────────────────────────────────────────

    #[test]
    fn ack_received() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env = ack_envelope(10, me, "msg-123", AckKind::Relayed);
        let relay = env.from;

        match route(&mut router, &mut ctx, env) {
            RoutingAction::Ack {
                message_id,
                kind,
                from,
            } => {
                assert_eq!(message_id, "msg-123");
                assert_eq!(kind, AckKind::Relayed);
                assert_eq!(from, relay);
            }
            other => panic!("expected Ack, got {:?}", other),
        }
    }

    #[test]
    fn ack_anti_replay() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env1 = ack_envelope(10, me, "msg-123", AckKind::Relayed);
        let env2 = ack_envelope(10, me, "msg-123", AckKind::Relayed);

        assert!(matches!(
            route(&mut router, &mut ctx, env1),
            RoutingAction::Ack { .. }
        ));
        assert!(matches!(
            route(&mut router, &mut ctx, env2),
            RoutingAction::Drop {
                reason: DropReason::Duplicate
            }
        ));
    }

    #[test]
    fn different_ack_kinds_not_deduped() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let env1 = ack_envelope(2, me, "msg-123", AckKind::Relayed);
        let env2 = ack_envelope(2, me, "msg-123", AckKind::Delivered);

        assert!(matches!(
            route(&mut router, &mut ctx, env1),
            RoutingAction::Ack { .. }
        ));
        assert!(matches!(
            route(&mut router, &mut ctx, env2),
            RoutingAction::Ack { .. }
        ));
    }

    #[test]
    fn malformed_ack_rejected() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let (sk, from) = keypair(2);
        let env = EnvelopeBuilder::new(from, me, MessageType::Ack, b"not an ack".to_vec())
            .sign(&sk);

        assert!(matches!(
            route(&mut router, &mut ctx, env),
            RoutingAction::Reject {
                reason: RejectReason::Malformed
            }
        ));
    }

    // ── Read receipts ──────────────────────────────────────────────────

    #[test]
    fn read_receipt_received() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let payload = ReadReceiptPayload {
            message_id: "msg-456".into(),
            read_at: 999_000,
        }
        .to_bytes();
        let (sk, from) = keypair(2);
        let env = EnvelopeBuilder::new(from, me, MessageType::ReadReceipt, payload).sign(&sk);

        match route(&mut router, &mut ctx, env) {
            RoutingAction::ReadReceipt {
                message_id, from, ..
            } => {
                assert_eq!(message_id, "msg-456");
                assert_eq!(from, node_id(2));
            }
            other => panic!("expected ReadReceipt, got {:?}", other),
        }
    }

    #[test]
    fn read_receipt_anti_replay() {
        let me = node_id(1);
        let mut router = Router::new(me);
        let mut ctx = Ctx::new(me);

        let payload = ReadReceiptPayload {
            message_id: "msg-789".into(),
            read_at: 999_000,
        }
        .to_bytes();
        let (sk, from) = keypair(2);
        let env1 =
            EnvelopeBuilder::new(from, me, MessageType::ReadReceipt, payload.clone()).sign(&sk);
        let env2 = EnvelopeBuilder::new(from, me, MessageType::ReadReceipt, payload).sign(&sk);

        assert!(matches!(
            route(&mut router, &mut ctx, env1),
            RoutingAction::ReadReceipt { .. }
        ));
        assert!(matches!(
            route(&mut router, &mut ctx, env2),
            RoutingAction::Drop {
                reason: DropReason::Duplicate
            }
        ));
    }

    // ── Caches ─────────────────────────────────────────────────────────

    #[test]
    fn cleanup_evicts_old_entries() {
        let me = node_id(1);
        let mut router = Router::with_dedup_ttl(me, 1000);
        let mut ctx = Ctx::new(me);

        let env = chat(2, me, b"cached");
        route(&mut router, &mut ctx, env);
        assert_eq!(router.cache_sizes().0, 1);

        router.cleanup_caches(1_000_500); // entry seen at 1_000_000
        assert_eq!(router.cache_sizes().0, 1, "fresh entry survives");

        router.cleanup_caches(1_002_000);
        assert_eq!(router.cache_sizes().0, 0, "expired entry evicted");
    }

    #[test]
    fn ack_payload_roundtrip() {
        let ack = AckPayload {
            message_id: "test-123".into(),
            kind: AckKind::Delivered,
        };
        let decoded = AckPayload::from_bytes(&ack.to_bytes()).unwrap();
        assert_eq!(decoded.message_id, "test-123");
        assert_eq!(decoded.kind, AckKind::Delivered);
    }
}

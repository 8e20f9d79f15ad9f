/// Gossip-layer payloads — peer announcements and role changes.
///
/// Gossip is separate from the routed message layer: announces arrive on a
/// broadcast channel fed by the signaling/transport layer, not as routed
/// envelopes. This module defines what a node says about itself and how
/// receivers validate it.
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::topology::PeerRole;
use crate::types::NodeId;

/// Maximum allowed clock drift into the future for announce timestamps (5 min).
pub const MAX_FUTURE_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Announces older than this are ignored (1 hour).
pub const MAX_ANNOUNCE_AGE_MS: u64 = 60 * 60 * 1000;

/// What a node broadcasts about itself on the gossip channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    /// The announcing node's identity.
    pub node_id: NodeId,
    /// Human-readable display name.
    pub username: String,
    /// Roles this node serves.
    pub roles: Vec<PeerRole>,
    /// Ed25519 public key for E2E encryption (the node id bytes).
    pub encryption_key: [u8; 32],
    /// Announcement timestamp (Unix ms).
    pub timestamp: u64,
}

impl PeerAnnounce {
    pub fn new(node_id: NodeId, username: String, roles: Vec<PeerRole>, now: u64) -> Self {
        Self {
            node_id,
            username,
            roles,
            encryption_key: node_id.as_bytes(),
            timestamp: now,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    /// Whether this announcement is within acceptable clock drift.
    pub fn is_timestamp_valid(&self, now: u64) -> bool {
        if self.timestamp > now + MAX_FUTURE_DRIFT_MS {
            return false;
        }
        if now > self.timestamp && now - self.timestamp > MAX_ANNOUNCE_AGE_MS {
            return false;
        }
        true
    }
}

/// Inputs arriving on the gossip channel, fed by the signaling layer.
#[derive(Debug, Clone)]
pub enum GossipInput {
    /// Raw bytes of a `PeerAnnounce` broadcast.
    Announce(Vec<u8>),
    /// A gossip neighbor connected (bootstrap introduction).
    NeighborUp(NodeId),
    /// A gossip neighbor disconnected.
    NeighborDown(NodeId),
}

/// Signed payload for `MessageType::RoleAssignment` — broadcast when a
/// node's role set changes so the rest of the network updates its topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleChangeAnnounce {
    pub node_id: NodeId,
    pub roles: Vec<PeerRole>,
    pub score: f64,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl RoleChangeAnnounce {
    /// Create and sign a role change announcement.
    pub fn new(
        node_id: NodeId,
        roles: Vec<PeerRole>,
        score: f64,
        timestamp: u64,
        secret_seed: &[u8; 32],
    ) -> Self {
        let mut announce = Self {
            node_id,
            roles,
            score,
            timestamp,
            signature: Vec::new(),
        };
        let signing_key = SigningKey::from_bytes(secret_seed);
        announce.signature = signing_key.sign(&announce.signing_bytes()).to_bytes().to_vec();
        announce
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    /// Verify the signature against `node_id` (only the node itself can
    /// announce its role change).
    pub fn verify_signature(&self) -> bool {
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&self.node_id.as_bytes())
        else {
            return false;
        };
        if self.signature.len() != 64 {
            return false;
        }
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&self.signature);
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify_strict(&self.signing_bytes(), &signature)
            .is_ok()
    }

    /// Bytes to sign (everything except the signature).
    fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + self.roles.len() + 16);
        bytes.extend_from_slice(&self.node_id.as_bytes());
        for role in &self.roles {
            bytes.push(match role {
                PeerRole::Peer => 0,
                PeerRole::Relay => 1,
            });
        }
        bytes.extend_from_slice(&self.score.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> ([u8; 32], NodeId) {
        let seed_bytes = [seed; 32];
        let signing = SigningKey::from_bytes(&seed_bytes);
        (seed_bytes, NodeId::from_bytes(signing.verifying_key().to_bytes()))
    }

    #[test]
    fn announce_roundtrip() {
        let (_, id) = keypair(1);
        let announce = PeerAnnounce::new(id, "alice".into(), vec![PeerRole::Relay], 1000);

        let bytes = announce.to_bytes().expect("serialize");
        let decoded = PeerAnnounce::from_bytes(&bytes).expect("deserialize");
        assert_eq!(announce, decoded);
        assert_eq!(decoded.encryption_key, id.as_bytes());
    }

    #[test]
    fn timestamp_validation() {
        let (_, id) = keypair(1);
        let now = 10_000_000u64;
        let mut announce = PeerAnnounce::new(id, "alice".into(), vec![], now);

        assert!(announce.is_timestamp_valid(now));

        announce.timestamp = now + 1000;
        assert!(announce.is_timestamp_valid(now));

        announce.timestamp = now + MAX_FUTURE_DRIFT_MS + 1;
        assert!(!announce.is_timestamp_valid(now));

        announce.timestamp = now - 30 * 60 * 1000;
        assert!(announce.is_timestamp_valid(now));

        announce.timestamp = now.saturating_sub(2 * 60 * 60 * 1000);
        assert!(!announce.is_timestamp_valid(now));
    }

    #[test]
    fn sign_and_verify_role_announce() {
        let (seed, node_id) = keypair(42);
        let announce =
            RoleChangeAnnounce::new(node_id, vec![PeerRole::Relay], 15.5, 1000, &seed);

        assert!(announce.verify_signature());
    }

    #[test]
    fn tampered_role_announce_fails() {
        let (seed, node_id) = keypair(42);
        let mut announce =
            RoleChangeAnnounce::new(node_id, vec![PeerRole::Relay], 15.5, 1000, &seed);

        announce.score = 100.0;
        assert!(!announce.verify_signature());
    }

    #[test]
    fn role_announce_from_wrong_key_fails() {
        let (other_seed, _) = keypair(1);
        let (_, node_id) = keypair(2);

        // Signed by a key that is not node_id's
        let announce =
            RoleChangeAnnounce::new(node_id, vec![PeerRole::Relay], 5.0, 1000, &other_seed);
        assert!(!announce.verify_signature());
    }

    #[test]
    fn role_announce_roundtrip() {
        let (seed, node_id) = keypair(3);
        let announce = RoleChangeAnnounce::new(node_id, vec![PeerRole::Peer], 1.0, 7777, &seed);

        let bytes = announce.to_bytes().unwrap();
        let decoded = RoleChangeAnnounce::from_bytes(&bytes).unwrap();
        assert!(decoded.verify_signature());
        assert_eq!(decoded.timestamp, 7777);
    }
}

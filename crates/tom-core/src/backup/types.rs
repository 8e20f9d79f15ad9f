/// Backup types for the ToM offline-delivery system.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{NodeId, MESSAGE_TTL_MS};

/// Absolute backup expiry: 24 hours. Non-negotiable — the TTL is the hard
/// bound that makes "silently lost after a day" an accepted outcome.
pub const BACKUP_TTL_MS: u64 = MESSAGE_TTL_MS;

/// Minimum replica fan-out when a send fails.
pub const MIN_REPLICAS: usize = 3;

/// Maximum replica fan-out.
pub const MAX_REPLICAS: usize = 5;

/// Host score at or below which a holder proactively migrates its entries.
pub const HOST_REPLICATION_THRESHOLD: u8 = 30;

/// A backed-up message held for an offline recipient.
///
/// `expires_at` is absolute (Unix ms), not a relative TTL — replicas on
/// different hosts must agree on when the entry dies despite clock skew
/// at storage time.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    /// Original envelope id.
    pub message_id: String,
    pub recipient: NodeId,
    pub sender: NodeId,
    /// The full serialized original envelope (still signed by the sender,
    /// still encrypted for the recipient — holders never see plaintext).
    pub envelope_bytes: Vec<u8>,
    pub stored_at: u64,
    pub expires_at: u64,
    /// Nodes known to hold replicas of this entry.
    pub replicas: HashSet<NodeId>,
}

impl BackupEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_ttl(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

/// Wire payload for `MessageType::BackupStore` — both the initial
/// sender→holder hand-off and holder→holder migration use it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupStorePayload {
    pub message_id: String,
    pub recipient: NodeId,
    pub sender: NodeId,
    pub envelope_bytes: Vec<u8>,
    /// Absolute expiry (Unix ms).
    pub expires_at: u64,
    /// Other nodes asked to hold this message.
    pub replicas: Vec<NodeId>,
}

impl BackupStorePayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("BackupStorePayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Wire payload for `MessageType::BackupAck` — recipient → holder after a
/// backed-up message reached it; holders also propagate it to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAckPayload {
    pub message_id: String,
}

impl BackupAckPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("BackupAckPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Wire payload for `MessageType::BackupQuery` — asks a peer whether it
/// holds messages for a recipient that just reconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupQueryPayload {
    pub recipient: NodeId,
}

impl BackupQueryPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("BackupQueryPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Events emitted by the backup system.
#[derive(Debug, Clone)]
pub enum BackupEvent {
    Stored {
        message_id: String,
        recipient: NodeId,
    },
    Delivered {
        message_id: String,
        recipient: NodeId,
    },
    Expired {
        message_id: String,
        recipient: NodeId,
    },
    Migrated {
        message_id: String,
        target: NodeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn entry(expires_at: u64) -> BackupEntry {
        BackupEntry {
            message_id: "msg-1".into(),
            recipient: node_id(1),
            sender: node_id(2),
            envelope_bytes: vec![1, 2, 3],
            stored_at: 10_000,
            expires_at,
            replicas: HashSet::new(),
        }
    }

    #[test]
    fn expiry_check() {
        let e = entry(11_000);
        assert!(!e.is_expired(10_500));
        assert!(!e.is_expired(10_999));
        assert!(e.is_expired(11_000));
        assert!(e.is_expired(20_000));
    }

    #[test]
    fn remaining_ttl() {
        let e = entry(15_000);
        assert_eq!(e.remaining_ttl(10_000), 5_000);
        assert_eq!(e.remaining_ttl(15_000), 0);
        assert_eq!(e.remaining_ttl(20_000), 0);
    }

    #[test]
    fn store_payload_roundtrip() {
        let payload = BackupStorePayload {
            message_id: "msg-1".into(),
            recipient: node_id(1),
            sender: node_id(2),
            envelope_bytes: vec![1, 2, 3],
            expires_at: 100_000,
            replicas: vec![node_id(3), node_id(4)],
        };
        let decoded = BackupStorePayload::from_bytes(&payload.to_bytes()).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn ack_and_query_roundtrip() {
        let ack = BackupAckPayload {
            message_id: "msg-1".into(),
        };
        assert_eq!(BackupAckPayload::from_bytes(&ack.to_bytes()).unwrap(), ack);

        let query = BackupQueryPayload {
            recipient: node_id(1),
        };
        assert_eq!(
            BackupQueryPayload::from_bytes(&query.to_bytes()).unwrap(),
            query
        );
    }
}

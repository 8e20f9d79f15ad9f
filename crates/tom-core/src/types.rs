use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Node identity — the 32-byte Ed25519 public key.
///
/// Serves as both network address and identity; there is no separate
/// registry. Ordering is lexicographic over the raw bytes, which gives
/// every node the same answer for "smallest member" computations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form — full 64 hex chars drowns out everything else in logs.
        let full = self.to_string();
        write!(f, "NodeId({}..)", &full[..8])
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(format!("expected 64 hex chars, got {}", s.len()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|e| e.to_string())?;
        }
        Ok(Self(bytes))
    }
}

/// Message type — determines how the protocol handles the envelope.
///
/// The taxonomy is closed; adding a variant requires a coordinated
/// protocol version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Chat,
    Ack,
    ReadReceipt,
    Heartbeat,
    PeerAnnounce,
    // Group lifecycle + messaging
    GroupInvite,
    GroupInviteAck,
    GroupMessage,
    GroupJoin,
    GroupLeave,
    GroupHubHeartbeat,
    // Offline backup
    BackupStore,
    BackupAck,
    BackupQuery,
    // Network hints
    SubnetAnnounce,
    RoleAssignment,
}

/// Delivery status pipeline for an outbound message.
///
/// Follows the progression: Pending -> Sent -> Relayed -> Delivered -> Read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending = 0,
    Sent = 1,
    Relayed = 2,
    Delivered = 3,
    Read = 4,
}

/// Maximum relay depth (hops) for a message.
pub const MAX_TTL: u32 = 4;

/// Default TTL for new envelopes.
pub const DEFAULT_TTL: u32 = 4;

/// Hard expiry for anything the protocol holds: 24 hours in milliseconds.
pub const MESSAGE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}

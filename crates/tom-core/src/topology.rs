/// In-memory peer directory for the ToM core.
///
/// The topology is the node's view of who exists, what roles they serve,
/// and whether they are reachable. Peers are created on first discovery
/// and never destroyed by liveness — an unreachable peer is retained as
/// Offline so conversations can resume when it returns.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Role a node plays in the network (assigned dynamically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerRole {
    /// Regular participant — sends/receives messages.
    Peer,
    /// Relay-capable — forwards messages for others.
    Relay,
}

/// Current reachability of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Online,
    Offline,
}

/// Information about a known peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub node_id: NodeId,
    /// Human-readable display name (from gossip announces).
    pub username: String,
    /// Ed25519 public key used for E2E payload encryption. For ToM
    /// identities this equals the node id bytes.
    pub encryption_key: [u8; 32],
    /// Roles this node serves.
    pub roles: Vec<PeerRole>,
    pub status: PeerStatus,
    /// Unix ms timestamp of last observed activity.
    pub last_seen: u64,
}

impl PeerInfo {
    /// Minimal entry for a peer we only know by id.
    pub fn bare(node_id: NodeId, now: u64) -> Self {
        Self {
            node_id,
            username: String::new(),
            encryption_key: node_id.as_bytes(),
            roles: vec![PeerRole::Peer],
            status: PeerStatus::Online,
            last_seen: now,
        }
    }

    pub fn is_relay(&self) -> bool {
        self.roles.contains(&PeerRole::Relay)
    }
}

/// Snapshot of known network topology — peers and their roles/status.
///
/// Updated by gossip and heartbeats. The RelaySelector and the group hub
/// election read this to make routing decisions.
#[derive(Debug, Default)]
pub struct Topology {
    peers: HashMap<NodeId, PeerInfo>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a peer entry.
    pub fn upsert(&mut self, info: PeerInfo) {
        self.peers.insert(info.node_id, info);
    }

    /// Insert a bare entry if the peer is unknown. Returns true if inserted.
    pub fn insert_if_unknown(&mut self, node_id: NodeId, now: u64) -> bool {
        if self.peers.contains_key(&node_id) {
            return false;
        }
        self.peers.insert(node_id, PeerInfo::bare(node_id, now));
        true
    }

    /// Remove a peer (explicit application command only).
    pub fn remove(&mut self, node_id: &NodeId) -> bool {
        self.peers.remove(node_id).is_some()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&PeerInfo> {
        self.peers.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut PeerInfo> {
        self.peers.get_mut(node_id)
    }

    /// Whether the peer is currently marked Online.
    pub fn is_online(&self, node_id: &NodeId) -> bool {
        self.peers
            .get(node_id)
            .is_some_and(|p| p.status == PeerStatus::Online)
    }

    /// All known peers.
    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All online peers, sorted by most recently seen.
    pub fn online_peers(&self) -> Vec<&PeerInfo> {
        let mut peers: Vec<&PeerInfo> = self
            .peers
            .values()
            .filter(|p| p.status == PeerStatus::Online)
            .collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }

    /// All online relay-capable peers, sorted by most recently seen.
    pub fn online_relays(&self) -> Vec<&PeerInfo> {
        let mut relays: Vec<&PeerInfo> = self
            .peers
            .values()
            .filter(|p| p.is_relay() && p.status == PeerStatus::Online)
            .collect();
        relays.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        relays
    }
}

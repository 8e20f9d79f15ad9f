/// HeartbeatTracker — peer presence from heartbeat timestamps.
///
/// Pure state machine: record heartbeats, scan for transitions. Every
/// inbound envelope from a peer counts as a heartbeat. A peer unseen for
/// longer than the offline threshold flips Online→Offline; the next
/// heartbeat flips it back. The topology entry is never removed — an
/// offline peer is a peer we remember.
use std::collections::HashMap;

use crate::topology::{PeerStatus, Topology};
use crate::types::NodeId;

/// Default interval between self heartbeats (5 s).
pub const HEARTBEAT_SEND_INTERVAL_MS: u64 = 5_000;

/// Default offline threshold — three missed heartbeats (15 s).
pub const OFFLINE_THRESHOLD_MS: u64 = 15_000;

/// Presence transitions produced by a liveness scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// First heartbeat from a peer, or a recovery from Offline.
    PeerOnline { node_id: NodeId },
    /// Peer exceeded the offline threshold.
    PeerOffline { node_id: NodeId },
}

/// Tracks peer liveness via heartbeat timestamps.
pub struct HeartbeatTracker {
    /// Last heartbeat time per peer (Unix ms).
    last_heartbeat: HashMap<NodeId, u64>,
    /// Offline threshold in ms. Must exceed the send interval.
    offline_threshold_ms: u64,
}

impl HeartbeatTracker {
    /// Create a tracker. The threshold must exceed the send interval,
    /// otherwise healthy peers flap offline between their own beats.
    pub fn new(offline_threshold_ms: u64, send_interval_ms: u64) -> Self {
        assert!(
            offline_threshold_ms > send_interval_ms,
            "offline threshold ({offline_threshold_ms}ms) must exceed send interval ({send_interval_ms}ms)"
        );
        Self {
            last_heartbeat: HashMap::new(),
            offline_threshold_ms,
        }
    }

    /// Record a heartbeat from a peer at the given time.
    pub fn record(&mut self, node_id: NodeId, now: u64) {
        self.last_heartbeat.insert(node_id, now);
    }

    /// Stop tracking a peer (explicit removal only).
    pub fn untrack(&mut self, node_id: &NodeId) {
        self.last_heartbeat.remove(node_id);
    }

    /// Last heartbeat timestamp for a peer.
    pub fn last_seen(&self, node_id: &NodeId) -> Option<u64> {
        self.last_heartbeat.get(node_id).copied()
    }

    /// Whether the peer is within the liveness threshold at `now`.
    pub fn is_alive(&self, node_id: &NodeId, now: u64) -> bool {
        self.last_heartbeat
            .get(node_id)
            .is_some_and(|&last| now.saturating_sub(last) < self.offline_threshold_ms)
    }

    /// Scan all tracked peers, update topology statuses, and return the
    /// transitions that occurred.
    pub fn check_all(&mut self, topology: &mut Topology, now: u64) -> Vec<PresenceEvent> {
        let mut events = vec![];

        for (&node_id, &last) in &self.last_heartbeat {
            let elapsed = now.saturating_sub(last);
            let Some(peer) = topology.get_mut(&node_id) else {
                continue;
            };

            if elapsed >= self.offline_threshold_ms {
                if peer.status != PeerStatus::Offline {
                    peer.status = PeerStatus::Offline;
                    events.push(PresenceEvent::PeerOffline { node_id });
                }
            } else if peer.status == PeerStatus::Offline {
                peer.status = PeerStatus::Online;
                peer.last_seen = last;
                events.push(PresenceEvent::PeerOnline { node_id });
            } else {
                peer.last_seen = last;
            }
        }

        events
    }

    /// Number of tracked peers.
    pub fn tracked_count(&self) -> usize {
        self.last_heartbeat.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::PeerInfo;

    fn node_id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn tracker() -> HeartbeatTracker {
        HeartbeatTracker::new(15_000, 5_000)
    }

    #[test]
    #[should_panic(expected = "must exceed send interval")]
    fn threshold_must_exceed_interval() {
        HeartbeatTracker::new(5_000, 5_000);
    }

    #[test]
    fn record_and_is_alive() {
        let mut hb = tracker();
        let alice = node_id(1);

        assert!(!hb.is_alive(&alice, 10_000));

        hb.record(alice, 10_000);
        assert!(hb.is_alive(&alice, 10_000));
        assert!(hb.is_alive(&alice, 24_999));
        assert!(!hb.is_alive(&alice, 25_000));
    }

    #[test]
    fn heartbeat_refreshes() {
        let mut hb = tracker();
        let alice = node_id(1);

        hb.record(alice, 10_000);
        hb.record(alice, 20_000);
        assert!(hb.is_alive(&alice, 30_000));
    }

    #[test]
    fn offline_transition_at_threshold() {
        let mut hb = tracker();
        let mut topo = Topology::new();
        let alice = node_id(1);

        topo.upsert(PeerInfo::bare(alice, 10_000));
        hb.record(alice, 10_000);

        // One ms inside the threshold — still online
        let events = hb.check_all(&mut topo, 10_000 + 15_000 - 1);
        assert!(events.is_empty());
        assert!(topo.is_online(&alice));

        // At the threshold — offline
        let events = hb.check_all(&mut topo, 10_000 + 15_000 + 1);
        assert_eq!(events, vec![PresenceEvent::PeerOffline { node_id: alice }]);
        assert!(!topo.is_online(&alice));
        assert!(topo.get(&alice).is_some(), "offline peer is retained");
    }

    #[test]
    fn offline_event_emitted_once() {
        let mut hb = tracker();
        let mut topo = Topology::new();
        let alice = node_id(1);

        topo.upsert(PeerInfo::bare(alice, 0));
        hb.record(alice, 0);

        assert_eq!(hb.check_all(&mut topo, 20_000).len(), 1);
        assert!(hb.check_all(&mut topo, 30_000).is_empty());
    }

    #[test]
    fn reconnect_transition() {
        let mut hb = tracker();
        let mut topo = Topology::new();
        let alice = node_id(1);

        topo.upsert(PeerInfo::bare(alice, 0));
        hb.record(alice, 0);
        hb.check_all(&mut topo, 20_000);
        assert!(!topo.is_online(&alice));

        hb.record(alice, 21_000);
        let events = hb.check_all(&mut topo, 21_500);
        assert_eq!(events, vec![PresenceEvent::PeerOnline { node_id: alice }]);
        assert!(topo.is_online(&alice));
    }

    #[test]
    fn untracked_peer_in_topology_unaffected() {
        let mut hb = tracker();
        let mut topo = Topology::new();
        let alice = node_id(1);

        topo.upsert(PeerInfo::bare(alice, 0));
        // No heartbeat recorded — scan has nothing to say about alice
        assert!(hb.check_all(&mut topo, 100_000).is_empty());
        assert!(topo.is_online(&alice));
    }

    #[test]
    fn untrack_removes() {
        let mut hb = tracker();
        let alice = node_id(1);

        hb.record(alice, 1000);
        assert_eq!(hb.tracked_count(), 1);

        hb.untrack(&alice);
        assert_eq!(hb.tracked_count(), 0);
    }
}

/// Relay selection for the ToM core.
///
/// Chooses the next-hop relay for a target based on network topology:
/// online relay-capable peers, ranked by recent failure count, subnet
/// affinity with the target, and recency. A round-robin offset among
/// equally ranked candidates spreads load across the relay set.
///
/// Pure logic — reads topology and subnets, returns a selection. No I/O.
use std::collections::HashMap;

use crate::subnet::EphemeralSubnets;
use crate::topology::Topology;
use crate::types::NodeId;

/// Sliding window for counting relay failures (5 minutes).
pub const FAILURE_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Why a particular relay (or none) was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// Target is itself online — no relay needed.
    DirectDelivery,
    /// Relay shares an ephemeral subnet with the target.
    SubnetAffinity,
    /// Best-ranked relay by failures/recency.
    BestRanked,
    /// Only available relay.
    OnlyOption,
    /// Alternate after the primary failed.
    Alternate,
    /// No relay available.
    NoRelayAvailable,
}

/// Result of relay selection.
#[derive(Debug)]
pub struct RelaySelection {
    pub relay_id: Option<NodeId>,
    pub reason: SelectionReason,
}

/// Selects the best relay for message routing.
pub struct RelaySelector {
    self_id: NodeId,
    /// Recent failure timestamps per relay (pruned to the window).
    failures: HashMap<NodeId, Vec<u64>>,
    /// Round-robin cursor for spreading load over equal candidates.
    rotation: usize,
}

impl RelaySelector {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            failures: HashMap::new(),
            rotation: 0,
        }
    }

    /// Record a failed send through `relay`.
    pub fn record_failure(&mut self, relay: NodeId, now: u64) {
        let entries = self.failures.entry(relay).or_default();
        entries.push(now);
        entries.retain(|&t| now.saturating_sub(t) < FAILURE_WINDOW_MS);
    }

    /// Failures for `relay` within the sliding window.
    pub fn failure_count(&self, relay: &NodeId, now: u64) -> usize {
        self.failures
            .get(relay)
            .map(|v| {
                v.iter()
                    .filter(|&&t| now.saturating_sub(t) < FAILURE_WINDOW_MS)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Select the best relay to reach `target`.
    pub fn select_best(
        &mut self,
        target: NodeId,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
    ) -> RelaySelection {
        self.select_excluding(target, topology, subnets, now, &[], false)
    }

    /// Select an alternate relay after a failure, excluding the failed set.
    pub fn select_alternate(
        &mut self,
        target: NodeId,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
        failed: &[NodeId],
    ) -> RelaySelection {
        self.select_excluding(target, topology, subnets, now, failed, true)
    }

    /// Build the `via` chain to reach `target`: empty for a direct
    /// neighbor, one relay hop otherwise.
    pub fn select_path(
        &mut self,
        target: NodeId,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
    ) -> Vec<NodeId> {
        match self.select_best(target, topology, subnets, now) {
            RelaySelection {
                reason: SelectionReason::DirectDelivery,
                ..
            } => Vec::new(),
            RelaySelection {
                relay_id: Some(relay),
                ..
            } => vec![relay],
            _ => Vec::new(),
        }
    }

    fn select_excluding(
        &mut self,
        target: NodeId,
        topology: &Topology,
        subnets: &EphemeralSubnets,
        now: u64,
        exclude: &[NodeId],
        alternate: bool,
    ) -> RelaySelection {
        if topology.is_online(&target) && !alternate {
            return RelaySelection {
                relay_id: Some(self.self_id),
                reason: SelectionReason::DirectDelivery,
            };
        }

        // Rank: fewest recent failures, subnet affinity with the target,
        // then recency. last_seen is negated into the key so that the
        // whole tuple sorts ascending.
        let mut candidates: Vec<(usize, bool, i64, NodeId)> = topology
            .online_relays()
            .into_iter()
            .filter(|p| {
                p.node_id != self.self_id
                    && p.node_id != target
                    && !exclude.contains(&p.node_id)
            })
            .map(|p| {
                (
                    self.failure_count(&p.node_id, now),
                    !subnets.are_in_same_subnet(&p.node_id, &target),
                    -(p.last_seen as i64),
                    p.node_id,
                )
            })
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => RelaySelection {
                relay_id: None,
                reason: SelectionReason::NoRelayAvailable,
            },
            1 => RelaySelection {
                relay_id: Some(candidates[0].3),
                reason: if alternate {
                    SelectionReason::Alternate
                } else {
                    SelectionReason::OnlyOption
                },
            },
            _ => {
                // Round-robin among candidates tied with the best on
                // (failures, affinity) so one relay doesn't eat all traffic.
                let best = (candidates[0].0, candidates[0].1);
                let tied = candidates
                    .iter()
                    .take_while(|c| (c.0, c.1) == best)
                    .count();
                let pick = &candidates[self.rotation % tied];
                self.rotation = self.rotation.wrapping_add(1);

                let reason = if alternate {
                    SelectionReason::Alternate
                } else if subnets.are_in_same_subnet(&pick.3, &target) {
                    SelectionReason::SubnetAffinity
                } else {
                    SelectionReason::BestRanked
                };
                RelaySelection {
                    relay_id: Some(pick.3),
                    reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{PeerInfo, PeerRole, PeerStatus};

    fn node_id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn make_relay(seed: u8, last_seen: u64) -> PeerInfo {
        PeerInfo {
            node_id: node_id(seed),
            username: String::new(),
            encryption_key: [seed; 32],
            roles: vec![PeerRole::Peer, PeerRole::Relay],
            status: PeerStatus::Online,
            last_seen,
        }
    }

    fn empty_subnets() -> EphemeralSubnets {
        EphemeralSubnets::new(node_id(0))
    }

    #[test]
    fn direct_delivery_when_target_online() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(PeerInfo::bare(target, 1000));

        let result = selector.select_best(target, &topo, &empty_subnets(), 2000);
        assert_eq!(result.reason, SelectionReason::DirectDelivery);
        assert_eq!(result.relay_id, Some(me));

        let path = selector.select_path(target, &topo, &empty_subnets(), 2000);
        assert!(path.is_empty());
    }

    #[test]
    fn no_relays_available() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);
        let topo = Topology::new();

        let result = selector.select_best(target, &topo, &empty_subnets(), 1000);
        assert_eq!(result.relay_id, None);
        assert_eq!(result.reason, SelectionReason::NoRelayAvailable);
    }

    #[test]
    fn only_option() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 1000));

        let result = selector.select_best(target, &topo, &empty_subnets(), 2000);
        assert_eq!(result.relay_id, Some(node_id(1)));
        assert_eq!(result.reason, SelectionReason::OnlyOption);
    }

    #[test]
    fn excludes_self_and_target() {
        let me = node_id(1);
        let target = node_id(2);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(PeerInfo {
            status: PeerStatus::Offline,
            ..make_relay(2, 4000)
        }); // target offline → relayed path
        topo.upsert(make_relay(1, 5000)); // self
        topo.upsert(make_relay(3, 3000)); // valid

        let result = selector.select_best(target, &topo, &empty_subnets(), 6000);
        assert_eq!(result.relay_id, Some(node_id(3)));
    }

    #[test]
    fn failures_push_relay_down() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 5000)); // most recent, but failing
        topo.upsert(make_relay(2, 1000));

        selector.record_failure(node_id(1), 6000);
        selector.record_failure(node_id(1), 6100);

        let result = selector.select_best(target, &topo, &empty_subnets(), 6200);
        assert_eq!(result.relay_id, Some(node_id(2)));
    }

    #[test]
    fn failures_expire_with_window() {
        let me = node_id(100);
        let mut selector = RelaySelector::new(me);

        selector.record_failure(node_id(1), 1000);
        assert_eq!(selector.failure_count(&node_id(1), 1000), 1);
        assert_eq!(
            selector.failure_count(&node_id(1), 1000 + FAILURE_WINDOW_MS),
            0
        );
    }

    #[test]
    fn subnet_affinity_preferred() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 9000)); // fresher, no affinity
        topo.upsert(make_relay(2, 1000)); // stale, but shares subnet with target

        let mut subnets = empty_subnets();
        for _ in 0..5 {
            subnets.record_communication(node_id(2), target, 1000);
            subnets.record_communication(target, node_id(3), 1000);
            subnets.record_communication(node_id(2), node_id(3), 1000);
        }
        subnets.evaluate(1000);
        assert!(subnets.are_in_same_subnet(&node_id(2), &target));

        let result = selector.select_best(target, &topo, &subnets, 9500);
        assert_eq!(result.relay_id, Some(node_id(2)));
        assert_eq!(result.reason, SelectionReason::SubnetAffinity);
    }

    #[test]
    fn select_alternate_excludes_failed() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 3000));
        topo.upsert(make_relay(2, 2000));

        let result =
            selector.select_alternate(target, &topo, &empty_subnets(), 4000, &[node_id(1)]);
        assert_eq!(result.relay_id, Some(node_id(2)));
        assert_eq!(result.reason, SelectionReason::Alternate);
    }

    #[test]
    fn round_robin_spreads_equal_candidates() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        // Same last_seen → tied on every rank component
        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 1000));
        topo.upsert(make_relay(2, 1000));
        topo.upsert(make_relay(3, 1000));

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let result = selector.select_best(target, &topo, &empty_subnets(), 2000);
            seen.insert(result.relay_id.unwrap());
        }
        assert!(seen.len() > 1, "rotation should not pin a single relay");
    }

    #[test]
    fn select_path_single_hop_for_offline_target() {
        let me = node_id(100);
        let target = node_id(200);
        let mut selector = RelaySelector::new(me);

        let mut topo = Topology::new();
        topo.upsert(make_relay(1, 3000));

        let path = selector.select_path(target, &topo, &empty_subnets(), 4000);
        assert_eq!(path, vec![node_id(1)]);
    }
}

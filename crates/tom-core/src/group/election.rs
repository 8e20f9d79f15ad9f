/// Deterministic hub election.
///
/// The hub is the lexicographically smallest currently-online member.
/// Every member runs the same function over the same inputs and arrives
/// at the same winner — no consensus round, no split-brain, failover is
/// just "recompute".
use crate::group::types::Group;
use crate::topology::Topology;
use crate::types::NodeId;

/// Elect the hub for `group` as seen from `local_id`.
///
/// A member counts as online if the topology says so; the local node
/// always counts as online for its own computation. Returns `None` only
/// when no member qualifies (a group we observe but don't belong to,
/// with every member offline).
pub fn elect_hub(group: &Group, topology: &Topology, local_id: NodeId) -> Option<NodeId> {
    // BTreeSet iterates in ascending NodeId order — first online wins.
    group
        .members
        .iter()
        .find(|&&member| member == local_id || topology.is_online(&member))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::types::GroupId;
    use crate::topology::{PeerInfo, PeerStatus};
    use std::collections::BTreeSet;

    fn node_id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn make_group(member_seeds: &[u8]) -> Group {
        let members: BTreeSet<NodeId> = member_seeds.iter().map(|&s| node_id(s)).collect();
        Group {
            group_id: GroupId::from("grp-test".to_string()),
            name: "Test".into(),
            owner: node_id(member_seeds[0]),
            members,
            epoch: 0,
            created_at: 1000,
            last_activity: 1000,
        }
    }

    fn online(topology: &mut Topology, seed: u8) {
        topology.upsert(PeerInfo::bare(node_id(seed), 1000));
    }

    fn offline(topology: &mut Topology, seed: u8) {
        let mut info = PeerInfo::bare(node_id(seed), 1000);
        info.status = PeerStatus::Offline;
        topology.upsert(info);
    }

    #[test]
    fn smallest_online_member_wins() {
        let group = make_group(&[3, 5, 7]);
        let mut topo = Topology::new();
        online(&mut topo, 3);
        online(&mut topo, 5);
        online(&mut topo, 7);

        assert_eq!(elect_hub(&group, &topo, node_id(99)), Some(node_id(3)));
    }

    #[test]
    fn offline_smallest_is_skipped() {
        let group = make_group(&[3, 5, 7]);
        let mut topo = Topology::new();
        offline(&mut topo, 3);
        online(&mut topo, 5);
        online(&mut topo, 7);

        assert_eq!(elect_hub(&group, &topo, node_id(99)), Some(node_id(5)));
    }

    #[test]
    fn local_node_counts_as_online() {
        let group = make_group(&[3, 5]);
        let topo = Topology::new(); // knows nothing

        // We are member 3 — smallest, and online by definition
        assert_eq!(elect_hub(&group, &topo, node_id(3)), Some(node_id(3)));
        // We are member 5 — member 3 is not known online, so we win
        assert_eq!(elect_hub(&group, &topo, node_id(5)), Some(node_id(5)));
    }

    #[test]
    fn no_candidates() {
        let group = make_group(&[3, 5]);
        let mut topo = Topology::new();
        offline(&mut topo, 3);
        offline(&mut topo, 5);

        assert_eq!(elect_hub(&group, &topo, node_id(99)), None);
    }

    #[test]
    fn deterministic_across_members() {
        let group = make_group(&[2, 4, 6, 8]);
        let mut topo = Topology::new();
        for seed in [2, 4, 6, 8] {
            online(&mut topo, seed);
        }

        // Every non-member observer and every member agrees
        let expected = elect_hub(&group, &topo, node_id(99));
        for seed in [2, 4, 6, 8] {
            assert_eq!(elect_hub(&group, &topo, node_id(seed)), expected);
        }
        assert_eq!(expected, Some(node_id(2)));
    }

    #[test]
    fn failover_recomputes_to_next_member() {
        let group = make_group(&[2, 4, 6]);
        let mut topo = Topology::new();
        online(&mut topo, 2);
        online(&mut topo, 4);
        online(&mut topo, 6);

        assert_eq!(elect_hub(&group, &topo, node_id(99)), Some(node_id(2)));

        // Hub dies — everyone independently lands on the next member
        offline(&mut topo, 2);
        assert_eq!(elect_hub(&group, &topo, node_id(99)), Some(node_id(4)));
    }
}

/// Ephemeral subnets — self-organizing clusters from communication patterns.
///
/// Pure state machine: record communications, evaluate periodically.
/// No I/O — the runtime drives the timer and surfaces events.
///
/// Algorithm: BFS clustering over a weighted communication graph.
/// Edges decay linearly with age; subnets dissolve on inactivity, and
/// nodes dissolved in a cycle are excluded from formation in that same
/// cycle so clusters don't oscillate between formed and dissolved.
use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Minimum messages between two nodes to consider them connected.
pub const MIN_EDGE_WEIGHT: u32 = 3;

/// Minimum cluster size to form a subnet.
pub const MIN_SUBNET_SIZE: usize = 3;

/// Maximum cluster size (BFS stops here).
pub const MAX_SUBNET_SIZE: usize = 10;

/// Inactivity timeout — dissolve a subnet after 5 minutes of silence.
pub const INACTIVITY_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Edge decay starts after this age (10 minutes).
pub const EDGE_DECAY_MS: u64 = 10 * 60 * 1000;

/// A communication edge between two nodes. Endpoints are stored in
/// canonical (sorted) order so (a,b) and (b,a) share one edge.
#[derive(Debug, Clone)]
struct CommunicationEdge {
    a: NodeId,
    b: NodeId,
    weight: u32,
    last_seen: u64,
}

/// An ephemeral subnet — a cluster of nodes that communicate frequently.
#[derive(Debug, Clone)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub members: HashSet<NodeId>,
    pub formed_at: u64,
    pub last_activity: u64,
    pub density_score: f64,
}

impl SubnetInfo {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Events emitted by the subnet manager.
#[derive(Debug, Clone)]
pub enum SubnetEvent {
    SubnetFormed { subnet: SubnetInfo },
    SubnetDissolved { subnet_id: String, reason: DissolveReason },
}

/// Why a subnet was dissolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissolveReason {
    Inactive,
    InsufficientMembers,
}

/// Wire payload for `MessageType::SubnetAnnounce` — lets remote graphs
/// converge on clusters they can't observe directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetAnnounce {
    pub subnet_id: String,
    pub members: Vec<NodeId>,
    pub density_score: f64,
    pub timestamp: u64,
}

/// Manages ephemeral subnets based on communication patterns.
pub struct EphemeralSubnets {
    local_id: NodeId,
    /// Communication graph, keyed by canonical endpoint pair.
    edges: HashMap<(NodeId, NodeId), CommunicationEdge>,
    /// Active subnets: subnet_id → info.
    subnets: HashMap<String, SubnetInfo>,
    /// Node → subnet mapping (one subnet per node).
    node_subnets: HashMap<NodeId, String>,
    /// Counter for deterministic subnet IDs.
    next_subnet_seq: u64,
}

impl EphemeralSubnets {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            edges: HashMap::new(),
            subnets: HashMap::new(),
            node_subnets: HashMap::new(),
            next_subnet_seq: 0,
        }
    }

    /// Record a communication between two nodes.
    pub fn record_communication(&mut self, from: NodeId, to: NodeId, now: u64) {
        if from == to {
            return;
        }
        let (a, b) = canonical_pair(from, to);
        let edge = self.edges.entry((a, b)).or_insert(CommunicationEdge {
            a,
            b,
            weight: 0,
            last_seen: now,
        });
        edge.weight = edge.weight.saturating_add(1);
        edge.last_seen = now;

        // Refresh subnet activity when both endpoints share one
        if let Some(subnet_id) = self.node_subnets.get(&from) {
            if self.node_subnets.get(&to) == Some(subnet_id) {
                if let Some(subnet) = self.subnets.get_mut(subnet_id) {
                    subnet.last_activity = now;
                }
            }
        }
    }

    /// Ingest a remote `SubnetAnnounce` by recording synthetic edges among
    /// the announced members. Weight 1 per pair per announce — announces
    /// alone never form a subnet, they only accelerate convergence.
    pub fn observe_announce(&mut self, announce: &SubnetAnnounce, now: u64) {
        for (i, &a) in announce.members.iter().enumerate() {
            for &b in announce.members.iter().skip(i + 1) {
                if a == b {
                    continue;
                }
                let (a, b) = canonical_pair(a, b);
                let edge = self.edges.entry((a, b)).or_insert(CommunicationEdge {
                    a,
                    b,
                    weight: 0,
                    last_seen: now,
                });
                edge.weight = edge.weight.saturating_add(1);
                edge.last_seen = now;
            }
        }
    }

    /// Run a full evaluation cycle. Returns events for the runtime.
    pub fn evaluate(&mut self, now: u64) -> Vec<SubnetEvent> {
        let mut events = vec![];

        self.decay_edges(now);

        let (dissolve_events, dissolved_nodes) = self.dissolve_inactive(now);
        events.extend(dissolve_events);

        events.extend(self.form_new(now, &dissolved_nodes));
        events
    }

    /// Remove a node from tracking (it went offline).
    pub fn remove_node(&mut self, node_id: &NodeId) -> Vec<SubnetEvent> {
        let mut events = vec![];

        if let Some(subnet_id) = self.node_subnets.remove(node_id) {
            if let Some(subnet) = self.subnets.get_mut(&subnet_id) {
                subnet.members.remove(node_id);

                if subnet.members.len() < MIN_SUBNET_SIZE {
                    let members: Vec<NodeId> = subnet.members.iter().copied().collect();
                    for member in &members {
                        self.node_subnets.remove(member);
                    }
                    self.subnets.remove(&subnet_id);
                    events.push(SubnetEvent::SubnetDissolved {
                        subnet_id,
                        reason: DissolveReason::InsufficientMembers,
                    });
                }
            }
        }

        self.edges
            .retain(|(a, b), _| a != node_id && b != node_id);
        events
    }

    /// The subnet a node belongs to, if any.
    pub fn subnet_of(&self, node_id: &NodeId) -> Option<&SubnetInfo> {
        self.subnets.get(self.node_subnets.get(node_id)?)
    }

    /// Whether two nodes share a subnet.
    pub fn are_in_same_subnet(&self, a: &NodeId, b: &NodeId) -> bool {
        match (self.node_subnets.get(a), self.node_subnets.get(b)) {
            (Some(sa), Some(sb)) => sa == sb,
            _ => false,
        }
    }

    /// Subnets the local node belongs to (at most one).
    pub fn local_subnet(&self) -> Option<&SubnetInfo> {
        self.subnet_of(&self.local_id)
    }

    pub fn all_subnets(&self) -> Vec<&SubnetInfo> {
        self.subnets.values().collect()
    }

    pub fn subnet_count(&self) -> usize {
        self.subnets.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // ── Internal ─────────────────────────────────────────────────────────

    /// Linear decay for edges older than EDGE_DECAY_MS; drops dead edges.
    fn decay_edges(&mut self, now: u64) {
        self.edges.retain(|_, edge| {
            let age = now.saturating_sub(edge.last_seen);
            if age <= EDGE_DECAY_MS {
                return true;
            }
            let ratio = age as f64 / EDGE_DECAY_MS as f64;
            let factor = (2.0 - ratio).max(0.0);
            edge.weight = (edge.weight as f64 * factor) as u32;
            edge.weight > 0
        });
    }

    /// Dissolve subnets that are inactive or undersize. Returns events and
    /// the freed nodes (excluded from formation this cycle).
    fn dissolve_inactive(&mut self, now: u64) -> (Vec<SubnetEvent>, HashSet<NodeId>) {
        let mut events = vec![];
        let mut dissolved_nodes = HashSet::new();

        let to_dissolve: Vec<(String, DissolveReason)> = self
            .subnets
            .iter()
            .filter_map(|(id, subnet)| {
                if subnet.members.len() < MIN_SUBNET_SIZE {
                    Some((id.clone(), DissolveReason::InsufficientMembers))
                } else if now.saturating_sub(subnet.last_activity) > INACTIVITY_TIMEOUT_MS {
                    Some((id.clone(), DissolveReason::Inactive))
                } else {
                    None
                }
            })
            .collect();

        for (subnet_id, reason) in to_dissolve {
            if let Some(subnet) = self.subnets.remove(&subnet_id) {
                for member in &subnet.members {
                    self.node_subnets.remove(member);
                    dissolved_nodes.insert(*member);
                }
                events.push(SubnetEvent::SubnetDissolved { subnet_id, reason });
            }
        }

        (events, dissolved_nodes)
    }

    /// Form new subnets via BFS over strong edges. `skip_nodes` are nodes
    /// dissolved this cycle — suppressing immediate re-formation.
    fn form_new(&mut self, now: u64, skip_nodes: &HashSet<NodeId>) -> Vec<SubnetEvent> {
        let mut events = vec![];

        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in self.edges.values() {
            if edge.weight >= MIN_EDGE_WEIGHT {
                adjacency.entry(edge.a).or_default().push(edge.b);
                adjacency.entry(edge.b).or_default().push(edge.a);
            }
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut starts: Vec<NodeId> = adjacency.keys().copied().collect();
        starts.sort(); // deterministic iteration order

        for start in starts {
            if visited.contains(&start)
                || self.node_subnets.contains_key(&start)
                || skip_nodes.contains(&start)
            {
                continue;
            }

            let mut cluster: Vec<NodeId> = vec![];
            let mut queue: VecDeque<NodeId> = VecDeque::new();
            queue.push_back(start);
            visited.insert(start);

            while let Some(node) = queue.pop_front() {
                if cluster.len() >= MAX_SUBNET_SIZE {
                    break;
                }
                cluster.push(node);

                if let Some(neighbors) = adjacency.get(&node) {
                    for &neighbor in neighbors {
                        if !visited.contains(&neighbor)
                            && !self.node_subnets.contains_key(&neighbor)
                            && !skip_nodes.contains(&neighbor)
                            && cluster.len() < MAX_SUBNET_SIZE
                        {
                            visited.insert(neighbor);
                            queue.push_back(neighbor);
                        }
                    }
                }
            }

            if cluster.len() >= MIN_SUBNET_SIZE {
                self.next_subnet_seq += 1;
                let subnet_id = format!("subnet-{}", self.next_subnet_seq);
                let members: HashSet<NodeId> = cluster.into_iter().collect();
                let density = self.density(&members);

                let subnet = SubnetInfo {
                    subnet_id: subnet_id.clone(),
                    members: members.clone(),
                    formed_at: now,
                    last_activity: now,
                    density_score: density,
                };

                for &member in &members {
                    self.node_subnets.insert(member, subnet_id.clone());
                }
                events.push(SubnetEvent::SubnetFormed {
                    subnet: subnet.clone(),
                });
                self.subnets.insert(subnet_id, subnet);
            }
        }

        events
    }

    /// density = sum(edge weights within the set) / (n*(n-1)/2)
    fn density(&self, members: &HashSet<NodeId>) -> f64 {
        let n = members.len();
        if n < 2 {
            return 0.0;
        }
        let potential = (n * (n - 1) / 2) as f64;
        let total: u32 = self
            .edges
            .values()
            .filter(|e| members.contains(&e.a) && members.contains(&e.b))
            .map(|e| e.weight)
            .fold(0, u32::saturating_add);
        total as f64 / potential
    }
}

fn canonical_pair(x: NodeId, y: NodeId) -> (NodeId, NodeId) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

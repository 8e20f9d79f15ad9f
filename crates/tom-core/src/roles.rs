//! Dynamic role assignment — contribution scoring and Peer↔Relay transitions.
//!
//! Score formula: weighted sum of relays served, success rate, backups
//! served minus consumed, and uptime, with progressive decay (5%/hour since
//! last activity). Scores always recover with new activity — there are no
//! permanent bans. Promotion additionally requires a minimum observed
//! online ratio; demotion uses lower hysteresis bands so a node doesn't
//! flap at the boundary.

use std::collections::HashMap;

use crate::topology::{PeerRole, Topology};
use crate::types::NodeId;

/// Decay rate: 5% per hour (expressed as fraction per ms).
const DECAY_RATE_PER_MS: f64 = 0.05 / 3_600_000.0;

/// Weight for relay count in score calculation.
pub const RELAY_COUNT_WEIGHT: f64 = 1.0;

/// Weight for success rate (0.0–1.0) in score calculation.
pub const SUCCESS_RATE_WEIGHT: f64 = 5.0;

/// Weight for uptime hours in score calculation.
pub const UPTIME_WEIGHT: f64 = 0.5;

/// Weight for net backups (served − consumed) in score calculation.
pub const BACKUP_NET_WEIGHT: f64 = 0.5;

/// Protocol violations before a forced demotion.
pub const VIOLATION_DEMOTION_LIMIT: u32 = 10;

/// Promotion/demotion bands. Demote values sit well below promote values —
/// the gap is the hysteresis that keeps borderline nodes stable.
#[derive(Debug, Clone, Copy)]
pub struct RoleThresholds {
    pub promote_score: f64,
    pub demote_score: f64,
    pub promote_online_ratio: f64,
    pub demote_online_ratio: f64,
}

impl Default for RoleThresholds {
    fn default() -> Self {
        Self {
            promote_score: 10.0,
            demote_score: 2.0,
            promote_online_ratio: 0.6,
            demote_online_ratio: 0.4,
        }
    }
}

/// Contribution metrics for a single node.
#[derive(Debug, Clone)]
pub struct ContributionMetrics {
    /// Total messages successfully relayed.
    pub messages_relayed: u64,
    /// Total relay failures.
    pub relay_failures: u64,
    /// Backup entries this node held for others.
    pub backups_served: u64,
    /// Backup entries others held for this node.
    pub backups_consumed: u64,
    /// Unix ms timestamp when this node was first observed.
    pub first_seen: u64,
    /// Unix ms timestamp of last activity.
    pub last_activity: u64,
    /// Cumulative observed uptime in milliseconds.
    pub total_uptime_ms: u64,
}

impl ContributionMetrics {
    pub fn new(now: u64) -> Self {
        Self {
            messages_relayed: 0,
            relay_failures: 0,
            backups_served: 0,
            backups_consumed: 0,
            first_seen: now,
            last_activity: now,
            total_uptime_ms: 0,
        }
    }

    fn touch(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_activity);
        self.total_uptime_ms += elapsed;
        self.last_activity = now;
    }

    pub fn record_relay(&mut self, now: u64) {
        self.messages_relayed += 1;
        self.touch(now);
    }

    pub fn record_relay_failure(&mut self, now: u64) {
        self.relay_failures += 1;
        self.touch(now);
    }

    pub fn record_backup_served(&mut self, now: u64) {
        self.backups_served += 1;
        self.touch(now);
    }

    pub fn record_backup_consumed(&mut self, now: u64) {
        self.backups_consumed += 1;
        self.touch(now);
    }

    /// Fraction of its lifetime this node has been observed active.
    pub fn online_ratio(&self, now: u64) -> f64 {
        let lifetime = now.saturating_sub(self.first_seen);
        if lifetime == 0 {
            return 1.0;
        }
        (self.total_uptime_ms as f64 / lifetime as f64).min(1.0)
    }

    /// Contribution score at `now`.
    ///
    /// raw = relays·W_relay + success_rate·W_success + net_backups·W_backup
    ///       + uptime_hours·W_uptime, decayed by 5%/hour of idleness.
    pub fn score(&self, now: u64) -> f64 {
        let total_attempts = self.messages_relayed + self.relay_failures;
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            self.messages_relayed as f64 / total_attempts as f64
        };

        let net_backups =
            self.backups_served as f64 - self.backups_consumed as f64;
        let uptime_hours = self.total_uptime_ms as f64 / 3_600_000.0;

        let raw = (self.messages_relayed as f64) * RELAY_COUNT_WEIGHT
            + success_rate * SUCCESS_RATE_WEIGHT
            + net_backups * BACKUP_NET_WEIGHT
            + uptime_hours * UPTIME_WEIGHT;

        let idle_ms = now.saturating_sub(self.last_activity) as f64;
        let decay = (-DECAY_RATE_PER_MS * idle_ms).exp();

        (raw * decay).max(0.0)
    }
}

/// Actions the runtime should execute after a role evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleAction {
    /// A remote peer was promoted to Relay in topology.
    Promoted { node_id: NodeId, score: f64 },
    /// A remote peer was demoted to Peer in topology.
    Demoted { node_id: NodeId, score: f64 },
    /// Our local role changed — broadcast a role assignment.
    LocalRoleChanged { roles: Vec<PeerRole> },
}

/// Manages contribution scores and role transitions.
pub struct RoleManager {
    local_id: NodeId,
    metrics: HashMap<NodeId, ContributionMetrics>,
    /// Protocol violations per peer; drives forced demotion.
    violations: HashMap<NodeId, u32>,
    thresholds: RoleThresholds,
}

impl RoleManager {
    pub fn new(local_id: NodeId) -> Self {
        Self::with_thresholds(local_id, RoleThresholds::default())
    }

    pub fn with_thresholds(local_id: NodeId, thresholds: RoleThresholds) -> Self {
        Self {
            local_id,
            metrics: HashMap::new(),
            violations: HashMap::new(),
            thresholds,
        }
    }

    fn entry(&mut self, node_id: NodeId, now: u64) -> &mut ContributionMetrics {
        self.metrics
            .entry(node_id)
            .or_insert_with(|| ContributionMetrics::new(now))
    }

    pub fn record_relay(&mut self, node_id: NodeId, now: u64) {
        self.entry(node_id, now).record_relay(now);
    }

    pub fn record_relay_failure(&mut self, node_id: NodeId, now: u64) {
        self.entry(node_id, now).record_relay_failure(now);
    }

    pub fn record_backup_served(&mut self, node_id: NodeId, now: u64) {
        self.entry(node_id, now).record_backup_served(now);
    }

    pub fn record_backup_consumed(&mut self, node_id: NodeId, now: u64) {
        self.entry(node_id, now).record_backup_consumed(now);
    }

    /// Record a protocol violation by a peer. Returns the running count.
    pub fn record_violation(&mut self, node_id: NodeId) -> u32 {
        let count = self.violations.entry(node_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn violation_count(&self, node_id: &NodeId) -> u32 {
        self.violations.get(node_id).copied().unwrap_or(0)
    }

    /// Whether we have any metrics for this node yet.
    pub fn is_tracked(&self, node_id: &NodeId) -> bool {
        self.metrics.contains_key(node_id)
    }

    pub fn score(&self, node_id: &NodeId, now: u64) -> f64 {
        self.metrics
            .get(node_id)
            .map(|m| m.score(now))
            .unwrap_or(0.0)
    }

    pub fn online_ratio(&self, node_id: &NodeId, now: u64) -> f64 {
        self.metrics
            .get(node_id)
            .map(|m| m.online_ratio(now))
            .unwrap_or(0.0)
    }

    /// Evaluate all tracked nodes and update topology roles.
    ///
    /// Returns actions for the runtime to surface (events, gossip).
    pub fn evaluate(&mut self, topology: &mut Topology, now: u64) -> Vec<RoleAction> {
        let mut actions = Vec::new();

        let node_ids: Vec<NodeId> = self.metrics.keys().copied().collect();
        for node_id in node_ids {
            let metrics = &self.metrics[&node_id];
            let score = metrics.score(now);
            let ratio = metrics.online_ratio(now);
            let forced_demotion =
                self.violation_count(&node_id) >= VIOLATION_DEMOTION_LIMIT;

            let Some(peer) = topology.get_mut(&node_id) else {
                continue;
            };
            let is_relay = peer.roles.contains(&PeerRole::Relay);

            if !is_relay
                && !forced_demotion
                && score >= self.thresholds.promote_score
                && ratio >= self.thresholds.promote_online_ratio
            {
                peer.roles.push(PeerRole::Relay);
                actions.push(self.action_for(node_id, peer.roles.clone(), score, true));
            } else if is_relay
                && (forced_demotion
                    || score < self.thresholds.demote_score
                    || ratio < self.thresholds.demote_online_ratio)
            {
                peer.roles.retain(|r| *r != PeerRole::Relay);
                if forced_demotion {
                    self.violations.remove(&node_id);
                }
                actions.push(self.action_for(node_id, peer.roles.clone(), score, false));
            }
        }

        actions
    }

    fn action_for(
        &self,
        node_id: NodeId,
        roles: Vec<PeerRole>,
        score: f64,
        promoted: bool,
    ) -> RoleAction {
        if node_id == self.local_id {
            RoleAction::LocalRoleChanged { roles }
        } else if promoted {
            RoleAction::Promoted { node_id, score }
        } else {
            RoleAction::Demoted { node_id, score }
        }
    }
}

/// BackupCoordinator — replica selection, ack propagation, migration.
///
/// Pure state machine around a `BackupStore`. The runtime executes the
/// returned orders (sends) and surfaces the events.
use crate::backup::store::BackupStore;
use crate::backup::types::*;
use crate::topology::Topology;
use crate::types::NodeId;

/// An outbound `BackupStore` envelope the runtime should send.
#[derive(Debug, Clone)]
pub struct MigrationOrder {
    pub target: NodeId,
    pub payload: BackupStorePayload,
}

/// Orchestrates backup duties for this node.
pub struct BackupCoordinator {
    local_id: NodeId,
    store: BackupStore,
    /// Self-assessed host quality (0–100). Below the replication
    /// threshold, held entries are migrated to healthier peers.
    host_score: u8,
}

impl BackupCoordinator {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            store: BackupStore::new(),
            host_score: 100,
        }
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub fn host_score(&self) -> u8 {
        self.host_score
    }

    /// Update the self-assessed host quality.
    pub fn update_host_score(&mut self, score: u8) {
        self.host_score = score.min(100);
    }

    // ── Sender side ──────────────────────────────────────────────────────

    /// Pick backup peers for a failed send: online, neither the recipient
    /// nor ourselves, most recently seen first.
    pub fn select_replicas(
        &self,
        topology: &Topology,
        recipient: NodeId,
        count: usize,
    ) -> Vec<NodeId> {
        topology
            .online_peers()
            .into_iter()
            .filter(|p| p.node_id != recipient && p.node_id != self.local_id)
            .take(count.clamp(MIN_REPLICAS, MAX_REPLICAS))
            .map(|p| p.node_id)
            .collect()
    }

    // ── Holder side ──────────────────────────────────────────────────────

    /// Accept a `BackupStore` payload from a sender or a migrating holder.
    pub fn handle_store(&mut self, payload: &BackupStorePayload, from: NodeId, now: u64) -> Vec<BackupEvent> {
        let events = self.store.store(payload, now);
        // The sender of the payload holds (or held) a copy too.
        if from != self.local_id {
            self.store.record_replica(&payload.message_id, from);
        }
        events
    }

    /// Entries to forward when `recipient` reconnects.
    pub fn entries_for(&self, recipient: &NodeId) -> Vec<(String, Vec<u8>)> {
        self.store
            .entries_for(recipient)
            .into_iter()
            .map(|e| (e.message_id.clone(), e.envelope_bytes.clone()))
            .collect()
    }

    /// A `BackupAck` arrived: purge our copy and name the other replicas
    /// that should hear the ack too.
    pub fn handle_ack(&mut self, message_id: &str, from: NodeId) -> (Vec<BackupEvent>, Vec<NodeId>) {
        let propagate: Vec<NodeId> = self
            .store
            .get(message_id)
            .map(|e| {
                e.replicas
                    .iter()
                    .filter(|&&r| r != self.local_id && r != from)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        (self.store.mark_delivered(message_id), propagate)
    }

    /// Answer a `BackupQuery`: message ids we hold for the recipient.
    pub fn handle_query(&self, recipient: &NodeId) -> Vec<String> {
        self.store
            .entries_for(recipient)
            .into_iter()
            .map(|e| e.message_id.clone())
            .collect()
    }

    /// Periodic maintenance: purge expired entries; if our host quality
    /// has degraded, migrate each held entry to one healthier peer before
    /// we become the failure.
    pub fn tick(&mut self, topology: &Topology, now: u64) -> (Vec<BackupEvent>, Vec<MigrationOrder>) {
        let mut events = self.store.cleanup_expired(now);
        let mut orders = vec![];

        if self.host_score > HOST_REPLICATION_THRESHOLD {
            return (events, orders);
        }

        let candidates: Vec<(String, NodeId, BackupStorePayload)> = self
            .store
            .entries()
            .filter_map(|entry| {
                let target = topology
                    .online_peers()
                    .into_iter()
                    .map(|p| p.node_id)
                    .find(|&id| {
                        id != self.local_id
                            && id != entry.recipient
                            && !entry.replicas.contains(&id)
                    })?;

                let mut replicas: Vec<NodeId> = entry.replicas.iter().copied().collect();
                replicas.push(self.local_id);

                Some((
                    entry.message_id.clone(),
                    target,
                    BackupStorePayload {
                        message_id: entry.message_id.clone(),
                        recipient: entry.recipient,
                        sender: entry.sender,
                        envelope_bytes: entry.envelope_bytes.clone(),
                        expires_at: entry.expires_at,
                        replicas,
                    },
                ))
            })
            .collect();

        for (message_id, target, payload) in candidates {
            self.store.record_replica(&message_id, target);
            events.push(BackupEvent::Migrated {
                message_id,
                target,
            });
            orders.push(MigrationOrder { target, payload });
        }

        (events, orders)
    }
}

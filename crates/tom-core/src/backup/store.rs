/// BackupStore — message storage for offline recipients.
///
/// Pure state machine: store entries, track replicas, expire TTL.
/// No I/O — the coordinator drives it and the runtime executes actions.
use std::collections::{HashMap, HashSet};

use crate::backup::types::*;
use crate::types::NodeId;

/// Maximum total entries across all recipients (memory protection).
const MAX_TOTAL_ENTRIES: usize = 10_000;

/// Stores backup entries for offline recipients.
pub struct BackupStore {
    /// Entries by message id.
    entries: HashMap<String, BackupEntry>,
    /// Index: recipient → message ids.
    by_recipient: HashMap<NodeId, HashSet<String>>,
}

impl BackupStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_recipient: HashMap::new(),
        }
    }

    /// Store from a `BackupStore` payload. Deduplicates by message id —
    /// a known id just merges the replica sets.
    pub fn store(&mut self, payload: &BackupStorePayload, now: u64) -> Vec<BackupEvent> {
        if now >= payload.expires_at {
            return vec![]; // dead on arrival
        }

        if let Some(entry) = self.entries.get_mut(&payload.message_id) {
            entry.replicas.extend(payload.replicas.iter().copied());
            return vec![];
        }

        if self.entries.len() >= MAX_TOTAL_ENTRIES {
            self.evict_soonest_expiring();
        }

        let entry = BackupEntry {
            message_id: payload.message_id.clone(),
            recipient: payload.recipient,
            sender: payload.sender,
            envelope_bytes: payload.envelope_bytes.clone(),
            stored_at: now,
            // Absolute expiry travels with the payload; clamp against a
            // holder that got handed an over-long TTL.
            expires_at: payload.expires_at.min(now + BACKUP_TTL_MS),
            replicas: payload.replicas.iter().copied().collect(),
        };

        self.by_recipient
            .entry(payload.recipient)
            .or_default()
            .insert(payload.message_id.clone());

        let event = BackupEvent::Stored {
            message_id: payload.message_id.clone(),
            recipient: payload.recipient,
        };
        self.entries.insert(payload.message_id.clone(), entry);
        vec![event]
    }

    /// All entries held for a recipient.
    pub fn entries_for(&self, recipient: &NodeId) -> Vec<&BackupEntry> {
        let Some(ids) = self.by_recipient.get(recipient) else {
            return vec![];
        };
        ids.iter().filter_map(|id| self.entries.get(id)).collect()
    }

    pub fn get(&self, message_id: &str) -> Option<&BackupEntry> {
        self.entries.get(message_id)
    }

    pub fn has(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Record that `node` holds a replica of `message_id`.
    pub fn record_replica(&mut self, message_id: &str, node: NodeId) {
        if let Some(entry) = self.entries.get_mut(message_id) {
            entry.replicas.insert(node);
        }
    }

    /// Remove an entry after confirmed delivery.
    pub fn mark_delivered(&mut self, message_id: &str) -> Vec<BackupEvent> {
        let Some(entry) = self.remove(message_id) else {
            return vec![];
        };
        vec![BackupEvent::Delivered {
            message_id: message_id.to_string(),
            recipient: entry.recipient,
        }]
    }

    /// Purge expired entries unconditionally.
    pub fn cleanup_expired(&mut self, now: u64) -> Vec<BackupEvent> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.message_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                let entry = self.remove(&id)?;
                Some(BackupEvent::Expired {
                    message_id: id,
                    recipient: entry.recipient,
                })
            })
            .collect()
    }

    /// Iterate all held entries.
    pub fn entries(&self) -> impl Iterator<Item = &BackupEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn remove(&mut self, message_id: &str) -> Option<BackupEntry> {
        let entry = self.entries.remove(message_id)?;
        if let Some(ids) = self.by_recipient.get_mut(&entry.recipient) {
            ids.remove(message_id);
            if ids.is_empty() {
                self.by_recipient.remove(&entry.recipient);
            }
        }
        Some(entry)
    }

    /// At capacity: drop the entry closest to its expiry — it was going
    /// to die soonest anyway.
    fn evict_soonest_expiring(&mut self) {
        if let Some(id) = self
            .entries
            .values()
            .min_by_key(|e| e.expires_at)
            .map(|e| e.message_id.clone())
        {
            self.remove(&id);
        }
    }
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new()
    }
}

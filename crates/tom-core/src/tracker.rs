/// Message lifecycle tracker for the ToM core.
///
/// Tracks the status pipeline: Pending → Sent → Relayed → Delivered → Read.
/// Status is monotonically increasing — no regression, ever. Spurious or
/// out-of-order updates are ignored, which makes ACK handling idempotent.
///
/// Pure logic, no I/O. The runtime feeds events (ACKs, read receipts) and
/// the tracker reports transitions for the application.
use std::collections::HashMap;

use crate::types::{MessageStatus, NodeId, MESSAGE_TTL_MS};

/// Maximum number of tracked messages (DoS protection).
const MAX_TRACKED: usize = 10_000;

/// A status transition event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: String,
    pub previous: MessageStatus,
    pub current: MessageStatus,
}

/// Tracking entry for a single outbound message.
#[derive(Debug, Clone)]
pub struct TrackedMessage {
    pub recipient: NodeId,
    pub status: MessageStatus,
    pub created_at: u64,
    /// Unix ms at which each status was first reached.
    pub state_timestamps: Vec<(MessageStatus, u64)>,
}

/// Tracks outbound message lifecycle from send to read receipt.
pub struct MessageTracker {
    messages: HashMap<String, TrackedMessage>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self {
            messages: HashMap::new(),
        }
    }

    /// Start tracking a new outgoing message.
    ///
    /// Returns `false` if the tracker is at capacity even after eviction.
    pub fn track(&mut self, message_id: String, recipient: NodeId, now: u64) -> bool {
        if self.messages.len() >= MAX_TRACKED {
            self.evict_expired(now);
            if self.messages.len() >= MAX_TRACKED {
                return false;
            }
        }

        self.messages.insert(
            message_id,
            TrackedMessage {
                recipient,
                status: MessageStatus::Pending,
                created_at: now,
                state_timestamps: vec![(MessageStatus::Pending, now)],
            },
        );
        true
    }

    pub fn mark_sent(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Sent, now)
    }

    pub fn mark_relayed(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Relayed, now)
    }

    pub fn mark_delivered(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Delivered, now)
    }

    pub fn mark_read(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Read, now)
    }

    /// Current status of a tracked message.
    pub fn status(&self, message_id: &str) -> Option<MessageStatus> {
        self.messages.get(message_id).map(|m| m.status)
    }

    /// Full entry for a tracked message.
    pub fn get(&self, message_id: &str) -> Option<&TrackedMessage> {
        self.messages.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove a message from tracking.
    pub fn remove(&mut self, message_id: &str) -> bool {
        self.messages.remove(message_id).is_some()
    }

    /// Evict entries older than 24 h, plus anything already Read — a read
    /// message has nothing left to report.
    pub fn evict_expired(&mut self, now: u64) {
        self.messages.retain(|_, m| {
            m.status != MessageStatus::Read
                && now.saturating_sub(m.created_at) < MESSAGE_TTL_MS
        });
    }

    // ── Internal ───────────────────────────────────────────────────────

    /// Advance a message to a new status. Only forward transitions apply.
    fn advance(&mut self, message_id: &str, new_status: MessageStatus, now: u64) -> Option<StatusChange> {
        let entry = self.messages.get_mut(message_id)?;

        if new_status <= entry.status {
            return None;
        }

        let previous = entry.status;
        entry.status = new_status;
        entry.state_timestamps.push((new_status, now));

        Some(StatusChange {
            message_id: message_id.to_string(),
            previous,
            current: new_status,
        })
    }
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub-side duties for group messaging.
///
/// Runs on whichever member the election currently points at. Pure state
/// machine: rate limiting per sender, fan-out dedup, target computation.
/// The runtime builds the actual envelopes from the returned targets.
use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::CoreError;
use crate::group::types::{Group, GroupId};
use crate::types::NodeId;

/// Bound on the fan-out dedup cache.
const MAX_SEEN_MESSAGES: usize = 10_000;

/// Rate window length (1 second).
const RATE_WINDOW_MS: u64 = 1_000;

/// Stale rate windows are pruned after this long.
const RATE_ENTRY_TTL_MS: u64 = 60_000;

/// Hub-side state for all groups this node currently hubs.
pub struct GroupHub {
    local_id: NodeId,
    /// Messages per second allowed per sender per group.
    rate_limit_per_second: u32,
    /// (group, sender) → (window start, count in window).
    rate_windows: HashMap<(GroupId, NodeId), (u64, u32)>,
    /// Fan-out dedup: "group:message_id" seen already.
    seen_messages: LruCache<String, ()>,
}

impl GroupHub {
    pub fn new(local_id: NodeId, rate_limit_per_second: u32) -> Self {
        Self {
            local_id,
            rate_limit_per_second,
            rate_windows: HashMap::new(),
            seen_messages: LruCache::new(
                NonZeroUsize::new(MAX_SEEN_MESSAGES).expect("cache size is non-zero"),
            ),
        }
    }

    /// Check the per-sender rate limit. Counts the message on success.
    pub fn check_rate(
        &mut self,
        group_id: &GroupId,
        sender: NodeId,
        now: u64,
    ) -> Result<(), CoreError> {
        let entry = self
            .rate_windows
            .entry((group_id.clone(), sender))
            .or_insert((now, 0));

        if now.saturating_sub(entry.0) >= RATE_WINDOW_MS {
            *entry = (now, 0);
        }

        if entry.1 >= self.rate_limit_per_second {
            return Err(CoreError::RateLimited(format!(
                "{} msg/s per sender in {group_id}",
                self.rate_limit_per_second
            )));
        }
        entry.1 += 1;
        Ok(())
    }

    /// Register a message for fan-out. Returns false if this
    /// (group, message) was already fanned out — members must receive a
    /// given group message at most once.
    pub fn register_message(&mut self, group_id: &GroupId, message_id: &str) -> bool {
        let key = format!("{group_id}:{message_id}");
        if self.seen_messages.contains(&key) {
            return false;
        }
        self.seen_messages.put(key, ());
        true
    }

    /// Members that receive a fan-out copy: everyone except the original
    /// sender and the hub itself.
    pub fn fan_out_targets(&self, group: &Group, sender: NodeId) -> Vec<NodeId> {
        group
            .members
            .iter()
            .filter(|&&m| m != sender && m != self.local_id)
            .copied()
            .collect()
    }

    /// Drop rate windows that have been idle for a minute.
    pub fn cleanup(&mut self, now: u64) {
        self.rate_windows
            .retain(|_, (start, _)| now.saturating_sub(*start) < RATE_ENTRY_TTL_MS);
    }
}

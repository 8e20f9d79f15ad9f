/// Group data structures for the ToM core.
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{MessageType, NodeId};

/// Maximum members per group.
pub const MAX_GROUP_MEMBERS: usize = 50;

/// Invite TTL (24 hours — nothing in ToM outlives a day).
pub const INVITE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Hub heartbeat interval (30 seconds).
pub const HUB_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Missed hub heartbeats before members re-elect.
pub const HUB_MISSED_BEATS_LIMIT: u32 = 3;

/// Rate limit: group messages per second per sender at the hub.
pub const GROUP_RATE_LIMIT_PER_SECOND: u32 = 2;

/// Unique group identifier ("grp-<uuid>").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new() -> Self {
        Self(format!("grp-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shared group state.
///
/// The member set is a `BTreeSet` so every node iterates members in the
/// same (byte-lexicographic) order — the hub election depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    pub name: String,
    /// Creator. The group dissolves when the owner leaves.
    pub owner: NodeId,
    pub members: BTreeSet<NodeId>,
    /// Bumped on every membership change.
    pub epoch: u64,
    pub created_at: u64,
    pub last_activity: u64,
}

impl Group {
    pub fn is_member(&self, node_id: &NodeId) -> bool {
        self.members.contains(node_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_GROUP_MEMBERS
    }
}

// ── Wire payloads ────────────────────────────────────────────────────────

/// `MessageType::GroupInvite` — creator → invitee, carries the full group
/// snapshot so the invitee can join without another round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInvitePayload {
    pub group: Group,
    pub inviter: NodeId,
    pub inviter_username: String,
}

/// `MessageType::GroupInviteAck` — invitee → inviter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInviteAckPayload {
    pub group_id: GroupId,
    pub accepted: bool,
}

/// `MessageType::GroupJoin` — joining member → hub, and hub → members
/// (rebroadcast so every spoke updates its member set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupJoinPayload {
    pub group_id: GroupId,
    pub member: NodeId,
    pub username: String,
}

/// `MessageType::GroupLeave` — leaving member → hub, rebroadcast by hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupLeavePayload {
    pub group_id: GroupId,
    pub member: NodeId,
}

/// `MessageType::GroupMessage` — member → hub, then hub → each member.
///
/// `message_id` stays stable across the fan-out so the hub and members can
/// deduplicate; the carrying envelopes get fresh ids per copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessagePayload {
    pub group_id: GroupId,
    pub message_id: String,
    pub sender: NodeId,
    pub sender_username: String,
    pub sent_at: u64,
    pub body: Vec<u8>,
}

/// `MessageType::GroupHubHeartbeat` — hub → members every 30 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupHubHeartbeatPayload {
    pub group_id: GroupId,
    pub epoch: u64,
    pub member_count: usize,
}

// ── Manager outputs ──────────────────────────────────────────────────────

/// Group-level events surfaced to the application.
#[derive(Debug, Clone)]
pub enum GroupEvent {
    GroupCreated {
        group: Group,
    },
    InviteReceived {
        group_id: GroupId,
        group_name: String,
        inviter: NodeId,
        inviter_username: String,
    },
    GroupJoined {
        group_id: GroupId,
        group_name: String,
    },
    MemberJoined {
        group_id: GroupId,
        member: NodeId,
        username: String,
    },
    MemberLeft {
        group_id: GroupId,
        member: NodeId,
    },
    MessageReceived {
        group_id: GroupId,
        message_id: String,
        sender: NodeId,
        sender_username: String,
        sent_at: u64,
        body: Vec<u8>,
    },
    HubChanged {
        group_id: GroupId,
        old_hub: Option<NodeId>,
        new_hub: NodeId,
    },
    GroupDissolved {
        group_id: GroupId,
    },
}

/// Actions returned by the group state machines; the runtime turns `Send`
/// into signed (and encrypted) envelopes.
#[derive(Debug, Clone)]
pub enum GroupAction {
    Send {
        to: NodeId,
        msg_type: MessageType,
        payload: Vec<u8>,
    },
    Event(GroupEvent),
}

/// GroupManager — member-side group state machine.
///
/// Pure decision engine: no I/O. Returns `Vec<GroupAction>` that the
/// runtime turns into signed envelopes and application events.
///
/// Tracks: groups we belong to, pending invites, per-group hub watch
/// (who we last heard a hub heartbeat from, and when).
use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::CoreError;
use crate::group::election::elect_hub;
use crate::group::types::*;
use crate::topology::Topology;
use crate::types::{MessageType, NodeId};

/// Bound on the member-side message dedup cache.
const MAX_SEEN_MESSAGES: usize = 10_000;

struct PendingInvite {
    payload: GroupInvitePayload,
    expires_at: u64,
}

struct HubWatch {
    known_hub: Option<NodeId>,
    last_beat: u64,
}

/// Member-side group state.
pub struct GroupManager {
    local_id: NodeId,
    username: String,
    groups: HashMap<GroupId, Group>,
    pending_invites: HashMap<GroupId, PendingInvite>,
    hub_watch: HashMap<GroupId, HubWatch>,
    /// Dedup for delivered group messages: "group:message_id".
    seen_messages: LruCache<String, ()>,
}

impl GroupManager {
    pub fn new(local_id: NodeId, username: String) -> Self {
        Self {
            local_id,
            username,
            groups: HashMap::new(),
            pending_invites: HashMap::new(),
            hub_watch: HashMap::new(),
            seen_messages: LruCache::new(
                NonZeroUsize::new(MAX_SEEN_MESSAGES).expect("cache size is non-zero"),
            ),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn get(&self, group_id: &GroupId) -> Option<&Group> {
        self.groups.get(group_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn pending_invite_count(&self) -> usize {
        self.pending_invites.len()
    }

    /// The current hub for a group, per the deterministic election.
    pub fn current_hub(&self, group_id: &GroupId, topology: &Topology) -> Option<NodeId> {
        elect_hub(self.groups.get(group_id)?, topology, self.local_id)
    }

    /// Whether the local node is the hub for this group right now.
    pub fn is_hub(&self, group_id: &GroupId, topology: &Topology) -> bool {
        self.current_hub(group_id, topology) == Some(self.local_id)
    }

    /// Member-side dedup: returns true the first time a (group, message)
    /// pair is seen.
    pub fn register_incoming_message(&mut self, group_id: &GroupId, message_id: &str) -> bool {
        let key = format!("{group_id}:{message_id}");
        if self.seen_messages.contains(&key) {
            return false;
        }
        self.seen_messages.put(key, ());
        true
    }

    // ── Creation ─────────────────────────────────────────────────────────

    /// Create a new group with the caller as owner.
    ///
    /// Initial members are part of the group immediately and receive a
    /// `GroupInvite` over the 1-to-1 layer; an invitee that never accepts
    /// simply never shows up.
    pub fn create_group(
        &mut self,
        name: String,
        initial_members: Vec<NodeId>,
        now: u64,
    ) -> Vec<GroupAction> {
        let mut members: std::collections::BTreeSet<NodeId> =
            initial_members.into_iter().collect();
        members.insert(self.local_id);

        let group = Group {
            group_id: GroupId::new(),
            name,
            owner: self.local_id,
            members,
            epoch: 0,
            created_at: now,
            last_activity: now,
        };

        let invite = GroupInvitePayload {
            group: group.clone(),
            inviter: self.local_id,
            inviter_username: self.username.clone(),
        };
        let invite_bytes =
            rmp_serde::to_vec(&invite).expect("GroupInvitePayload serialization cannot fail");

        let mut actions: Vec<GroupAction> = group
            .members
            .iter()
            .filter(|&&m| m != self.local_id)
            .map(|&member| GroupAction::Send {
                to: member,
                msg_type: MessageType::GroupInvite,
                payload: invite_bytes.clone(),
            })
            .collect();

        self.hub_watch.insert(
            group.group_id.clone(),
            HubWatch {
                known_hub: None,
                last_beat: now,
            },
        );
        actions.push(GroupAction::Event(GroupEvent::GroupCreated {
            group: group.clone(),
        }));
        self.groups.insert(group.group_id.clone(), group);

        actions
    }

    // ── Invitations ──────────────────────────────────────────────────────

    /// Handle an incoming invitation.
    pub fn handle_invite(&mut self, payload: GroupInvitePayload, now: u64) -> Vec<GroupAction> {
        let group_id = payload.group.group_id.clone();
        if self.groups.contains_key(&group_id) || self.pending_invites.contains_key(&group_id) {
            return vec![];
        }

        let event = GroupEvent::InviteReceived {
            group_id: group_id.clone(),
            group_name: payload.group.name.clone(),
            inviter: payload.inviter,
            inviter_username: payload.inviter_username.clone(),
        };
        self.pending_invites.insert(
            group_id,
            PendingInvite {
                payload,
                expires_at: now + INVITE_TTL_MS,
            },
        );
        vec![GroupAction::Event(event)]
    }

    /// Accept a pending invitation: join the group, ack the inviter,
    /// announce the join to the hub.
    pub fn accept_invite(
        &mut self,
        group_id: &GroupId,
        topology: &Topology,
        now: u64,
    ) -> Result<Vec<GroupAction>, CoreError> {
        let invite = self
            .pending_invites
            .remove(group_id)
            .ok_or_else(|| CoreError::GroupUnknown {
                group_id: group_id.to_string(),
            })?;
        if now >= invite.expires_at {
            return Err(CoreError::GroupUnknown {
                group_id: group_id.to_string(),
            });
        }

        let mut group = invite.payload.group;
        group.members.insert(self.local_id);
        group.last_activity = now;

        let mut actions = vec![GroupAction::Send {
            to: invite.payload.inviter,
            msg_type: MessageType::GroupInviteAck,
            payload: rmp_serde::to_vec(&GroupInviteAckPayload {
                group_id: group_id.clone(),
                accepted: true,
            })
            .expect("GroupInviteAckPayload serialization cannot fail"),
        }];

        let join = GroupJoinPayload {
            group_id: group_id.clone(),
            member: self.local_id,
            username: self.username.clone(),
        };
        let join_bytes =
            rmp_serde::to_vec(&join).expect("GroupJoinPayload serialization cannot fail");

        match elect_hub(&group, topology, self.local_id) {
            Some(hub) if hub != self.local_id => {
                actions.push(GroupAction::Send {
                    to: hub,
                    msg_type: MessageType::GroupJoin,
                    payload: join_bytes,
                });
            }
            _ => {
                // We are the hub (or nobody is reachable) — tell the other
                // members directly.
                for &member in group.members.iter().filter(|&&m| m != self.local_id) {
                    actions.push(GroupAction::Send {
                        to: member,
                        msg_type: MessageType::GroupJoin,
                        payload: join_bytes.clone(),
                    });
                }
            }
        }

        actions.push(GroupAction::Event(GroupEvent::GroupJoined {
            group_id: group_id.clone(),
            group_name: group.name.clone(),
        }));

        self.hub_watch.insert(
            group_id.clone(),
            HubWatch {
                known_hub: None,
                last_beat: now,
            },
        );
        self.groups.insert(group_id.clone(), group);
        Ok(actions)
    }

    /// Handle an invite ack. A decline removes the invitee from our view
    /// of the member set.
    pub fn handle_invite_ack(
        &mut self,
        payload: GroupInviteAckPayload,
        from: NodeId,
    ) -> Vec<GroupAction> {
        if payload.accepted {
            return vec![]; // the GroupJoin will carry the news
        }
        let Some(group) = self.groups.get_mut(&payload.group_id) else {
            return vec![];
        };
        if group.members.remove(&from) {
            group.epoch += 1;
            return vec![GroupAction::Event(GroupEvent::MemberLeft {
                group_id: payload.group_id,
                member: from,
            })];
        }
        vec![]
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Handle a join announcement (from the joiner or rebroadcast by a hub).
    pub fn handle_join(
        &mut self,
        payload: GroupJoinPayload,
        topology: &Topology,
        now: u64,
    ) -> Vec<GroupAction> {
        let Some(group) = self.groups.get_mut(&payload.group_id) else {
            return vec![];
        };
        if group.is_full() {
            tracing::debug!(group = %payload.group_id, "join ignored: group full");
            return vec![];
        }
        if !group.members.insert(payload.member) {
            return vec![]; // already known — rebroadcast echo
        }
        group.epoch += 1;
        group.last_activity = now;

        let mut actions = vec![];

        // Hub duty: spread the join to the rest of the star.
        let group = self.groups[&payload.group_id].clone();
        if elect_hub(&group, topology, self.local_id) == Some(self.local_id) {
            let bytes =
                rmp_serde::to_vec(&payload).expect("GroupJoinPayload serialization cannot fail");
            for &member in group
                .members
                .iter()
                .filter(|&&m| m != self.local_id && m != payload.member)
            {
                actions.push(GroupAction::Send {
                    to: member,
                    msg_type: MessageType::GroupJoin,
                    payload: bytes.clone(),
                });
            }
        }

        actions.push(GroupAction::Event(GroupEvent::MemberJoined {
            group_id: payload.group_id,
            member: payload.member,
            username: payload.username,
        }));
        actions
    }

    /// Leave a group we belong to.
    pub fn leave_group(
        &mut self,
        group_id: &GroupId,
        topology: &Topology,
    ) -> Result<Vec<GroupAction>, CoreError> {
        let group = self
            .groups
            .remove(group_id)
            .ok_or_else(|| CoreError::GroupUnknown {
                group_id: group_id.to_string(),
            })?;
        self.hub_watch.remove(group_id);

        let leave = GroupLeavePayload {
            group_id: group_id.clone(),
            member: self.local_id,
        };
        let bytes = rmp_serde::to_vec(&leave).expect("GroupLeavePayload serialization cannot fail");

        let mut actions = vec![];
        match elect_hub(&group, topology, self.local_id) {
            Some(hub) if hub != self.local_id => {
                actions.push(GroupAction::Send {
                    to: hub,
                    msg_type: MessageType::GroupLeave,
                    payload: bytes,
                });
            }
            _ => {
                // We were the hub — notify every remaining member directly.
                for &member in group.members.iter().filter(|&&m| m != self.local_id) {
                    actions.push(GroupAction::Send {
                        to: member,
                        msg_type: MessageType::GroupLeave,
                        payload: bytes.clone(),
                    });
                }
            }
        }
        Ok(actions)
    }

    /// Handle a leave announcement. The group dissolves when the owner
    /// leaves or the member set empties.
    pub fn handle_leave(
        &mut self,
        payload: GroupLeavePayload,
        topology: &Topology,
        now: u64,
    ) -> Vec<GroupAction> {
        let Some(group) = self.groups.get(&payload.group_id) else {
            return vec![];
        };
        if !group.is_member(&payload.member) {
            return vec![];
        }

        // Hub duty first, on the pre-leave view: spread the leave so a
        // dissolution reaches every spoke, not just us.
        let mut actions = vec![];
        if elect_hub(group, topology, self.local_id) == Some(self.local_id) {
            let bytes =
                rmp_serde::to_vec(&payload).expect("GroupLeavePayload serialization cannot fail");
            for &member in group
                .members
                .iter()
                .filter(|&&m| m != self.local_id && m != payload.member)
            {
                actions.push(GroupAction::Send {
                    to: member,
                    msg_type: MessageType::GroupLeave,
                    payload: bytes.clone(),
                });
            }
        }

        let group = self
            .groups
            .get_mut(&payload.group_id)
            .expect("checked above");
        group.members.remove(&payload.member);
        group.epoch += 1;
        group.last_activity = now;

        let owner_left = payload.member == group.owner;
        let emptied = group.members.is_empty();

        if owner_left || emptied {
            self.groups.remove(&payload.group_id);
            self.hub_watch.remove(&payload.group_id);
            actions.push(GroupAction::Event(GroupEvent::GroupDissolved {
                group_id: payload.group_id,
            }));
        } else {
            actions.push(GroupAction::Event(GroupEvent::MemberLeft {
                group_id: payload.group_id,
                member: payload.member,
            }));
        }
        actions
    }

    // ── Hub liveness ─────────────────────────────────────────────────────

    /// Record a hub heartbeat. A beat from a node other than the hub we
    /// last knew is itself a hub change.
    pub fn handle_hub_heartbeat(
        &mut self,
        payload: GroupHubHeartbeatPayload,
        from: NodeId,
        now: u64,
    ) -> Vec<GroupAction> {
        let Some(group) = self.groups.get_mut(&payload.group_id) else {
            return vec![];
        };
        if !group.is_member(&from) {
            tracing::debug!(group = %payload.group_id, "hub heartbeat from non-member ignored");
            return vec![];
        }
        group.epoch = group.epoch.max(payload.epoch);

        let watch = self
            .hub_watch
            .entry(payload.group_id.clone())
            .or_insert(HubWatch {
                known_hub: None,
                last_beat: now,
            });
        let old_hub = watch.known_hub;
        watch.last_beat = now;
        watch.known_hub = Some(from);

        if old_hub.is_some() && old_hub != Some(from) {
            return vec![GroupAction::Event(GroupEvent::HubChanged {
                group_id: payload.group_id,
                old_hub,
                new_hub: from,
            })];
        }
        vec![]
    }

    /// Periodic member-side check: a silent hub triggers re-election.
    ///
    /// Re-election is just recomputing `elect_hub` against the current
    /// presence view — the dead hub has been marked Offline by then.
    pub fn check_hub_liveness(
        &mut self,
        topology: &Topology,
        now: u64,
        heartbeat_interval_ms: u64,
    ) -> Vec<GroupAction> {
        let timeout = heartbeat_interval_ms * HUB_MISSED_BEATS_LIMIT as u64;
        let mut actions = vec![];

        for (group_id, group) in &self.groups {
            let Some(current) = elect_hub(group, topology, self.local_id) else {
                continue;
            };
            let watch = self.hub_watch.entry(group_id.clone()).or_insert(HubWatch {
                known_hub: None,
                last_beat: now,
            });

            // Hubs don't watch themselves.
            if current == self.local_id {
                watch.known_hub = Some(current);
                watch.last_beat = now;
                continue;
            }

            let stale = now.saturating_sub(watch.last_beat) > timeout;
            let changed = watch.known_hub.is_some() && watch.known_hub != Some(current);

            if stale || changed {
                let old_hub = watch.known_hub;
                watch.known_hub = Some(current);
                watch.last_beat = now;
                if old_hub != Some(current) {
                    actions.push(GroupAction::Event(GroupEvent::HubChanged {
                        group_id: group_id.clone(),
                        old_hub,
                        new_hub: current,
                    }));
                }
            }
        }
        actions
    }

    /// Drop expired invites.
    pub fn cleanup_expired_invites(&mut self, now: u64) -> usize {
        let before = self.pending_invites.len();
        self.pending_invites.retain(|_, inv| now < inv.expires_at);
        before - self.pending_invites.len()
    }
}

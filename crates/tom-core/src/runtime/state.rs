use crate::backup::{BackupAckPayload, BackupCoordinator, BackupEvent, BackupQueryPayload, BackupStorePayload, BACKUP_TTL_MS};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::gossip::{GossipInput, PeerAnnounce, RoleChangeAnnounce};
use crate::group::{
    GroupAction, GroupEvent, GroupHub, GroupHubHeartbeatPayload, GroupId, GroupInviteAckPayload,
    GroupInvitePayload, GroupJoinPayload, GroupLeavePayload, GroupManager, GroupMessagePayload,
};
use crate::heartbeat::{HeartbeatTracker, PresenceEvent};
use crate::identity::Identity;
use crate::relay::RelaySelector;
use crate::roles::{RoleAction, RoleManager};
use crate::router::{ReadReceiptPayload, RejectReason, Router, RoutingAction};
use crate::subnet::{EphemeralSubnets, SubnetAnnounce, SubnetEvent};
use crate::topology::{PeerInfo, PeerRole, PeerStatus, Topology};
use crate::tracker::{MessageTracker, StatusChange};
use crate::types::{now_ms, MessageStatus, MessageType, NodeId};

use super::effect::RuntimeEffect;
use super::{DeliveredMessage, ErrorKind, ProtocolEvent, RuntimeCommand, RuntimeConfig};

/// Etat complet du protocole — logique pure, zero async, zero reseau.
///
/// Chaque methode handle_* / tick_* retourne Vec<RuntimeEffect>.
/// Aucune methode ne touche au reseau ni aux channels : c'est la boucle
/// qui execute les effets. Un seul proprietaire, pas de lock.
pub struct RuntimeState {
    pub local_id: NodeId,
    pub(crate) secret_seed: [u8; 32],
    pub config: RuntimeConfig,

    // Protocol modules
    pub router: Router,
    pub relay_selector: RelaySelector,
    pub topology: Topology,
    pub tracker: MessageTracker,
    pub heartbeat: HeartbeatTracker,

    // Group
    pub groups: GroupManager,
    pub group_hub: GroupHub,

    // Backup
    pub backup: BackupCoordinator,

    // Discovery
    pub subnets: EphemeralSubnets,
    pub roles: RoleManager,
    pub local_roles: Vec<PeerRole>,
}

impl RuntimeState {
    /// Creer un nouvel etat de protocole pour cette identite.
    pub fn new(identity: &Identity, config: RuntimeConfig) -> Self {
        let local_id = identity.node_id();
        Self {
            router: Router::with_dedup_ttl(local_id, config.dedup_cache_ttl.as_millis() as u64),
            relay_selector: RelaySelector::new(local_id),
            topology: Topology::new(),
            tracker: MessageTracker::new(),
            heartbeat: HeartbeatTracker::new(
                config.heartbeat_offline_threshold.as_millis() as u64,
                config.heartbeat_send_interval.as_millis() as u64,
            ),
            groups: GroupManager::new(local_id, config.username.clone()),
            group_hub: GroupHub::new(local_id, config.group_send_rate_limit),
            backup: BackupCoordinator::new(local_id),
            subnets: EphemeralSubnets::new(local_id),
            roles: RoleManager::with_thresholds(local_id, config.role_thresholds),
            local_roles: vec![PeerRole::Peer],
            local_id,
            secret_seed: identity.seed(),
            config,
        }
    }

    /// Topology snapshot for query commands.
    pub fn topology_snapshot(&self) -> Vec<PeerInfo> {
        self.topology.peers().cloned().collect()
    }

    // ── Incoming frames ──────────────────────────────────────────────────

    /// Handle one inbound `(peer, bytes)` frame from the transport.
    pub fn handle_incoming(&mut self, from: NodeId, bytes: &[u8]) -> Vec<RuntimeEffect> {
        let now = now_ms();

        let envelope = match Envelope::from_bytes(bytes) {
            Ok(env) => env,
            Err(_) => {
                self.record_violation(from, "malformed envelope");
                return vec![];
            }
        };
        let env_from = envelope.from;

        self.note_alive(from, now);

        let action = self.router.route(
            envelope,
            &mut self.relay_selector,
            &self.topology,
            &self.subnets,
            now,
        );

        if !matches!(action, RoutingAction::Reject { .. }) && env_from != from {
            self.note_alive(env_from, now);
        }

        let mut effects = vec![];

        match action {
            RoutingAction::Deliver { envelope, ack } => {
                effects.extend(self.deliver(envelope, ack, from, now));
            }
            RoutingAction::Ack {
                message_id,
                kind,
                from: acker,
            } => {
                let change = match kind {
                    crate::router::AckKind::Relayed => {
                        self.roles.record_relay(acker, now);
                        self.tracker.mark_relayed(&message_id, now)
                    }
                    crate::router::AckKind::Delivered => {
                        self.tracker.mark_delivered(&message_id, now)
                    }
                };
                if let Some(change) = change {
                    effects.push(RuntimeEffect::StatusChange(change));
                }
            }
            RoutingAction::ReadReceipt {
                message_id,
                read_at,
                ..
            } => {
                if let Some(change) = self.tracker.mark_read(&message_id, read_at) {
                    effects.push(RuntimeEffect::StatusChange(change));
                }
            }
            RoutingAction::Forward { envelope, next_hop } => {
                self.roles.record_relay(self.local_id, now);
                self.subnets
                    .record_communication(envelope.from, envelope.to, now);
                tracing::debug!(id = %envelope.id, next = ?next_hop, "forwarding envelope");
                effects.push(RuntimeEffect::SendEnvelopeTo {
                    target: next_hop,
                    envelope,
                });
            }
            RoutingAction::Reject { reason } => {
                self.record_violation(from, reject_detail(reason));
            }
            RoutingAction::Drop { reason } => {
                tracing::debug!(?reason, "dropped inbound envelope");
            }
        }

        effects
    }

    /// Dispatch a verified envelope addressed to us.
    fn deliver(
        &mut self,
        mut envelope: Envelope,
        ack: Envelope,
        transport_from: NodeId,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let was_encrypted = envelope.encrypted;
        if envelope.encrypted && envelope.decrypt_payload(&self.secret_seed).is_err() {
            self.record_violation(envelope.from, reject_detail(RejectReason::DecryptionFailed));
            return vec![];
        }

        self.subnets
            .record_communication(envelope.from, self.local_id, now);

        let mut effects = vec![];
        match envelope.msg_type {
            MessageType::Chat => {
                effects.push(RuntimeEffect::DeliverMessage(DeliveredMessage {
                    from: envelope.from,
                    payload: envelope.payload.clone(),
                    envelope_id: envelope.id.clone(),
                    timestamp: envelope.timestamp,
                    was_encrypted,
                    signature_valid: true,
                    received_at: now,
                }));

                let mut ack = ack;
                ack.ttl = self.config.initial_envelope_ttl;
                ack.sign(&self.secret_seed);
                effects.push(RuntimeEffect::SendEnvelope(ack));

                // Came through an intermediary: it may be a backup holder
                // replaying a stored message. A plain relay ignores the ack.
                if transport_from != envelope.from {
                    let payload = BackupAckPayload {
                        message_id: envelope.id.clone(),
                    }
                    .to_bytes();
                    if let Ok(env) =
                        self.build_signed(transport_from, MessageType::BackupAck, payload, false, now)
                    {
                        effects.push(RuntimeEffect::SendEnvelopeTo {
                            target: transport_from,
                            envelope: env,
                        });
                    }
                }
            }

            MessageType::Heartbeat => {
                // Presence already recorded in handle_incoming.
            }

            MessageType::PeerAnnounce => match PeerAnnounce::from_bytes(&envelope.payload) {
                Ok(announce) if announce.is_timestamp_valid(now) => {
                    effects.extend(self.apply_peer_announce(announce, now));
                }
                Ok(_) => tracing::debug!("peer announce outside clock drift window"),
                Err(_) => self.record_violation(envelope.from, "malformed peer announce"),
            },

            MessageType::GroupInvite => match rmp_serde::from_slice::<GroupInvitePayload>(&envelope.payload) {
                Ok(payload) => {
                    let actions = self.groups.handle_invite(payload, now);
                    effects.extend(self.group_actions_to_effects(actions, now));
                }
                Err(_) => self.record_violation(envelope.from, "malformed group invite"),
            },

            MessageType::GroupInviteAck => {
                match rmp_serde::from_slice::<GroupInviteAckPayload>(&envelope.payload) {
                    Ok(payload) => {
                        let actions = self.groups.handle_invite_ack(payload, envelope.from);
                        effects.extend(self.group_actions_to_effects(actions, now));
                    }
                    Err(_) => self.record_violation(envelope.from, "malformed group invite ack"),
                }
            }

            MessageType::GroupJoin => match rmp_serde::from_slice::<GroupJoinPayload>(&envelope.payload) {
                Ok(payload) => {
                    let actions = self.groups.handle_join(payload, &self.topology, now);
                    effects.extend(self.group_actions_to_effects(actions, now));
                }
                Err(_) => self.record_violation(envelope.from, "malformed group join"),
            },

            MessageType::GroupLeave => match rmp_serde::from_slice::<GroupLeavePayload>(&envelope.payload) {
                Ok(payload) => {
                    let actions = self.groups.handle_leave(payload, &self.topology, now);
                    effects.extend(self.group_actions_to_effects(actions, now));
                }
                Err(_) => self.record_violation(envelope.from, "malformed group leave"),
            },

            MessageType::GroupMessage => {
                effects.extend(self.handle_group_message_envelope(envelope.from, &envelope.payload, now));
            }

            MessageType::GroupHubHeartbeat => {
                match rmp_serde::from_slice::<GroupHubHeartbeatPayload>(&envelope.payload) {
                    Ok(payload) => {
                        let actions = self.groups.handle_hub_heartbeat(payload, envelope.from, now);
                        effects.extend(self.group_actions_to_effects(actions, now));
                    }
                    Err(_) => self.record_violation(envelope.from, "malformed hub heartbeat"),
                }
            }

            MessageType::BackupStore => match BackupStorePayload::from_bytes(&envelope.payload) {
                Ok(payload) => {
                    let events = self.backup.handle_store(&payload, envelope.from, now);
                    if !events.is_empty() {
                        self.roles.record_backup_served(self.local_id, now);
                        tracing::debug!(id = %payload.message_id, "holding backup entry");
                    }
                }
                Err(_) => self.record_violation(envelope.from, "malformed backup store"),
            },

            MessageType::BackupAck => match BackupAckPayload::from_bytes(&envelope.payload) {
                Ok(payload) => {
                    let (events, propagate) = self.backup.handle_ack(&payload.message_id, envelope.from);
                    for event in events {
                        if let BackupEvent::Delivered { message_id, .. } = event {
                            effects.push(RuntimeEffect::Emit(ProtocolEvent::BackupDelivered {
                                message_id,
                            }));
                        }
                    }
                    let bytes = payload.to_bytes();
                    for target in propagate {
                        if let Ok(env) =
                            self.build_signed(target, MessageType::BackupAck, bytes.clone(), false, now)
                        {
                            effects.push(RuntimeEffect::SendEnvelope(env));
                        }
                    }
                }
                Err(_) => self.record_violation(envelope.from, "malformed backup ack"),
            },

            MessageType::BackupQuery => match BackupQueryPayload::from_bytes(&envelope.payload) {
                Ok(query) => {
                    for (_, bytes) in self.backup.entries_for(&query.recipient) {
                        if let Ok(env) = Envelope::from_bytes(&bytes) {
                            effects.push(RuntimeEffect::SendEnvelopeTo {
                                target: query.recipient,
                                envelope: env,
                            });
                        }
                    }
                }
                Err(_) => self.record_violation(envelope.from, "malformed backup query"),
            },

            MessageType::SubnetAnnounce => match rmp_serde::from_slice::<SubnetAnnounce>(&envelope.payload) {
                Ok(announce) => self.subnets.observe_announce(&announce, now),
                Err(_) => self.record_violation(envelope.from, "malformed subnet announce"),
            },

            MessageType::RoleAssignment => match RoleChangeAnnounce::from_bytes(&envelope.payload) {
                Ok(announce) => {
                    if !announce.verify_signature() || announce.node_id != envelope.from {
                        self.record_violation(envelope.from, "forged role assignment");
                    } else {
                        effects.extend(self.apply_role_announce(announce, now));
                    }
                }
                Err(_) => self.record_violation(envelope.from, "malformed role assignment"),
            },

            // The router turns these into dedicated actions before deliver.
            MessageType::Ack | MessageType::ReadReceipt => {}
        }

        effects
    }

    // ── Outbound sends ───────────────────────────────────────────────────

    /// Build, encrypt and sign a chat envelope, with backup fallback.
    pub fn handle_send_message(&mut self, to: NodeId, payload: Vec<u8>) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let envelope = match self.build_signed(to, MessageType::Chat, payload, true, now) {
            Ok(env) => env,
            Err(e) => return vec![error_effect(ErrorKind::SendFailed, e.to_string())],
        };

        self.tracker.track(envelope.id.clone(), to, now);

        let on_success = vec![RuntimeEffect::StatusChange(StatusChange {
            message_id: envelope.id.clone(),
            previous: MessageStatus::Pending,
            current: MessageStatus::Sent,
        })];
        let on_failure = self.backup_fallback_effects(&envelope, to, now);

        vec![RuntimeEffect::SendWithBackupFallback {
            envelope,
            on_success,
            on_failure,
        }]
    }

    /// The plan B executed when the transport send fails: hand the
    /// envelope to backup peers and tell the application.
    fn backup_fallback_effects(
        &mut self,
        envelope: &Envelope,
        to: NodeId,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let replicas =
            self.backup
                .select_replicas(&self.topology, to, self.config.backup_replica_count);
        if replicas.is_empty() {
            return vec![error_effect(
                ErrorKind::SendFailed,
                format!("send to {to:?} failed and no backup peers are available"),
            )];
        }

        let Ok(envelope_bytes) = envelope.to_bytes() else {
            return vec![error_effect(ErrorKind::Internal, "envelope serialization failed".into())];
        };

        let store = BackupStorePayload {
            message_id: envelope.id.clone(),
            recipient: to,
            sender: self.local_id,
            envelope_bytes,
            expires_at: now + BACKUP_TTL_MS,
            replicas: replicas.clone(),
        };
        let store_bytes = store.to_bytes();

        let mut effects = vec![];
        for &replica in &replicas {
            if let Ok(env) =
                self.build_signed(replica, MessageType::BackupStore, store_bytes.clone(), true, now)
            {
                effects.push(RuntimeEffect::SendEnvelope(env));
            }
        }
        effects.push(RuntimeEffect::Emit(ProtocolEvent::BackupStored {
            message_id: envelope.id.clone(),
            replicas,
        }));
        effects
    }

    /// Send a read receipt for a message we received earlier.
    pub fn handle_send_read_receipt(&mut self, to: NodeId, message_id: String) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let payload = ReadReceiptPayload {
            message_id,
            read_at: now,
        }
        .to_bytes();
        match self.build_signed(to, MessageType::ReadReceipt, payload, false, now) {
            Ok(env) => vec![RuntimeEffect::SendEnvelope(env)],
            Err(e) => vec![error_effect(ErrorKind::SendFailed, e.to_string())],
        }
    }

    /// Send a group message: fan out if we are the hub, else hand it to
    /// the hub. Fan-out copies are encrypted per member.
    pub fn handle_send_group_message(&mut self, group_id: GroupId, text: String) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let Some(group) = self.groups.get(&group_id).cloned() else {
            return vec![error_effect(
                ErrorKind::GroupUnknown,
                format!("unknown group {group_id}"),
            )];
        };
        let Some(hub) = self.groups.current_hub(&group_id, &self.topology) else {
            return vec![error_effect(
                ErrorKind::Unroutable,
                format!("no reachable hub for {group_id}"),
            )];
        };

        let payload = GroupMessagePayload {
            group_id: group_id.clone(),
            message_id: uuid::Uuid::new_v4().to_string(),
            sender: self.local_id,
            sender_username: self.config.username.clone(),
            sent_at: now,
            body: text.into_bytes(),
        };
        let bytes =
            rmp_serde::to_vec(&payload).expect("GroupMessagePayload serialization cannot fail");

        if hub == self.local_id {
            if let Err(e) = self.group_hub.check_rate(&group_id, self.local_id, now) {
                return vec![error_effect(ErrorKind::RateLimited, e.to_string())];
            }
            self.group_hub.register_message(&group_id, &payload.message_id);
            self.groups
                .register_incoming_message(&group_id, &payload.message_id);

            let targets = self.group_hub.fan_out_targets(&group, self.local_id);
            let mut effects = vec![];
            for target in targets {
                match self.build_signed(target, MessageType::GroupMessage, bytes.clone(), true, now)
                {
                    Ok(env) => effects.push(RuntimeEffect::SendEnvelope(env)),
                    Err(e) => effects.push(error_effect(ErrorKind::SendFailed, e.to_string())),
                }
            }
            effects
        } else {
            match self.build_signed(hub, MessageType::GroupMessage, bytes, true, now) {
                Ok(env) => vec![RuntimeEffect::SendEnvelope(env)],
                Err(e) => vec![error_effect(ErrorKind::SendFailed, e.to_string())],
            }
        }
    }

    /// Inbound `GroupMessage` envelope: hub submission or fan-out copy.
    fn handle_group_message_envelope(
        &mut self,
        envelope_from: NodeId,
        payload_bytes: &[u8],
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let Ok(payload) = rmp_serde::from_slice::<GroupMessagePayload>(payload_bytes) else {
            self.record_violation(envelope_from, "malformed group message");
            return vec![];
        };
        let group_id = payload.group_id.clone();
        let Some(group) = self.groups.get(&group_id).cloned() else {
            tracing::debug!(group = %group_id, "group message for unknown group");
            return vec![];
        };
        if !group.is_member(&payload.sender) {
            self.record_violation(envelope_from, "group message from non-member");
            return vec![];
        }

        let mut effects = vec![];

        // Hub duty: a submission straight from the sender gets fanned out.
        let is_submission =
            self.groups.is_hub(&group_id, &self.topology) && envelope_from == payload.sender;
        if is_submission {
            if let Err(e) = self.group_hub.check_rate(&group_id, payload.sender, now) {
                self.record_violation(envelope_from, "group rate limit exceeded");
                return vec![error_effect(ErrorKind::RateLimited, e.to_string())];
            }
            if !self.group_hub.register_message(&group_id, &payload.message_id) {
                return vec![]; // already fanned out
            }
            let bytes =
                rmp_serde::to_vec(&payload).expect("GroupMessagePayload serialization cannot fail");
            let targets = self.group_hub.fan_out_targets(&group, payload.sender);
            for target in targets {
                if let Ok(env) =
                    self.build_signed(target, MessageType::GroupMessage, bytes.clone(), true, now)
                {
                    effects.push(RuntimeEffect::SendEnvelope(env));
                }
            }
        }

        // Local delivery, at most once per (group, message).
        if payload.sender != self.local_id
            && self
                .groups
                .register_incoming_message(&group_id, &payload.message_id)
        {
            effects.push(RuntimeEffect::Emit(ProtocolEvent::GroupMessage {
                group_id,
                message_id: payload.message_id,
                sender: payload.sender,
                sender_username: payload.sender_username,
                sent_at: payload.sent_at,
                body: payload.body,
            }));
        }

        effects
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Handle an application command. Queries and shutdown are resolved by
    /// the loop before reaching here.
    pub fn handle_command(&mut self, cmd: RuntimeCommand) -> Vec<RuntimeEffect> {
        let now = now_ms();
        match cmd {
            RuntimeCommand::Connect => vec![],
            RuntimeCommand::SendMessage { to, payload } => self.handle_send_message(to, payload),
            RuntimeCommand::SendReadReceipt { to, message_id } => {
                self.handle_send_read_receipt(to, message_id)
            }
            RuntimeCommand::AddPeer(info) => {
                if self.topology.get(&info.node_id).is_some() {
                    return vec![];
                }
                self.heartbeat.record(info.node_id, now);
                let node_id = info.node_id;
                self.topology.upsert(info);
                vec![RuntimeEffect::Emit(ProtocolEvent::PeerOnline { node_id })]
            }
            RuntimeCommand::UpsertPeer(info) => {
                let is_new = self.topology.get(&info.node_id).is_none();
                self.heartbeat.record(info.node_id, now);
                let node_id = info.node_id;
                self.topology.upsert(info);
                if is_new {
                    vec![RuntimeEffect::Emit(ProtocolEvent::PeerOnline { node_id })]
                } else {
                    vec![]
                }
            }
            RuntimeCommand::RemovePeer(node_id) => {
                if !self.topology.remove(&node_id) {
                    return vec![error_effect(
                        ErrorKind::PeerUnknown,
                        format!("unknown peer {node_id:?}"),
                    )];
                }
                self.heartbeat.untrack(&node_id);
                self.subnets.remove_node(&node_id);
                vec![]
            }
            RuntimeCommand::CreateGroup { name, members } => {
                let actions = self.groups.create_group(name, members, now);
                self.group_actions_to_effects(actions, now)
            }
            RuntimeCommand::AcceptInvite { group_id } => {
                match self.groups.accept_invite(&group_id, &self.topology, now) {
                    Ok(actions) => self.group_actions_to_effects(actions, now),
                    Err(e) => vec![error_effect(ErrorKind::GroupUnknown, e.to_string())],
                }
            }
            RuntimeCommand::LeaveGroup { group_id } => {
                match self.groups.leave_group(&group_id, &self.topology) {
                    Ok(actions) => self.group_actions_to_effects(actions, now),
                    Err(e) => vec![error_effect(ErrorKind::GroupUnknown, e.to_string())],
                }
            }
            RuntimeCommand::SendGroupMessage { group_id, text } => {
                self.handle_send_group_message(group_id, text)
            }
            // Resolved by the loop (they need the transport or a reply
            // channel, which pure state never touches).
            RuntimeCommand::Disconnect
            | RuntimeCommand::Shutdown
            | RuntimeCommand::GetTopology { .. }
            | RuntimeCommand::GetConnectedPeers { .. } => vec![],
        }
    }

    // ── Gossip ───────────────────────────────────────────────────────────

    /// Handle an input from the gossip/bootstrap channel.
    pub fn handle_gossip_event(&mut self, input: GossipInput) -> Vec<RuntimeEffect> {
        let now = now_ms();
        match input {
            GossipInput::Announce(bytes) => {
                let Ok(announce) = PeerAnnounce::from_bytes(&bytes) else {
                    tracing::debug!("undecodable gossip announce");
                    return vec![];
                };
                if announce.node_id == self.local_id || !announce.is_timestamp_valid(now) {
                    return vec![];
                }
                self.apply_peer_announce(announce, now)
            }
            GossipInput::NeighborUp(node_id) => {
                if node_id == self.local_id {
                    return vec![];
                }
                self.heartbeat.record(node_id, now);
                if self.topology.insert_if_unknown(node_id, now) {
                    return vec![RuntimeEffect::Emit(ProtocolEvent::PeerOnline { node_id })];
                }
                vec![]
            }
            GossipInput::NeighborDown(node_id) => {
                tracing::debug!(?node_id, "gossip neighbor down");
                vec![]
            }
        }
    }

    /// Build the periodic self announce for the gossip channel.
    pub fn build_gossip_announce(&self) -> Option<Vec<u8>> {
        PeerAnnounce::new(
            self.local_id,
            self.config.username.clone(),
            self.local_roles.clone(),
            now_ms(),
        )
        .to_bytes()
        .ok()
    }

    // ── Ticks ────────────────────────────────────────────────────────────

    /// Send self heartbeats and scan for presence transitions.
    pub fn tick_heartbeat(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = vec![];

        let online: Vec<NodeId> = self
            .topology
            .online_peers()
            .iter()
            .map(|p| p.node_id)
            .filter(|&id| id != self.local_id)
            .collect();
        for peer in online {
            if let Ok(env) = self.build_signed(peer, MessageType::Heartbeat, Vec::new(), false, now)
            {
                effects.push(RuntimeEffect::SendEnvelope(env));
            }
        }

        let events = self.heartbeat.check_all(&mut self.topology, now);
        for event in events {
            match event {
                PresenceEvent::PeerOffline { node_id } => {
                    for se in self.subnets.remove_node(&node_id) {
                        effects.extend(subnet_event_effects(&se));
                    }
                    // A relay that went silent counts as a failed relay.
                    self.relay_selector.record_failure(node_id, now);
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::PeerOffline { node_id }));
                }
                PresenceEvent::PeerOnline { node_id } => {
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::PeerOnline { node_id }));
                    effects.extend(self.reconnect_delivery(node_id, now));
                }
            }
        }

        effects
    }

    /// A peer reconnected: push our stored backups to it and nudge relays
    /// that may hold more.
    fn reconnect_delivery(&mut self, peer: NodeId, now: u64) -> Vec<RuntimeEffect> {
        let mut effects = vec![];

        for (message_id, bytes) in self.backup.entries_for(&peer) {
            match Envelope::from_bytes(&bytes) {
                Ok(env) => {
                    self.roles.record_backup_consumed(peer, now);
                    tracing::info!(id = %message_id, ?peer, "delivering backed-up message");
                    effects.push(RuntimeEffect::SendEnvelopeTo {
                        target: peer,
                        envelope: env,
                    });
                }
                Err(_) => tracing::warn!(id = %message_id, "corrupt backup entry"),
            }
        }

        let relays: Vec<NodeId> = self
            .topology
            .online_relays()
            .iter()
            .map(|p| p.node_id)
            .filter(|&id| id != self.local_id && id != peer)
            .take(3)
            .collect();
        if !relays.is_empty() {
            let query = BackupQueryPayload { recipient: peer }.to_bytes();
            for relay in relays {
                if let Ok(env) =
                    self.build_signed(relay, MessageType::BackupQuery, query.clone(), true, now)
                {
                    effects.push(RuntimeEffect::SendEnvelope(env));
                }
            }
        }

        effects
    }

    /// Hub heartbeats for groups we hub, member-side hub watchdog.
    pub fn tick_group_hub_heartbeat(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = vec![];

        let hubbed: Vec<(GroupId, u64, usize, Vec<NodeId>)> = self
            .groups
            .groups()
            .filter_map(|group| {
                let gid = group.group_id.clone();
                if self.groups.current_hub(&gid, &self.topology) != Some(self.local_id) {
                    return None;
                }
                let members = group
                    .members
                    .iter()
                    .filter(|&&m| m != self.local_id)
                    .copied()
                    .collect();
                Some((gid, group.epoch, group.member_count(), members))
            })
            .collect();

        for (group_id, epoch, member_count, members) in hubbed {
            let payload = rmp_serde::to_vec(&GroupHubHeartbeatPayload {
                group_id,
                epoch,
                member_count,
            })
            .expect("GroupHubHeartbeatPayload serialization cannot fail");
            for member in members {
                if let Ok(env) = self.build_signed(
                    member,
                    MessageType::GroupHubHeartbeat,
                    payload.clone(),
                    true,
                    now,
                ) {
                    effects.push(RuntimeEffect::SendEnvelope(env));
                }
            }
        }

        let interval = self.config.group_hub_heartbeat_interval.as_millis() as u64;
        let actions = self.groups.check_hub_liveness(&self.topology, now, interval);
        effects.extend(self.group_actions_to_effects(actions, now));

        effects
    }

    /// Backup maintenance: expiry, host quality, proactive migration.
    pub fn tick_backup(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();

        if self.roles.is_tracked(&self.local_id) {
            let score = (self.roles.online_ratio(&self.local_id, now) * 100.0) as u8;
            self.backup.update_host_score(score);
        }

        let (events, orders) = self.backup.tick(&self.topology, now);
        let mut effects = vec![];

        for event in events {
            match event {
                BackupEvent::Delivered { message_id, .. } => {
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::BackupDelivered {
                        message_id,
                    }));
                }
                BackupEvent::Expired { message_id, .. } => {
                    tracing::debug!(id = %message_id, "backup entry expired");
                }
                BackupEvent::Migrated { message_id, target } => {
                    tracing::info!(id = %message_id, ?target, "migrating backup to healthier host");
                }
                BackupEvent::Stored { .. } => {}
            }
        }

        for order in orders {
            if let Ok(env) = self.build_signed(
                order.target,
                MessageType::BackupStore,
                order.payload.to_bytes(),
                true,
                now,
            ) {
                effects.push(RuntimeEffect::SendEnvelope(env));
            }
        }

        effects
    }

    /// Subnet BFS evaluation + membership announces.
    pub fn tick_subnets(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = vec![];

        for event in self.subnets.evaluate(now) {
            effects.extend(subnet_event_effects(&event));
        }

        // Tell our cluster peers what we see, so their graphs converge.
        let local = self.subnets.local_subnet().map(|s| {
            (
                s.subnet_id.clone(),
                s.members.iter().copied().collect::<Vec<_>>(),
                s.density_score,
            )
        });
        if let Some((subnet_id, members, density_score)) = local {
            let announce = SubnetAnnounce {
                subnet_id,
                members: members.clone(),
                density_score,
                timestamp: now,
            };
            if let Ok(bytes) = rmp_serde::to_vec(&announce) {
                let local_id = self.local_id;
                for member in members.into_iter().filter(|&m| m != local_id) {
                    if let Ok(env) = self.build_signed(
                        member,
                        MessageType::SubnetAnnounce,
                        bytes.clone(),
                        false,
                        now,
                    ) {
                        effects.push(RuntimeEffect::SendEnvelope(env));
                    }
                }
            }
        }

        effects
    }

    /// Role promotion/demotion evaluation.
    pub fn tick_roles(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let mut effects = vec![];

        for action in self.roles.evaluate(&mut self.topology, now) {
            match action {
                RoleAction::Promoted { node_id, score } => {
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::RolePromoted {
                        node_id,
                        score,
                    }));
                }
                RoleAction::Demoted { node_id, score } => {
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::RoleDemoted {
                        node_id,
                        score,
                    }));
                }
                RoleAction::LocalRoleChanged { roles } => {
                    self.local_roles = roles.clone();
                    effects.push(RuntimeEffect::Emit(ProtocolEvent::LocalRoleChanged {
                        roles: roles.clone(),
                    }));

                    let announce = RoleChangeAnnounce::new(
                        self.local_id,
                        roles,
                        self.roles.score(&self.local_id, now),
                        now,
                        &self.secret_seed,
                    );
                    if let Ok(bytes) = announce.to_bytes() {
                        let peers: Vec<NodeId> = self
                            .topology
                            .online_peers()
                            .iter()
                            .map(|p| p.node_id)
                            .filter(|&id| id != self.local_id)
                            .collect();
                        for peer in peers {
                            if let Ok(env) = self.build_signed(
                                peer,
                                MessageType::RoleAssignment,
                                bytes.clone(),
                                false,
                                now,
                            ) {
                                effects.push(RuntimeEffect::SendEnvelope(env));
                            }
                        }
                    }
                }
            }
        }

        effects
    }

    /// Evict expired tracker entries and stale invites.
    pub fn tick_tracker_cleanup(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        self.tracker.evict_expired(now);
        self.groups.cleanup_expired_invites(now);
        vec![]
    }

    /// Purge expired entries from the router and hub caches.
    pub fn tick_cache_cleanup(&mut self) -> Vec<RuntimeEffect> {
        let now = now_ms();
        self.router.cleanup_caches(now);
        self.group_hub.cleanup(now);
        vec![]
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Build a signed (optionally encrypted) envelope to `to`, picking the
    /// relay path from the current topology.
    fn build_signed(
        &mut self,
        to: NodeId,
        msg_type: MessageType,
        payload: Vec<u8>,
        encrypt: bool,
        now: u64,
    ) -> Result<Envelope, crate::error::CoreError> {
        let via = self
            .relay_selector
            .select_path(to, &self.topology, &self.subnets, now);
        let builder = EnvelopeBuilder::new(self.local_id, to, msg_type, payload)
            .via(via)
            .ttl(self.config.initial_envelope_ttl);

        if encrypt && self.config.encryption {
            let pk = self
                .topology
                .get(&to)
                .map(|p| p.encryption_key)
                .unwrap_or_else(|| to.as_bytes());
            builder.encrypt_and_sign(&self.secret_seed, &pk)
        } else {
            Ok(builder.sign(&self.secret_seed))
        }
    }

    /// Record liveness for a peer observed on the wire. Discovery by
    /// traffic is silent — PeerOnline is emitted by gossip announces,
    /// explicit peer commands and presence-scan transitions.
    fn note_alive(&mut self, node_id: NodeId, now: u64) {
        if node_id == self.local_id {
            return;
        }
        self.heartbeat.record(node_id, now);
        self.topology.insert_if_unknown(node_id, now);
    }

    fn apply_peer_announce(&mut self, announce: PeerAnnounce, now: u64) -> Vec<RuntimeEffect> {
        self.heartbeat.record(announce.node_id, now);

        let previous = self.topology.get(&announce.node_id).map(|p| p.status);
        self.topology.upsert(PeerInfo {
            node_id: announce.node_id,
            username: announce.username,
            encryption_key: announce.encryption_key,
            roles: announce.roles,
            status: PeerStatus::Online,
            last_seen: now,
        });

        match previous {
            None | Some(PeerStatus::Offline) => {
                vec![RuntimeEffect::Emit(ProtocolEvent::PeerOnline {
                    node_id: announce.node_id,
                })]
            }
            Some(PeerStatus::Online) => vec![],
        }
    }

    fn apply_role_announce(&mut self, announce: RoleChangeAnnounce, now: u64) -> Vec<RuntimeEffect> {
        let promoted = announce.roles.contains(&PeerRole::Relay);
        match self.topology.get_mut(&announce.node_id) {
            Some(peer) => peer.roles = announce.roles.clone(),
            None => {
                let mut info = PeerInfo::bare(announce.node_id, now);
                info.roles = announce.roles.clone();
                self.topology.upsert(info);
            }
        }

        let event = if promoted {
            ProtocolEvent::RolePromoted {
                node_id: announce.node_id,
                score: announce.score,
            }
        } else {
            ProtocolEvent::RoleDemoted {
                node_id: announce.node_id,
                score: announce.score,
            }
        };
        vec![RuntimeEffect::Emit(event)]
    }

    fn group_actions_to_effects(
        &mut self,
        actions: Vec<GroupAction>,
        now: u64,
    ) -> Vec<RuntimeEffect> {
        let mut effects = vec![];
        for action in actions {
            match action {
                GroupAction::Send {
                    to,
                    msg_type,
                    payload,
                } => match self.build_signed(to, msg_type, payload, true, now) {
                    Ok(env) => effects.push(RuntimeEffect::SendEnvelope(env)),
                    Err(e) => effects.push(error_effect(ErrorKind::SendFailed, e.to_string())),
                },
                GroupAction::Event(event) => {
                    effects.push(RuntimeEffect::Emit(group_event_to_protocol(event)));
                }
            }
        }
        effects
    }

    fn record_violation(&mut self, peer: NodeId, detail: &str) {
        let count = self.roles.record_violation(peer);
        tracing::debug!(?peer, %detail, count, "protocol violation");
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────

fn error_effect(kind: ErrorKind, detail: String) -> RuntimeEffect {
    RuntimeEffect::Emit(ProtocolEvent::Error { kind, detail })
}

fn reject_detail(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::InvalidSignature => "invalid signature",
        RejectReason::Malformed => "malformed envelope",
        RejectReason::DecryptionFailed => "decryption failed",
    }
}

fn subnet_event_effects(event: &SubnetEvent) -> Vec<RuntimeEffect> {
    match event {
        SubnetEvent::SubnetFormed { subnet } => {
            vec![RuntimeEffect::Emit(ProtocolEvent::SubnetFormed {
                subnet_id: subnet.subnet_id.clone(),
                members: subnet.members.iter().copied().collect(),
            })]
        }
        SubnetEvent::SubnetDissolved { subnet_id, reason } => {
            vec![RuntimeEffect::Emit(ProtocolEvent::SubnetDissolved {
                subnet_id: subnet_id.clone(),
                reason: format!("{reason:?}"),
            })]
        }
    }
}

fn group_event_to_protocol(event: GroupEvent) -> ProtocolEvent {
    match event {
        GroupEvent::GroupCreated { group } => ProtocolEvent::GroupCreated {
            group_id: group.group_id,
        },
        GroupEvent::InviteReceived {
            group_id,
            group_name,
            inviter,
            inviter_username,
        } => ProtocolEvent::GroupInviteReceived {
            group_id,
            group_name,
            inviter,
            inviter_username,
        },
        GroupEvent::GroupJoined {
            group_id,
            group_name,
        } => ProtocolEvent::GroupJoined {
            group_id,
            group_name,
        },
        GroupEvent::MemberJoined {
            group_id,
            member,
            username,
        } => ProtocolEvent::GroupMemberJoined {
            group_id,
            member,
            username,
        },
        GroupEvent::MemberLeft { group_id, member } => {
            ProtocolEvent::GroupMemberLeft { group_id, member }
        }
        GroupEvent::MessageReceived {
            group_id,
            message_id,
            sender,
            sender_username,
            sent_at,
            body,
        } => ProtocolEvent::GroupMessage {
            group_id,
            message_id,
            sender,
            sender_username,
            sent_at,
            body,
        },
        GroupEvent::HubChanged {
            group_id,
            old_hub,
            new_hub,
        } => ProtocolEvent::GroupHubChanged {
            group_id,
            old_hub,
            new_hub,
        },
        GroupEvent::GroupDissolved { group_id } => ProtocolEvent::GroupDissolved { group_id },
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

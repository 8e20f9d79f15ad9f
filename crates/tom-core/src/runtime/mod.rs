/// Protocol runtime — the event loop that drives every subsystem.
///
/// One task owns the entire protocol state mutably and multiplexes
/// transport frames, application commands, gossip inputs and timers.
/// All decisions happen in pure `RuntimeState` handlers that return
/// effects; the executor is the only place I/O happens. No locks on the
/// state — exclusive ownership replaces locking.
mod effect;
mod executor;
mod r#loop;
mod state;
pub mod transport;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::CoreError;
use crate::gossip::GossipInput;
use crate::group::GroupId;
use crate::identity::Identity;
use crate::roles::RoleThresholds;
use crate::topology::{PeerInfo, PeerRole};
use crate::tracker::StatusChange;
use crate::types::{NodeId, DEFAULT_TTL};

pub use effect::RuntimeEffect;
pub use state::RuntimeState;
pub use transport::Transport;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the protocol runtime. Defaults match the protocol
/// constants; anything here is an operator knob, not a wire parameter.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Local display name carried in gossip announces.
    pub username: String,
    /// E2E-encrypt outbound payloads (disable only for diagnostics).
    pub encryption: bool,
    /// Interval between self heartbeats.
    pub heartbeat_send_interval: Duration,
    /// Gap before a silent peer flips Online→Offline. Must exceed the
    /// send interval.
    pub heartbeat_offline_threshold: Duration,
    /// PeerAnnounce broadcast period.
    pub gossip_announce_interval: Duration,
    /// Subnet BFS evaluation cadence.
    pub subnet_evaluation_interval: Duration,
    /// Backup maintenance cadence.
    pub backup_tick_interval: Duration,
    /// Replica fan-out for offline sends (clamped to 3..=5).
    pub backup_replica_count: usize,
    /// Role promotion/demotion evaluation cadence.
    pub role_evaluation_interval: Duration,
    /// Promotion/demotion hysteresis bands.
    pub role_thresholds: RoleThresholds,
    /// Hub liveness beat for groups.
    pub group_hub_heartbeat_interval: Duration,
    /// Group messages per second per sender, enforced at the hub.
    pub group_send_rate_limit: u32,
    /// Router seen-id eviction age.
    pub dedup_cache_ttl: Duration,
    /// Starting hop count for new envelopes.
    pub initial_envelope_ttl: u32,
    /// Tracker eviction cadence.
    pub tracker_cleanup_interval: Duration,
    /// Router cache eviction cadence.
    pub cache_cleanup_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            encryption: true,
            heartbeat_send_interval: Duration::from_secs(5),
            heartbeat_offline_threshold: Duration::from_secs(15),
            gossip_announce_interval: Duration::from_secs(10),
            subnet_evaluation_interval: Duration::from_secs(30),
            backup_tick_interval: Duration::from_secs(60),
            backup_replica_count: 3,
            role_evaluation_interval: Duration::from_secs(60),
            role_thresholds: RoleThresholds::default(),
            group_hub_heartbeat_interval: Duration::from_secs(30),
            group_send_rate_limit: 2,
            dedup_cache_ttl: Duration::from_secs(24 * 60 * 60),
            initial_envelope_ttl: DEFAULT_TTL,
            tracker_cleanup_interval: Duration::from_secs(300),
            cache_cleanup_interval: Duration::from_secs(300),
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Bring the transport up. The transport layer owns connectivity; the
    /// runtime treats this as a no-op marker.
    Connect,
    /// Tear down: equivalent to Shutdown.
    Disconnect,
    /// Send a chat message to a peer.
    SendMessage { to: NodeId, payload: Vec<u8> },
    /// Send a read receipt for a previously received message.
    SendReadReceipt { to: NodeId, message_id: String },
    /// Register a peer if unknown.
    AddPeer(PeerInfo),
    /// Add or refresh a peer.
    UpsertPeer(PeerInfo),
    /// Remove a peer from topology.
    RemovePeer(NodeId),
    /// Create a group with the caller as owner.
    CreateGroup { name: String, members: Vec<NodeId> },
    /// Accept a pending group invitation.
    AcceptInvite { group_id: GroupId },
    /// Leave a group.
    LeaveGroup { group_id: GroupId },
    /// Send a text message to a group.
    SendGroupMessage { group_id: GroupId, text: String },
    /// Query: current topology snapshot.
    GetTopology {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    /// Query: currently connected peers (transport view).
    GetConnectedPeers {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// A delivered message from the network (decrypted, verified).
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub from: NodeId,
    pub payload: Vec<u8>,
    pub envelope_id: String,
    /// Sender-side creation timestamp (Unix ms).
    pub timestamp: u64,
    pub was_encrypted: bool,
    pub signature_valid: bool,
    /// Local receive timestamp (Unix ms).
    pub received_at: u64,
}

/// Kinds of user-visible errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SendFailed,
    PeerUnknown,
    GroupUnknown,
    RateLimited,
    Unroutable,
    Internal,
}

/// Protocol-level events the application may observe.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    PeerOnline {
        node_id: NodeId,
    },
    PeerOffline {
        node_id: NodeId,
    },
    GroupCreated {
        group_id: GroupId,
    },
    GroupInviteReceived {
        group_id: GroupId,
        group_name: String,
        inviter: NodeId,
        inviter_username: String,
    },
    GroupJoined {
        group_id: GroupId,
        group_name: String,
    },
    GroupMemberJoined {
        group_id: GroupId,
        member: NodeId,
        username: String,
    },
    GroupMemberLeft {
        group_id: GroupId,
        member: NodeId,
    },
    GroupMessage {
        group_id: GroupId,
        message_id: String,
        sender: NodeId,
        sender_username: String,
        sent_at: u64,
        body: Vec<u8>,
    },
    GroupHubChanged {
        group_id: GroupId,
        old_hub: Option<NodeId>,
        new_hub: NodeId,
    },
    GroupDissolved {
        group_id: GroupId,
    },
    BackupStored {
        message_id: String,
        replicas: Vec<NodeId>,
    },
    BackupDelivered {
        message_id: String,
    },
    SubnetFormed {
        subnet_id: String,
        members: Vec<NodeId>,
    },
    SubnetDissolved {
        subnet_id: String,
        reason: String,
    },
    RolePromoted {
        node_id: NodeId,
        score: f64,
    },
    RoleDemoted {
        node_id: NodeId,
        score: f64,
    },
    LocalRoleChanged {
        roles: Vec<PeerRole>,
    },
    Error {
        kind: ErrorKind,
        detail: String,
    },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to communicate with a running runtime.
///
/// Cheap to clone. All methods are non-blocking channel sends.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: NodeId,
}

impl RuntimeHandle {
    /// This node's identity.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn send(&self, cmd: RuntimeCommand) -> Result<(), CoreError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }

    /// Send a chat message. The runtime handles relay selection,
    /// encryption, signing, transport and status tracking.
    pub async fn send_message(&self, to: NodeId, payload: Vec<u8>) -> Result<(), CoreError> {
        self.send(RuntimeCommand::SendMessage { to, payload }).await
    }

    /// Send a read receipt for a message we received.
    pub async fn send_read_receipt(&self, to: NodeId, message_id: String) -> Result<(), CoreError> {
        self.send(RuntimeCommand::SendReadReceipt { to, message_id })
            .await
    }

    pub async fn add_peer(&self, info: PeerInfo) -> Result<(), CoreError> {
        self.send(RuntimeCommand::AddPeer(info)).await
    }

    pub async fn upsert_peer(&self, info: PeerInfo) -> Result<(), CoreError> {
        self.send(RuntimeCommand::UpsertPeer(info)).await
    }

    pub async fn remove_peer(&self, node_id: NodeId) -> Result<(), CoreError> {
        self.send(RuntimeCommand::RemovePeer(node_id)).await
    }

    pub async fn create_group(
        &self,
        name: String,
        members: Vec<NodeId>,
    ) -> Result<(), CoreError> {
        self.send(RuntimeCommand::CreateGroup { name, members })
            .await
    }

    pub async fn accept_invite(&self, group_id: GroupId) -> Result<(), CoreError> {
        self.send(RuntimeCommand::AcceptInvite { group_id }).await
    }

    pub async fn leave_group(&self, group_id: GroupId) -> Result<(), CoreError> {
        self.send(RuntimeCommand::LeaveGroup { group_id }).await
    }

    pub async fn send_group_message(
        &self,
        group_id: GroupId,
        text: String,
    ) -> Result<(), CoreError> {
        self.send(RuntimeCommand::SendGroupMessage { group_id, text })
            .await
    }

    /// Current topology snapshot.
    pub async fn topology(&self) -> Vec<PeerInfo> {
        let (tx, rx) = oneshot::channel();
        let _ = self.send(RuntimeCommand::GetTopology { reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    /// Currently connected peers (transport view).
    pub async fn connected_peers(&self) -> Vec<NodeId> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .send(RuntimeCommand::GetConnectedPeers { reply: tx })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Receive delivered messages (decrypted, verified).
    pub messages: mpsc::Receiver<DeliveredMessage>,
    /// Receive status changes for sent messages.
    pub status_changes: mpsc::Receiver<StatusChange>,
    /// Receive protocol-level events.
    pub events: mpsc::Receiver<ProtocolEvent>,
    /// Feed inbound `(peer, bytes)` frames from the transport layer.
    pub incoming: mpsc::Sender<(NodeId, Vec<u8>)>,
    /// Feed gossip inputs from the signaling/bootstrap layer.
    pub gossip: mpsc::Sender<GossipInput>,
}

// ── ProtocolRuntime ──────────────────────────────────────────────────

/// The protocol runtime — spawn it and communicate via channels.
pub struct ProtocolRuntime;

impl ProtocolRuntime {
    /// Create and start the protocol runtime as a tokio task.
    ///
    /// Takes the node identity and a transport; returns the channel set
    /// the application (and the transport glue) uses to talk to it.
    pub fn spawn<T: Transport + 'static>(
        identity: &Identity,
        transport: T,
        config: RuntimeConfig,
    ) -> RuntimeChannels {
        let local_id = identity.node_id();
        let state = RuntimeState::new(identity, config);

        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        let (incoming_tx, incoming_rx) = mpsc::channel::<(NodeId, Vec<u8>)>(256);
        let (gossip_tx, gossip_rx) = mpsc::channel::<GossipInput>(64);

        let (msg_tx, msg_rx) = mpsc::channel::<DeliveredMessage>(256);
        let (status_tx, status_rx) = mpsc::channel::<StatusChange>(256);
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(256);

        tokio::spawn(r#loop::runtime_loop(
            transport,
            state,
            cmd_rx,
            incoming_rx,
            gossip_rx,
            msg_tx,
            status_tx,
            event_tx,
        ));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, local_id },
            messages: msg_rx,
            status_changes: status_rx,
            events: event_rx,
            incoming: incoming_tx,
            gossip: gossip_tx,
        }
    }
}

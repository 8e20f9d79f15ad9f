//! ToM protocol core.
//!
//! The event-driven runtime of the ToM peer-to-peer messaging transport:
//! identity, envelope codec, routing, presence, relay selection, message
//! tracking, group fan-out, offline backup, ephemeral subnets and dynamic
//! roles — everything except the byte transport itself.
//!
//! Wire format: MessagePack (compact binary, canonical field order).
//! Crypto: Ed25519 signatures + X25519/XChaCha20-Poly1305 encryption,
//! encrypt-then-sign.
//!
//! All protocol decisions are made by pure, synchronous handlers on
//! [`RuntimeState`] that return [`RuntimeEffect`]s; the tokio event loop
//! spawned by [`ProtocolRuntime::spawn`] multiplexes inputs and executes
//! effects. The transport and signaling layers plug in via channels and
//! the [`Transport`] trait.

pub mod backup;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod gossip;
pub mod group;
pub mod heartbeat;
pub mod identity;
pub mod relay;
pub mod roles;
pub mod router;
pub mod runtime;
pub mod subnet;
pub mod topology;
pub mod tracker;
pub mod types;

pub use backup::{BackupCoordinator, BackupEntry, BackupStore as BackupStoreState};
pub use crypto::EncryptedPayload;
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::CoreError;
pub use gossip::{GossipInput, PeerAnnounce, RoleChangeAnnounce};
pub use group::{elect_hub, Group, GroupHub, GroupId, GroupManager};
pub use heartbeat::{HeartbeatTracker, PresenceEvent};
pub use identity::Identity;
pub use relay::{RelaySelection, RelaySelector, SelectionReason};
pub use roles::{ContributionMetrics, RoleAction, RoleManager, RoleThresholds};
pub use router::{AckKind, AckPayload, ReadReceiptPayload, Router, RoutingAction};
pub use runtime::{
    DeliveredMessage, ErrorKind, ProtocolEvent, ProtocolRuntime, RuntimeChannels, RuntimeCommand,
    RuntimeConfig, RuntimeEffect, RuntimeHandle, RuntimeState, Transport,
};
pub use subnet::{EphemeralSubnets, SubnetAnnounce, SubnetEvent, SubnetInfo};
pub use topology::{PeerInfo, PeerRole, PeerStatus, Topology};
pub use tracker::{MessageTracker, StatusChange};
pub use types::{now_ms, MessageStatus, MessageType, NodeId};

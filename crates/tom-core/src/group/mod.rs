/// Group messaging for the ToM core — deterministic hub-and-spoke.
///
/// Topology per group is a star: one member acts as the hub and fans
/// messages out to the spokes. The hub is not configured anywhere — it is
/// a pure function of the member set and the presence view, so failover
/// needs zero coordination.
///
/// - **types**: group state, wire payloads, events
/// - **election**: the deterministic hub function
/// - **manager**: member-side state machine (invites, membership, hub watch)
/// - **hub**: hub-side duties (rate limiting, dedup, fan-out targets)
pub mod election;
pub mod hub;
pub mod manager;
pub mod types;

pub use election::elect_hub;
pub use hub::GroupHub;
pub use manager::GroupManager;
pub use types::{
    Group, GroupAction, GroupEvent, GroupHubHeartbeatPayload, GroupId, GroupInviteAckPayload,
    GroupInvitePayload, GroupJoinPayload, GroupLeavePayload, GroupMessagePayload,
    GROUP_RATE_LIMIT_PER_SECOND, HUB_HEARTBEAT_INTERVAL_MS, HUB_MISSED_BEATS_LIMIT,
    INVITE_TTL_MS, MAX_GROUP_MEMBERS,
};

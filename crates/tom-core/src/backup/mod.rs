/// Offline backup for the ToM core — viral replication.
///
/// Messages for offline recipients are handed to a handful of backup
/// peers. Each holder delivers on recipient reconnection, purges on
/// acknowledgement or at the absolute 24 h expiry, and — the key move —
/// migrates its copies to a healthier peer *before* it degrades enough
/// to fail, instead of waiting for the failure.
///
/// - **types**: entries, wire payloads, events, constants
/// - **store**: holds entries, indexes by recipient, expires TTL
/// - **coordinator**: replica selection, ack propagation, migration
pub mod coordinator;
pub mod store;
pub mod types;

pub use coordinator::{BackupCoordinator, MigrationOrder};
pub use store::BackupStore;
pub use types::{
    BackupAckPayload, BackupEntry, BackupEvent, BackupQueryPayload, BackupStorePayload,
    BACKUP_TTL_MS, HOST_REPLICATION_THRESHOLD, MAX_REPLICAS, MIN_REPLICAS,
};

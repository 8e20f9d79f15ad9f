/// Protocol-level errors for the ToM core.
///
/// Covers crypto, codec, routing and command failures. Handlers never
/// panic on peer input — everything a remote node can trigger maps here.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("no relay available for {target}")]
    Unroutable { target: String },

    #[error("unknown peer: {node_id}")]
    PeerUnknown { node_id: String },

    #[error("unknown group: {group_id}")]
    GroupUnknown { group_id: String },

    #[error("not the hub for group {group_id}")]
    NotHub { group_id: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("runtime channel closed")]
    ChannelClosed,
}

impl From<rmp_serde::encode::Error> for CoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::CoreError;
use crate::types::{now_ms, MessageType, NodeId, DEFAULT_TTL};

/// Protocol-level envelope — the unit of transport in ToM.
///
/// Serialized as MessagePack with the fields in declaration order; that
/// encoding is canonical so signatures verify across implementations.
/// The `payload` is opaque bytes — the protocol routes and encrypts
/// without parsing the content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message identifier (UUID v4).
    pub id: String,
    /// Sender node identity.
    pub from: NodeId,
    /// Final recipient node identity.
    pub to: NodeId,
    /// Relay chain — intermediate nodes requested to forward this message.
    pub via: Vec<NodeId>,
    /// Message type — determines protocol handling.
    pub msg_type: MessageType,
    /// Opaque payload bytes (plaintext or ciphertext).
    pub payload: Vec<u8>,
    /// Creation timestamp (Unix milliseconds).
    pub timestamp: u64,
    /// Ed25519 signature over `signing_bytes()`. Empty if unsigned.
    pub signature: Vec<u8>,
    /// Remaining hop count. Decremented at each relay. Dropped at 0.
    pub ttl: u32,
    /// Whether `payload` is encrypted (E2E).
    pub encrypted: bool,
}

impl Envelope {
    /// Create a new unsigned envelope with default TTL.
    pub fn new(from: NodeId, to: NodeId, msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self::new_via(from, to, Vec::new(), msg_type, payload)
    }

    /// Create a new envelope routed through specific relays.
    pub fn new_via(
        from: NodeId,
        to: NodeId,
        via: Vec<NodeId>,
        msg_type: MessageType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            via,
            msg_type,
            payload,
            timestamp: now_ms(),
            signature: Vec::new(),
            ttl: DEFAULT_TTL,
            encrypted: false,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    /// Produce the canonical bytes to sign/verify.
    ///
    /// Excludes `signature` (circular) and `ttl` — relays decrement TTL in
    /// transit, and re-signing at each hop would require the sender's key.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let signable = SignableEnvelope {
            id: &self.id,
            from: &self.from,
            to: &self.to,
            via: &self.via,
            msg_type: &self.msg_type,
            payload: &self.payload,
            timestamp: self.timestamp,
            encrypted: self.encrypted,
        };
        rmp_serde::to_vec(&signable).expect("signing_bytes serialization cannot fail")
    }

    /// Decrement TTL. Returns `Err` if TTL is already 0.
    pub fn decrement_ttl(&mut self) -> Result<(), CoreError> {
        if self.ttl == 0 {
            return Err(CoreError::InvalidEnvelope {
                reason: "TTL exhausted".into(),
            });
        }
        self.ttl -= 1;
        Ok(())
    }

    /// Check if the envelope has a (non-empty) signature.
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Sign this envelope with the sender's Ed25519 secret key (32-byte seed).
    pub fn sign(&mut self, secret_seed: &[u8; 32]) {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(secret_seed);
        let sig = signing_key.sign(&self.signing_bytes());
        self.signature = sig.to_bytes().to_vec();
    }

    /// Verify the Ed25519 signature against the sender's public key (`self.from`).
    ///
    /// Uses strict verification (rejects non-canonical signatures).
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        if self.signature.len() != 64 {
            return Err(CoreError::InvalidSignature);
        }
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.from.as_bytes())
            .map_err(|_| CoreError::InvalidSignature)?;
        let sig_bytes: [u8; 64] = self.signature[..64]
            .try_into()
            .map_err(|_| CoreError::InvalidSignature)?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify_strict(&self.signing_bytes(), &signature)
            .map_err(|_| CoreError::InvalidSignature)
    }

    /// Encrypt the payload in place for the recipient.
    ///
    /// Replaces `self.payload` with the serialized `EncryptedPayload` and
    /// sets `self.encrypted = true`. `recipient_pk` is the recipient's
    /// Ed25519 public key bytes.
    pub fn encrypt_payload(&mut self, recipient_pk: &[u8; 32]) -> Result<(), CoreError> {
        let encrypted = crypto::encrypt(&self.payload, recipient_pk)?;
        self.payload = encrypted.to_bytes()?;
        self.encrypted = true;
        Ok(())
    }

    /// Decrypt the payload in place using the recipient's Ed25519 secret seed.
    ///
    /// Only valid if `self.encrypted == true`. Replaces `self.payload` with
    /// the plaintext and clears the flag.
    pub fn decrypt_payload(&mut self, recipient_secret_seed: &[u8; 32]) -> Result<(), CoreError> {
        if !self.encrypted {
            return Err(CoreError::InvalidEnvelope {
                reason: "payload is not encrypted".into(),
            });
        }
        let encrypted = crypto::EncryptedPayload::from_bytes(&self.payload)?;
        self.payload = crypto::decrypt(&encrypted, recipient_secret_seed)?;
        self.encrypted = false;
        Ok(())
    }
}

/// Fluent builder for creating signed (and optionally encrypted) envelopes.
pub struct EnvelopeBuilder {
    from: NodeId,
    to: NodeId,
    via: Vec<NodeId>,
    msg_type: MessageType,
    payload: Vec<u8>,
    ttl: u32,
}

impl EnvelopeBuilder {
    /// Start building a new envelope.
    pub fn new(from: NodeId, to: NodeId, msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            from,
            to,
            via: Vec::new(),
            msg_type,
            payload,
            ttl: DEFAULT_TTL,
        }
    }

    /// Set the relay chain.
    pub fn via(mut self, relays: Vec<NodeId>) -> Self {
        self.via = relays;
        self
    }

    /// Set the TTL (hop count).
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build an unsigned envelope.
    pub fn build(self) -> Envelope {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            from: self.from,
            to: self.to,
            via: self.via,
            msg_type: self.msg_type,
            payload: self.payload,
            timestamp: now_ms(),
            signature: Vec::new(),
            ttl: self.ttl,
            encrypted: false,
        }
    }

    /// Build and sign the envelope with the sender's Ed25519 secret key.
    pub fn sign(self, secret_seed: &[u8; 32]) -> Envelope {
        let mut env = self.build();
        env.sign(secret_seed);
        env
    }

    /// Encrypt the payload, then build and sign.
    ///
    /// Order: encrypt → sign. The signature covers the ciphertext, so relays
    /// can verify authenticity without decrypting, and any ciphertext
    /// tampering fails verification before the AEAD tag check.
    pub fn encrypt_and_sign(
        self,
        secret_seed: &[u8; 32],
        recipient_pk: &[u8; 32],
    ) -> Result<Envelope, CoreError> {
        let mut env = self.build();
        env.encrypt_payload(recipient_pk)?;
        env.sign(secret_seed);
        Ok(env)
    }
}

/// Internal struct for deterministic signing — immutable fields only.
///
/// Excludes `signature` (circular) and `ttl` (mutated by relays in transit).
#[derive(Serialize)]
struct SignableEnvelope<'a> {
    id: &'a str,
    from: &'a NodeId,
    to: &'a NodeId,
    via: &'a [NodeId],
    msg_type: &'a MessageType,
    payload: &'a [u8],
    timestamp: u64,
    encrypted: bool,
}

/// Node identity — the long-lived Ed25519 keypair.
///
/// The public key doubles as the node's network address (`NodeId`).
/// The seed can be persisted to a local keystore file so the identity
/// survives restarts; losing the file means a new identity.
use std::path::Path;

use ed25519_dalek::{Signer, SigningKey};

use crate::crypto;
use crate::error::CoreError;
use crate::types::NodeId;

/// Long-lived Ed25519 identity for the local node.
pub struct Identity {
    seed: [u8; 32],
    signing_key: SigningKey,
}

impl Identity {
    /// Build an identity from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self { seed, signing_key }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Load the identity from a keystore file, or generate and persist one.
    ///
    /// The keystore format is the hex-encoded 32-byte seed. A corrupt or
    /// unreadable keystore is fatal — starting with a silently different
    /// identity would orphan every existing conversation.
    pub fn load_or_generate(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CoreError::Keystore(format!("read {}: {e}", path.display())))?;
            let trimmed = contents.trim();
            if trimmed.len() != 64 {
                return Err(CoreError::Keystore(format!(
                    "expected 64 hex chars in {}, got {}",
                    path.display(),
                    trimmed.len()
                )));
            }
            let mut seed = [0u8; 32];
            for (i, chunk) in trimmed.as_bytes().chunks(2).enumerate() {
                let hex = std::str::from_utf8(chunk)
                    .map_err(|_| CoreError::Keystore("non-utf8 keystore".into()))?;
                seed[i] = u8::from_str_radix(hex, 16)
                    .map_err(|_| CoreError::Keystore(format!("invalid hex in {}", path.display())))?;
            }
            return Ok(Self::from_seed(seed));
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Keystore(format!("mkdir {}: {e}", parent.display())))?;
        }
        let hex: String = identity.seed.iter().map(|b| format!("{b:02x}")).collect();
        std::fs::write(path, hex)
            .map_err(|e| CoreError::Keystore(format!("write {}: {e}", path.display())))?;
        Ok(identity)
    }

    /// The node's identity / network address.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// The raw 32-byte seed. Needed for payload decryption.
    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    /// Sign arbitrary bytes with the identity key.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    /// The derived X25519 secret (for decryption paths that want it directly).
    pub fn x25519_secret(&self) -> [u8; 32] {
        crypto::ed25519_to_x25519_secret(&self.seed)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the seed.
        f.debug_struct("Identity")
            .field("node_id", &self.node_id())
            .finish_non_exhaustive()
    }
}

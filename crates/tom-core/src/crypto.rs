/// End-to-end encryption for the ToM protocol.
///
/// Uses ephemeral X25519 Diffie-Hellman + XChaCha20-Poly1305 AEAD.
/// Each message gets a fresh ephemeral keypair for forward secrecy —
/// the ephemeral secret is dropped as soon as the ciphertext exists.
///
/// Key derivation: Ed25519 identity keys are converted to X25519 via the
/// standard Edwards→Montgomery map (same as libsodium).
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::error::CoreError;

/// HKDF info string for domain separation. Wire-protocol v1 constant —
/// all implementations must use this exact literal.
const HKDF_INFO: &[u8] = b"tom-protocol-e2e-xchacha20poly1305-v1";

/// Encrypted payload with ephemeral key exchange metadata.
///
/// Contains everything the recipient needs to decrypt: ciphertext, nonce,
/// and the sender's ephemeral X25519 public key for DH key recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte nonce (XChaCha20 extended nonce — safe to generate randomly).
    pub nonce: [u8; 24],
    /// Sender's ephemeral X25519 public key (32 bytes).
    pub ephemeral_pk: [u8; 32],
}

impl EncryptedPayload {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Convert an Ed25519 public key to an X25519 public key.
///
/// Uses the birational map from the Edwards curve to Montgomery form.
/// Equivalent to libsodium's `crypto_sign_ed25519_pk_to_curve25519`.
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], CoreError> {
    let compressed = CompressedEdwardsY(*ed25519_pk);
    let edwards = compressed.decompress().ok_or_else(|| {
        CoreError::Crypto("invalid Ed25519 public key: decompression failed".into())
    })?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// Convert an Ed25519 secret key (32-byte seed) to an X25519 secret key.
///
/// Mirrors libsodium's `crypto_sign_ed25519_sk_to_curve25519`:
/// SHA-512(seed), take first 32 bytes, clamp per RFC 7748.
pub fn ed25519_to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

/// Derive a 32-byte encryption key from a DH shared secret using HKDF-SHA256.
fn derive_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

/// Encrypt plaintext for a recipient identified by their Ed25519 public key.
///
/// Generates an ephemeral X25519 keypair, performs DH with the recipient's
/// converted X25519 public key, derives an encryption key via HKDF,
/// and encrypts with XChaCha20-Poly1305.
pub fn encrypt(
    plaintext: &[u8],
    recipient_ed25519_pk: &[u8; 32],
) -> Result<EncryptedPayload, CoreError> {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

    let recipient_x25519_bytes = ed25519_to_x25519_public(recipient_ed25519_pk)?;
    let recipient_x25519 = X25519PublicKey::from(recipient_x25519_bytes);

    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let key = derive_key(shared_secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CoreError::Crypto(format!("encryption failed: {e}")))?;

    Ok(EncryptedPayload {
        ciphertext,
        nonce: nonce_bytes,
        ephemeral_pk: ephemeral_public.to_bytes(),
    })
}

/// Decrypt an `EncryptedPayload` using the recipient's Ed25519 secret key
/// (32-byte seed).
///
/// Converts the seed to an X25519 secret, performs DH with the sender's
/// ephemeral public key, derives the decryption key via HKDF, decrypts.
/// Any Poly1305 authentication failure surfaces as `CoreError::Crypto`.
pub fn decrypt(
    payload: &EncryptedPayload,
    recipient_ed25519_seed: &[u8; 32],
) -> Result<Vec<u8>, CoreError> {
    let x25519_secret = X25519Secret::from(ed25519_to_x25519_secret(recipient_ed25519_seed));
    let ephemeral_pk = X25519PublicKey::from(payload.ephemeral_pk);

    let shared_secret = x25519_secret.diffie_hellman(&ephemeral_pk);
    let key = derive_key(shared_secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce = XNonce::from(payload.nonce);
    cipher
        .decrypt(&nonce, payload.ciphertext.as_ref())
        .map_err(|_| CoreError::Crypto("decryption failed: authentication error".into()))
}

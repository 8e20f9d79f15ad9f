use proptest::prelude::*;
use tom_core::{Envelope, EnvelopeBuilder, MessageType, NodeId};

/// Deterministic Ed25519 keypair (seed, public_key, NodeId).
fn keypair(seed: u8) -> ([u8; 32], [u8; 32], NodeId) {
    let seed_bytes = [seed; 32];
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed_bytes);
    let pk = signing.verifying_key().to_bytes();
    (seed_bytes, pk, NodeId::from_bytes(pk))
}

proptest! {
    /// Signed envelopes always verify.
    #[test]
    fn sign_verify_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..10_000),
        ttl in 0..10u32,
    ) {
        let (sk, _, from) = keypair(1);
        let (_, _, to) = keypair(2);

        let env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload)
            .ttl(ttl)
            .sign(&sk);

        prop_assert!(env.verify_signature().is_ok());
    }

    /// The signature excludes TTL: decrementing any number of times never
    /// invalidates it. This is what lets relays forward without re-signing.
    #[test]
    fn ttl_decrement_preserves_signature(
        payload in prop::collection::vec(any::<u8>(), 0..5000),
        hops in 0..4u32,
    ) {
        let (sk, _, from) = keypair(3);
        let (_, _, to) = keypair(4);

        let mut env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload)
            .ttl(4)
            .sign(&sk);

        for _ in 0..hops {
            env.decrement_ttl().expect("ttl > 0");
            prop_assert!(env.verify_signature().is_ok());
        }
    }

    /// Signed envelope survives wire roundtrip.
    #[test]
    fn sign_wire_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..5000),
    ) {
        let (sk, _, from) = keypair(3);
        let (_, _, to) = keypair(4);

        let env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload)
            .sign(&sk);

        let bytes = env.to_bytes().expect("serialize");
        let decoded = Envelope::from_bytes(&bytes).expect("deserialize");

        prop_assert!(decoded.verify_signature().is_ok());
    }

    /// Tampering with any payload byte always breaks the signature.
    #[test]
    fn tampered_payload_breaks_sig(
        payload in prop::collection::vec(any::<u8>(), 1..5000),
        tamper_pos in any::<usize>(),
    ) {
        let (sk, _, from) = keypair(5);
        let (_, _, to) = keypair(6);

        let mut env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload)
            .sign(&sk);

        let pos = tamper_pos % env.payload.len();
        env.payload[pos] ^= 0xFF;

        prop_assert!(env.verify_signature().is_err());
    }

    /// Mutating signed routing metadata breaks the signature too.
    #[test]
    fn tampered_timestamp_breaks_sig(
        payload in prop::collection::vec(any::<u8>(), 0..1000),
        delta in 1..1_000_000u64,
    ) {
        let (sk, _, from) = keypair(7);
        let (_, _, to) = keypair(8);

        let mut env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload)
            .sign(&sk);

        env.timestamp = env.timestamp.wrapping_add(delta);
        prop_assert!(env.verify_signature().is_err());
    }

    /// Encrypt-then-sign → verify → decrypt always works.
    #[test]
    fn encrypt_sign_decrypt_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..10_000),
    ) {
        let (sk_sender, _, from) = keypair(7);
        let (sk_recipient, pk_recipient, to) = keypair(8);

        let env = EnvelopeBuilder::new(from, to, MessageType::Chat, payload.clone())
            .encrypt_and_sign(&sk_sender, &pk_recipient)
            .expect("encrypt_and_sign");

        // Signature covers the ciphertext — verifiable without the key
        prop_assert!(env.verify_signature().is_ok());
        prop_assert!(env.encrypted);

        let mut decrypted = env;
        decrypted.decrypt_payload(&sk_recipient).expect("decrypt");
        prop_assert!(!decrypted.encrypted);
        prop_assert_eq!(&decrypted.payload, &payload);
    }
}

use crate::types::NodeId;

/// Abstraction reseau pour le runtime.
///
/// En production : impl par le noeud transport (QUIC / WebRTC DataChannel).
/// En test : impl par MockTransport (enregistre les envois).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Envoyer des bytes bruts a un noeud cible.
    async fn send_raw(&self, target: NodeId, data: &[u8]) -> Result<(), String>;

    /// Diffuser des bytes sur le canal gossip (announces).
    async fn broadcast_raw(&self, data: &[u8]) -> Result<(), String>;

    /// Lister les peers actuellement connectes.
    async fn connected_peers(&self) -> Vec<NodeId>;
}

/// Faux transport qui enregistre les envois pour verification.
///
/// Public : les tests d'integration et les demos hors-reseau s'en servent.
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MockTransport {
        sent: Arc<Mutex<Vec<(NodeId, Vec<u8>)>>>,
        broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
        peers: Arc<Mutex<Vec<NodeId>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every (target, bytes) pair sent so far.
        pub fn sent(&self) -> Vec<(NodeId, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        /// Every gossip broadcast so far.
        pub fn broadcasts(&self) -> Vec<Vec<u8>> {
            self.broadcasts.lock().unwrap().clone()
        }

        pub fn set_peers(&self, peers: Vec<NodeId>) {
            *self.peers.lock().unwrap() = peers;
        }

        /// Make every subsequent send fail (exercises fallback paths).
        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }

        pub fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_raw(&self, target: NodeId, data: &[u8]) -> Result<(), String> {
            if *self.fail_sends.lock().unwrap() {
                return Err("mock: send failed".to_string());
            }
            self.sent.lock().unwrap().push((target, data.to_vec()));
            Ok(())
        }

        async fn broadcast_raw(&self, data: &[u8]) -> Result<(), String> {
            if *self.fail_sends.lock().unwrap() {
                return Err("mock: broadcast failed".to_string());
            }
            self.broadcasts.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn connected_peers(&self) -> Vec<NodeId> {
            self.peers.lock().unwrap().clone()
        }
    }
}

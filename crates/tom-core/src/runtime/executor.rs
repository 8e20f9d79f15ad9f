//! Effect executor — the only place that touches I/O.
//!
//! Takes a list of RuntimeEffect and executes them concretely:
//! - SendEnvelope / SendEnvelopeTo -> transport.send_raw()
//! - DeliverMessage -> msg_tx
//! - StatusChange -> status_tx
//! - Emit -> event_tx
//! - SendWithBackupFallback -> try the send, run on_success or on_failure

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::effect::RuntimeEffect;
use super::transport::Transport;
use super::{DeliveredMessage, ProtocolEvent};

/// Execute a list of effects against the transport and app channels.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<RuntimeEffect>,
    transport: &T,
    msg_tx: &mpsc::Sender<DeliveredMessage>,
    status_tx: &mpsc::Sender<StatusChange>,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    for effect in effects {
        match effect {
            RuntimeEffect::SendEnvelope(envelope) => {
                let target = first_hop(&envelope);
                send_envelope_to(transport, target, &envelope, event_tx).await;
            }
            RuntimeEffect::SendEnvelopeTo { target, envelope } => {
                send_envelope_to(transport, target, &envelope, event_tx).await;
            }
            RuntimeEffect::DeliverMessage(msg) => {
                // try_send: never block the runtime loop. The consumer is
                // responsible for draining fast enough.
                let _ = msg_tx.try_send(msg);
            }
            RuntimeEffect::StatusChange(change) => {
                let _ = status_tx.try_send(change);
            }
            RuntimeEffect::Emit(event) => {
                let _ = event_tx.try_send(event);
            }
            RuntimeEffect::SendWithBackupFallback {
                envelope,
                on_success,
                on_failure,
            } => {
                let target = first_hop(&envelope);
                let sent_ok = match envelope.to_bytes() {
                    Ok(bytes) => transport.send_raw(target, &bytes).await.is_ok(),
                    Err(_) => false,
                };
                let branch = if sent_ok { on_success } else { on_failure };
                Box::pin(execute_effects(branch, transport, msg_tx, status_tx, event_tx)).await;
            }
        }
    }
}

/// First hop for an envelope: the head of the relay chain, or the
/// recipient for a direct send.
fn first_hop(envelope: &Envelope) -> NodeId {
    envelope.via.first().copied().unwrap_or(envelope.to)
}

/// Send an envelope to a specific node, surfacing failures as events.
async fn send_envelope_to<T: Transport>(
    transport: &T,
    target: NodeId,
    envelope: &Envelope,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    match envelope.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = transport.send_raw(target, &bytes).await {
                tracing::debug!(?target, error = %e, "transport send failed");
                let _ = event_tx.try_send(ProtocolEvent::Error {
                    kind: super::ErrorKind::SendFailed,
                    detail: format!("send to {target:?} failed: {e}"),
                });
            }
        }
        Err(e) => {
            let _ = event_tx.try_send(ProtocolEvent::Error {
                kind: super::ErrorKind::Internal,
                detail: format!("serialize envelope failed: {e}"),
            });
        }
    }
}

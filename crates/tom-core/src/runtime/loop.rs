/// The protocol runtime event loop — thin orchestrator.
///
/// Owns RuntimeState + the transport. Multiplexes over inbound frames,
/// application commands, gossip inputs and timers. Delegates all logic
/// to RuntimeState, executes the returned effects via the executor.
///
/// Suspension points live only here and in the executor — handler
/// methods never await, so the state is never borrowed across one.
use tokio::sync::mpsc;

use crate::gossip::GossipInput;
use crate::tracker::StatusChange;
use crate::types::NodeId;

use super::effect::RuntimeEffect;
use super::executor::execute_effects;
use super::state::RuntimeState;
use super::transport::Transport;
use super::{DeliveredMessage, ProtocolEvent, RuntimeCommand};

#[allow(clippy::too_many_arguments)]
pub(super) async fn runtime_loop<T: Transport>(
    transport: T,
    mut state: RuntimeState,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    mut incoming_rx: mpsc::Receiver<(NodeId, Vec<u8>)>,
    mut gossip_rx: mpsc::Receiver<GossipInput>,
    msg_tx: mpsc::Sender<DeliveredMessage>,
    status_tx: mpsc::Sender<StatusChange>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) {
    // ── Timers (intervals from state.config) ────────────────────────
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_send_interval);
    let mut gossip_announce = tokio::time::interval(state.config.gossip_announce_interval);
    let mut subnet_eval = tokio::time::interval(state.config.subnet_evaluation_interval);
    let mut backup_tick = tokio::time::interval(state.config.backup_tick_interval);
    let mut role_eval = tokio::time::interval(state.config.role_evaluation_interval);
    let mut group_hub_heartbeat =
        tokio::time::interval(state.config.group_hub_heartbeat_interval);
    let mut tracker_cleanup = tokio::time::interval(state.config.tracker_cleanup_interval);
    let mut cache_cleanup = tokio::time::interval(state.config.cache_cleanup_interval);

    // Skip the immediate first tick of every interval
    heartbeat.tick().await;
    gossip_announce.tick().await;
    subnet_eval.tick().await;
    backup_tick.tick().await;
    role_eval.tick().await;
    group_hub_heartbeat.tick().await;
    tracker_cleanup.tick().await;
    cache_cleanup.tick().await;

    tracing::info!(local = %state.local_id, "protocol runtime started");

    loop {
        let effects: Vec<RuntimeEffect> = tokio::select! {
            // ── 1. Inbound frames from the transport ────────────
            frame = incoming_rx.recv() => {
                match frame {
                    Some((from, bytes)) => state.handle_incoming(from, &bytes),
                    None => break, // transport side closed
                }
            }

            // ── 2. Commands from the application ────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(RuntimeCommand::Shutdown) | Some(RuntimeCommand::Disconnect) => break,
                    Some(RuntimeCommand::GetTopology { reply }) => {
                        let _ = reply.send(state.topology_snapshot());
                        Vec::new()
                    }
                    Some(RuntimeCommand::GetConnectedPeers { reply }) => {
                        let _ = reply.send(transport.connected_peers().await);
                        Vec::new()
                    }
                    Some(other) => state.handle_command(other),
                }
            }

            // ── 3. Gossip inputs from the signaling layer ───────
            // (pattern-disabled once the bootstrap side closes)
            Some(input) = gossip_rx.recv() => state.handle_gossip_event(input),

            // ── 4. Timer: heartbeats + presence scan ────────────
            _ = heartbeat.tick() => state.tick_heartbeat(),

            // ── 5. Timer: gossip announce ───────────────────────
            _ = gossip_announce.tick() => {
                if let Some(bytes) = state.build_gossip_announce() {
                    if let Err(e) = transport.broadcast_raw(&bytes).await {
                        tracing::debug!("gossip announce broadcast failed: {e}");
                    }
                }
                Vec::new()
            }

            // ── 6. Timer: subnet evaluation ─────────────────────
            _ = subnet_eval.tick() => state.tick_subnets(),

            // ── 7. Timer: backup maintenance ────────────────────
            _ = backup_tick.tick() => state.tick_backup(),

            // ── 8. Timer: role evaluation ───────────────────────
            _ = role_eval.tick() => state.tick_roles(),

            // ── 9. Timer: group hub heartbeat + watchdog ────────
            _ = group_hub_heartbeat.tick() => state.tick_group_hub_heartbeat(),

            // ── 10. Timer: tracker eviction ─────────────────────
            _ = tracker_cleanup.tick() => state.tick_tracker_cleanup(),

            // ── 11. Timer: cache eviction ───────────────────────
            _ = cache_cleanup.tick() => state.tick_cache_cleanup(),
        };

        // The only place effects touch the outside world.
        execute_effects(effects, &transport, &msg_tx, &status_tx, &event_tx).await;
    }

    tracing::info!(local = %state.local_id, "protocol runtime stopped");
}

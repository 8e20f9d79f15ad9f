//! Multi-node group scenarios.
//!
//! The effect pattern makes a network harness trivial: a `Net` holds one
//! `RuntimeState` per node and routes `SendEnvelope*` effects between
//! them as if a lossless transport connected everyone. No mocks, no
//! tasks, no clocks.

use std::collections::HashMap;

use tom_core::{
    now_ms, DeliveredMessage, Identity, PeerInfo, ProtocolEvent, RuntimeCommand, RuntimeConfig,
    RuntimeEffect, RuntimeState, StatusChange,
};

/// Guard against effect loops in a broken implementation.
const MAX_PROCESSED_EFFECTS: usize = 10_000;

struct Net {
    nodes: HashMap<tom_core::NodeId, RuntimeState>,
    events: Vec<(tom_core::NodeId, ProtocolEvent)>,
    messages: Vec<(tom_core::NodeId, DeliveredMessage)>,
    status_changes: Vec<(tom_core::NodeId, StatusChange)>,
}

impl Net {
    /// Build a full mesh: every node knows every other node as Online.
    fn new(seeds: &[u8]) -> Self {
        let identities: Vec<Identity> = seeds.iter().map(|&s| Identity::from_seed([s; 32])).collect();
        let ids: Vec<tom_core::NodeId> = identities.iter().map(|i| i.node_id()).collect();

        let mut nodes = HashMap::new();
        for identity in &identities {
            let mut state = RuntimeState::new(identity, RuntimeConfig::default());
            for &other in ids.iter().filter(|&&id| id != identity.node_id()) {
                state.topology.upsert(PeerInfo::bare(other, now_ms()));
                state.heartbeat.record(other, now_ms());
            }
            nodes.insert(identity.node_id(), state);
        }

        Self {
            nodes,
            events: Vec::new(),
            messages: Vec::new(),
            status_changes: Vec::new(),
        }
    }

    fn node(&mut self, id: tom_core::NodeId) -> &mut RuntimeState {
        self.nodes.get_mut(&id).expect("known node")
    }

    /// Run a command on a node and propagate every resulting effect until
    /// the network is quiet.
    fn command(&mut self, on: tom_core::NodeId, cmd: RuntimeCommand) {
        let effects = self.node(on).handle_command(cmd);
        self.run(on, effects);
    }

    fn run(&mut self, origin: tom_core::NodeId, effects: Vec<RuntimeEffect>) {
        let mut queue: Vec<(tom_core::NodeId, RuntimeEffect)> =
            effects.into_iter().map(|e| (origin, e)).collect();
        let mut processed = 0;

        while !queue.is_empty() {
            let batch = std::mem::take(&mut queue);
            for (node, effect) in batch {
                processed += 1;
                assert!(processed < MAX_PROCESSED_EFFECTS, "effect loop detected");

                match effect {
                    RuntimeEffect::SendEnvelope(envelope) => {
                        let target = envelope.via.first().copied().unwrap_or(envelope.to);
                        queue.extend(self.deliver(node, target, &envelope));
                    }
                    RuntimeEffect::SendEnvelopeTo { target, envelope } => {
                        queue.extend(self.deliver(node, target, &envelope));
                    }
                    RuntimeEffect::SendWithBackupFallback {
                        envelope,
                        on_success,
                        ..
                    } => {
                        // Lossless transport: sends always succeed.
                        let target = envelope.via.first().copied().unwrap_or(envelope.to);
                        queue.extend(self.deliver(node, target, &envelope));
                        queue.extend(on_success.into_iter().map(|e| (node, e)));
                    }
                    RuntimeEffect::DeliverMessage(msg) => self.messages.push((node, msg)),
                    RuntimeEffect::StatusChange(change) => {
                        self.status_changes.push((node, change))
                    }
                    RuntimeEffect::Emit(event) => self.events.push((node, event)),
                }
            }
        }
    }

    fn deliver(
        &mut self,
        from: tom_core::NodeId,
        target: tom_core::NodeId,
        envelope: &tom_core::Envelope,
    ) -> Vec<(tom_core::NodeId, RuntimeEffect)> {
        let Some(state) = self.nodes.get_mut(&target) else {
            return vec![]; // outside the mesh — dropped
        };
        let bytes = envelope.to_bytes().expect("serialize");
        state
            .handle_incoming(from, &bytes)
            .into_iter()
            .map(|e| (target, e))
            .collect()
    }

    fn events_for(&self, node: tom_core::NodeId) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|(n, _)| *n == node)
            .map(|(_, e)| e)
            .collect()
    }
}

fn ids(seeds: &[u8]) -> Vec<tom_core::NodeId> {
    seeds
        .iter()
        .map(|&s| Identity::from_seed([s; 32]).node_id())
        .collect()
}

#[test]
fn chat_roundtrip_with_delivery_status() {
    let mesh = ids(&[1, 2]);
    let (alice, bob) = (mesh[0], mesh[1]);
    let mut net = Net::new(&[1, 2]);

    net.command(
        alice,
        RuntimeCommand::SendMessage {
            to: bob,
            payload: b"hello bob".to_vec(),
        },
    );

    // Bob got exactly one message
    let bob_messages: Vec<_> = net.messages.iter().filter(|(n, _)| *n == bob).collect();
    assert_eq!(bob_messages.len(), 1);
    assert_eq!(bob_messages[0].1.payload, b"hello bob");
    assert!(bob_messages[0].1.was_encrypted);

    // Alice's tracker reached Delivered via Bob's ACK
    let delivered = net
        .status_changes
        .iter()
        .any(|(n, c)| *n == alice && c.current == tom_core::MessageStatus::Delivered);
    assert!(delivered, "status changes: {:?}", net.status_changes);
}

#[test]
fn group_create_invite_accept() {
    let mesh = ids(&[1, 2, 3]);
    let (a, b, c) = (mesh[0], mesh[1], mesh[2]);
    let mut net = Net::new(&[1, 2, 3]);

    net.command(
        a,
        RuntimeCommand::CreateGroup {
            name: "team".into(),
            members: vec![b, c],
        },
    );

    // Both invitees saw the invite
    for node in [b, c] {
        assert!(
            net.events_for(node)
                .iter()
                .any(|e| matches!(e, ProtocolEvent::GroupInviteReceived { .. })),
            "{node:?} should have an invite"
        );
    }

    let group_id = net
        .node(a)
        .groups
        .groups()
        .next()
        .unwrap()
        .group_id
        .clone();

    net.command(b, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.command(c, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });

    for node in [b, c] {
        assert!(
            net.events_for(node)
                .iter()
                .any(|e| matches!(e, ProtocolEvent::GroupJoined { .. })),
            "{node:?} should have joined"
        );
        assert_eq!(net.node(node).groups.group_count(), 1);
    }
}

#[test]
fn group_message_reaches_every_other_member_exactly_once() {
    let mesh = ids(&[1, 2, 3]);
    let (a, b, c) = (mesh[0], mesh[1], mesh[2]);
    let mut net = Net::new(&[1, 2, 3]);

    net.command(
        a,
        RuntimeCommand::CreateGroup {
            name: "team".into(),
            members: vec![b, c],
        },
    );
    let group_id = net
        .node(a)
        .groups
        .groups()
        .next()
        .unwrap()
        .group_id
        .clone();
    net.command(b, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.command(c, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.events.clear();

    net.command(
        a,
        RuntimeCommand::SendGroupMessage {
            group_id: group_id.clone(),
            text: "standup in 5".into(),
        },
    );

    // B and C each receive the message exactly once; the sender never
    // hears its own message back.
    for node in [b, c] {
        let count = net
            .events_for(node)
            .iter()
            .filter(|e| {
                matches!(e, ProtocolEvent::GroupMessage { body, .. } if body == b"standup in 5")
            })
            .count();
        assert_eq!(count, 1, "{node:?} should receive exactly one copy");
    }
    assert!(
        !net.events_for(a)
            .iter()
            .any(|e| matches!(e, ProtocolEvent::GroupMessage { .. })),
        "sender must not receive its own group message"
    );
}

#[test]
fn hub_is_deterministic_across_members() {
    let mesh = ids(&[1, 2, 3]);
    let (a, b, c) = (mesh[0], mesh[1], mesh[2]);
    let mut net = Net::new(&[1, 2, 3]);

    net.command(
        a,
        RuntimeCommand::CreateGroup {
            name: "team".into(),
            members: vec![b, c],
        },
    );
    let group_id = net
        .node(a)
        .groups
        .groups()
        .next()
        .unwrap()
        .group_id
        .clone();
    net.command(b, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.command(c, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });

    // Identical member sets and presence views → identical hub
    let hubs: Vec<_> = [a, b, c]
        .iter()
        .map(|&n| {
            let state = net.node(n);
            state.groups.current_hub(&group_id, &state.topology).unwrap()
        })
        .collect();
    assert_eq!(hubs[0], hubs[1]);
    assert_eq!(hubs[1], hubs[2]);

    let expected = *mesh.iter().min().unwrap();
    assert_eq!(hubs[0], expected, "hub is the smallest online member");
}

#[test]
fn hub_failover_recomputes_consistently() {
    let mesh = ids(&[1, 2, 3]);
    let (a, b, c) = (mesh[0], mesh[1], mesh[2]);
    let mut net = Net::new(&[1, 2, 3]);

    net.command(
        a,
        RuntimeCommand::CreateGroup {
            name: "team".into(),
            members: vec![b, c],
        },
    );
    let group_id = net
        .node(a)
        .groups
        .groups()
        .next()
        .unwrap()
        .group_id
        .clone();
    net.command(b, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.command(c, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });

    let old_hub = {
        let state = net.node(a);
        state.groups.current_hub(&group_id, &state.topology).unwrap()
    };

    // The hub dies: every surviving member marks it offline independently
    let survivors: Vec<_> = mesh.iter().copied().filter(|&n| n != old_hub).collect();
    for &survivor in &survivors {
        let state = net.node(survivor);
        if let Some(peer) = state.topology.get_mut(&old_hub) {
            peer.status = tom_core::PeerStatus::Offline;
        }
    }

    // Zero coordination: all survivors land on the same new hub
    let new_hubs: Vec<_> = survivors
        .iter()
        .map(|&n| {
            let state = net.node(n);
            state.groups.current_hub(&group_id, &state.topology).unwrap()
        })
        .collect();
    assert!(new_hubs.iter().all(|&h| h == new_hubs[0]));
    assert_ne!(new_hubs[0], old_hub);
    assert_eq!(
        new_hubs[0],
        *survivors.iter().min().unwrap(),
        "next-smallest online member takes over"
    );
}

#[test]
fn owner_leaving_dissolves_group_everywhere() {
    let mesh = ids(&[1, 2, 3]);
    let (a, b, c) = (mesh[0], mesh[1], mesh[2]);
    let mut net = Net::new(&[1, 2, 3]);

    net.command(
        a,
        RuntimeCommand::CreateGroup {
            name: "team".into(),
            members: vec![b, c],
        },
    );
    let group_id = net
        .node(a)
        .groups
        .groups()
        .next()
        .unwrap()
        .group_id
        .clone();
    net.command(b, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });
    net.command(c, RuntimeCommand::AcceptInvite { group_id: group_id.clone() });

    // Owner A leaves
    net.command(a, RuntimeCommand::LeaveGroup { group_id: group_id.clone() });

    // Everyone dissolves: the leaver locally, the hub on receipt, the
    // remaining spokes via the hub's rebroadcast.
    for node in [a, b, c] {
        assert_eq!(
            net.node(node).groups.group_count(),
            0,
            "{node:?} should have dissolved the group"
        );
    }
}

#[test]
fn read_receipt_travels_back() {
    let mesh = ids(&[1, 2]);
    let (alice, bob) = (mesh[0], mesh[1]);
    let mut net = Net::new(&[1, 2]);

    net.command(
        alice,
        RuntimeCommand::SendMessage {
            to: bob,
            payload: b"read me".to_vec(),
        },
    );

    let (_, delivered) = net
        .messages
        .iter()
        .find(|(n, _)| *n == bob)
        .cloned()
        .expect("bob got the message");

    net.command(
        bob,
        RuntimeCommand::SendReadReceipt {
            to: alice,
            message_id: delivered.envelope_id.clone(),
        },
    );

    assert_eq!(
        net.node(alice).tracker.status(&delivered.envelope_id),
        Some(tom_core::MessageStatus::Read)
    );
}

use std::collections::{BTreeSet, HashSet, VecDeque};
use worldnet_common::PeerId;

use crate::action::{ActionEnvelope, ActionError, ActionId, Destination, NetworkTarget};
use crate::codec::{self, CodecError};
use crate::network::NetworkRegistry;
use crate::topic::{OutgoingFrame, TopicRegistry};

/// Counters for instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub dispatched: u64,
    pub received: u64,
    pub applied: u64,
    pub dropped_stale: u64,
    pub dropped_duplicate: u64,
    pub dropped_misaddressed: u64,
}

/// Queues actions for local application and for transmission.
///
/// Incoming actions are held in one arrival-ordered queue, which gives
/// per-network FIFO. When an action must wait (world not ready, tick budget
/// spent) every later action of the same network waits behind it.
#[derive(Debug)]
pub struct ActionBus {
    local_peer: PeerId,
    next_seq: u64,
    incoming: VecDeque<ActionEnvelope>,
    topics: TopicRegistry,
    seen: HashSet<ActionId>,
    seen_order: VecDeque<ActionId>,
    dedup_window: usize,
    stats: BusStats,
}

impl ActionBus {
    pub fn new(local_peer: PeerId, dedup_window: usize) -> Self {
        Self {
            local_peer,
            next_seq: 0,
            incoming: VecDeque::new(),
            topics: TopicRegistry::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            dedup_window: dedup_window.max(1),
            stats: BusStats::default(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn topics_mut(&mut self) -> &mut TopicRegistry {
        &mut self.topics
    }

    /// Number of actions waiting for local application.
    pub fn pending_incoming(&self) -> usize {
        self.incoming.len()
    }

    /// Validate, stamp and enqueue a locally-authored action.
    ///
    /// Network-scoped actions get the local peer as origin when none is set
    /// and are queued for transmission; `Local` ones keep `from: None` and
    /// never leave the process. Invalid actions are not enqueued.
    pub fn dispatch(
        &mut self,
        mut envelope: ActionEnvelope,
        networks: &NetworkRegistry,
        tick: u64,
    ) -> Result<ActionId, ActionError> {
        envelope.validate()?;
        if let NetworkTarget::Network(id) = &envelope.network {
            if let Some(network) = networks.get(id) {
                if network.topic() != envelope.topic {
                    return Err(ActionError::TopicMismatch {
                        network: id.clone(),
                        expected: network.topic(),
                        actual: envelope.topic,
                    });
                }
            }
            if envelope.from.is_none() {
                envelope.from = Some(self.local_peer.clone());
            }
        }

        self.next_seq += 1;
        let id = ActionId {
            origin: self.local_peer.clone(),
            seq: self.next_seq,
        };
        envelope.id = Some(id.clone());
        envelope.tick = tick;

        if let NetworkTarget::Network(network) = &envelope.network {
            let remote = match &envelope.to {
                Destination::All => true,
                Destination::Peer(p) => *p != self.local_peer,
            };
            if remote {
                let payload =
                    codec::encode_action(&envelope).map_err(|e| ActionError::Encode(e.to_string()))?;
                self.topics.enqueue(OutgoingFrame {
                    topic: envelope.topic,
                    network: network.clone(),
                    to: envelope.to.clone(),
                    payload,
                });
            }
        }

        tracing::trace!(kind = envelope.action.kind(), seq = id.seq, network = ?envelope.network, "dispatched");
        self.stats.dispatched += 1;
        if envelope.is_addressed_to(&self.local_peer) {
            self.incoming.push_back(envelope);
        }
        Ok(id)
    }

    /// Enqueue an action that arrived from a remote peer.
    ///
    /// Returns false when the action was discarded: it carried no id or no
    /// origin, targets `Local`, failed validation, or is addressed to
    /// another peer.
    pub fn receive(&mut self, envelope: ActionEnvelope) -> bool {
        if envelope.id.is_none() {
            tracing::warn!(kind = envelope.action.kind(), "dropping remote action without id");
            return false;
        }
        if envelope.network == NetworkTarget::Local {
            tracing::warn!(kind = envelope.action.kind(), "dropping remote action scoped to Local");
            return false;
        }
        if envelope.from.is_none() {
            tracing::warn!(kind = envelope.action.kind(), "dropping remote action without origin");
            return false;
        }
        if let Err(error) = envelope.validate() {
            tracing::warn!(%error, "dropping invalid remote action");
            return false;
        }
        if !envelope.is_addressed_to(&self.local_peer) {
            self.stats.dropped_misaddressed += 1;
            return false;
        }
        self.stats.received += 1;
        self.incoming.push_back(envelope);
        true
    }

    /// Decode and enqueue a serialized remote action.
    pub fn receive_bytes(&mut self, data: &[u8]) -> Result<bool, CodecError> {
        let envelope = codec::decode_action(data)?;
        Ok(self.receive(envelope))
    }

    /// Take the actions that can be applied now, in arrival order.
    ///
    /// Actions whose network is no longer registered are dropped. Actions
    /// already applied once are dropped. Entity actions wait while their
    /// network is not ready, and `budget` caps how many are returned (at
    /// least one).
    pub fn drain_incoming(
        &mut self,
        networks: &NetworkRegistry,
        budget: Option<usize>,
    ) -> Vec<ActionEnvelope> {
        // A zero budget would stall the queue forever.
        let budget = budget.map(|b| b.max(1));
        let mut ready = Vec::new();
        let mut held = VecDeque::new();
        let mut blocked: BTreeSet<NetworkTarget> = BTreeSet::new();

        while let Some(envelope) = self.incoming.pop_front() {
            if budget.is_some_and(|b| ready.len() >= b) {
                held.push_back(envelope);
                held.extend(self.incoming.drain(..));
                break;
            }
            if blocked.contains(&envelope.network) {
                held.push_back(envelope);
                continue;
            }
            if let NetworkTarget::Network(id) = &envelope.network {
                if !networks.contains(id) {
                    tracing::warn!(network = %id, kind = envelope.action.kind(), "dropping action for absent network");
                    self.stats.dropped_stale += 1;
                    continue;
                }
            }
            if envelope.action.requires_ready() && !Self::target_ready(networks, &envelope.network) {
                blocked.insert(envelope.network.clone());
                held.push_back(envelope);
                continue;
            }
            if let Some(id) = &envelope.id {
                if !self.mark_seen(id.clone()) {
                    tracing::debug!(origin = %id.origin, seq = id.seq, "dropping duplicate action");
                    self.stats.dropped_duplicate += 1;
                    continue;
                }
            }
            self.stats.applied += 1;
            ready.push(envelope);
        }

        self.incoming = held;
        ready
    }

    /// Take every encoded frame awaiting transmission.
    pub fn drain_outgoing(&mut self) -> Vec<OutgoingFrame> {
        self.topics.drain()
    }

    fn target_ready(networks: &NetworkRegistry, target: &NetworkTarget) -> bool {
        match target {
            NetworkTarget::Local => networks.is_world_ready(),
            NetworkTarget::Network(id) => networks.get(id).is_some_and(|n| n.ready()),
        }
    }

    /// Record an id. Returns false if it was already recorded.
    fn mark_seen(&mut self, id: ActionId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > self.dedup_window {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::WorldAction;
    use crate::network::Network;
    use worldnet_common::{NetworkId, PeerIndex, Topic, Transform, UserId, UserIndex};

    fn spawn(uuid: &str) -> WorldAction {
        WorldAction::SpawnEntity {
            entity_uuid: uuid.into(),
            parent_uuid: None,
            owner_id: "alice".into(),
            authority_peer_id: None,
            transform: Transform::default(),
            source: None,
        }
    }

    fn joined(peer: &str) -> WorldAction {
        WorldAction::PeerJoined {
            peer_id: peer.into(),
            peer_index: PeerIndex(2),
            user_id: "bob".into(),
            user_index: UserIndex(2),
        }
    }

    fn registry(ids: &[(&str, Topic, bool)]) -> NetworkRegistry {
        let mut r = NetworkRegistry::new();
        for (id, topic, ready) in ids {
            let mut n = Network::new((*id).into(), None, *topic);
            n.set_ready(*ready);
            r.add_network(n).unwrap();
        }
        r
    }

    fn uuids(actions: &[ActionEnvelope]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| a.action.entity_uuid().map(|u| u.0.clone()))
            .collect()
    }

    #[test]
    fn dispatch_stamps_provenance() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        let id = bus
            .dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn("a")), &networks, 7)
            .unwrap();
        assert_eq!(id.origin, PeerId::from("me"));

        let applied = bus.drain_incoming(&networks, None);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].from, Some(PeerId::from("me")));
        assert_eq!(applied[0].tick, 7);
        assert_eq!(applied[0].id, Some(id));
    }

    #[test]
    fn local_actions_keep_no_origin_and_stay_local() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::local(spawn("a")), &networks, 0).unwrap();
        assert!(bus.drain_outgoing().is_empty());
        let applied = bus.drain_incoming(&networks, None);
        assert_eq!(applied[0].from, None);
    }

    #[test]
    fn invalid_action_is_rejected_not_enqueued() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        let err = bus
            .dispatch(ActionEnvelope::on_network("".into(), Topic::World, spawn("a")), &networks, 0)
            .unwrap_err();
        assert_eq!(err, ActionError::MissingNetwork);
        assert_eq!(bus.pending_incoming(), 0);
        assert!(bus.drain_outgoing().is_empty());
    }

    #[test]
    fn topic_mismatch_is_rejected() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        let err = bus
            .dispatch(ActionEnvelope::on_network("w".into(), Topic::Media, spawn("a")), &networks, 0)
            .unwrap_err();
        assert!(matches!(err, ActionError::TopicMismatch { .. }));
    }

    #[test]
    fn network_actions_are_queued_for_transmission() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn("a")), &networks, 0)
            .unwrap();
        bus.dispatch(
            ActionEnvelope::on_network("w".into(), Topic::World, spawn("b")).to_peer("me".into()),
            &networks,
            0,
        )
        .unwrap();
        bus.dispatch(
            ActionEnvelope::on_network("w".into(), Topic::World, spawn("c")).to_peer("other".into()),
            &networks,
            0,
        )
        .unwrap();

        let frames = bus.drain_outgoing();
        assert_eq!(frames.len(), 2);
        assert!(bus.topics().has_outgoing(Topic::World));
        let sent = codec::decode_action(&frames[1].payload).unwrap();
        assert_eq!(sent.to, Destination::Peer("other".into()));
        // Only actions addressed to us are applied locally.
        assert_eq!(uuids(&bus.drain_incoming(&networks, None)), vec!["a", "b"]);
    }

    #[test]
    fn per_network_fifo_across_interleaving() {
        let networks = registry(&[("w", Topic::World, true), ("m", Topic::Media, true)]);
        let mut bus = ActionBus::new("me".into(), 64);
        let order = [("w", "w1"), ("m", "m1"), ("w", "w2"), ("m", "m2"), ("w", "w3")];
        for (net, uuid) in order {
            let topic = if net == "w" { Topic::World } else { Topic::Media };
            bus.dispatch(ActionEnvelope::on_network(net.into(), topic, spawn(uuid)), &networks, 0)
                .unwrap();
        }
        let applied = bus.drain_incoming(&networks, None);
        let on = |net: &str| -> Vec<String> {
            applied
                .iter()
                .filter(|a| a.network_id() == Some(&NetworkId::from(net)))
                .filter_map(|a| a.action.entity_uuid().map(|u| u.0.clone()))
                .collect()
        };
        assert_eq!(on("w"), vec!["w1", "w2", "w3"]);
        assert_eq!(on("m"), vec!["m1", "m2"]);
    }

    #[test]
    fn action_for_removed_network_is_dropped() {
        let mut networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn("a")), &networks, 0)
            .unwrap();
        networks.remove_network(&"w".into());

        assert!(bus.drain_incoming(&networks, None).is_empty());
        assert_eq!(bus.pending_incoming(), 0);
        assert_eq!(bus.stats().dropped_stale, 1);
    }

    #[test]
    fn entity_actions_wait_for_ready_in_order() {
        let mut networks = registry(&[("w", Topic::World, false)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn("a")), &networks, 0)
            .unwrap();
        bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, joined("p2")), &networks, 0)
            .unwrap();

        // The join queued behind the held spawn must wait too.
        assert!(bus.drain_incoming(&networks, None).is_empty());
        assert_eq!(bus.pending_incoming(), 2);

        networks.get_mut(&"w".into()).unwrap().set_ready(true);
        let applied = bus.drain_incoming(&networks, None);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].action.kind(), "spawn_entity");
        assert_eq!(applied[1].action.kind(), "peer_joined");
    }

    #[test]
    fn peer_actions_pass_before_ready() {
        let networks = registry(&[("w", Topic::World, false)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, joined("p2")), &networks, 0)
            .unwrap();
        assert_eq!(bus.drain_incoming(&networks, None).len(), 1);
    }

    #[test]
    fn budget_defers_the_rest() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        for uuid in ["a", "b", "c"] {
            bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn(uuid)), &networks, 0)
                .unwrap();
        }
        assert_eq!(uuids(&bus.drain_incoming(&networks, Some(2))), vec!["a", "b"]);
        assert_eq!(uuids(&bus.drain_incoming(&networks, Some(2))), vec!["c"]);
    }

    #[test]
    fn duplicate_delivery_is_applied_once() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut sender = ActionBus::new("them".into(), 16);
        sender
            .dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn("a")), &networks, 0)
            .unwrap();
        let frame = sender.drain_outgoing().remove(0);

        let mut bus = ActionBus::new("me".into(), 16);
        assert!(bus.receive_bytes(&frame.payload).unwrap());
        assert!(bus.receive_bytes(&frame.payload).unwrap());
        assert_eq!(bus.drain_incoming(&networks, None).len(), 1);
        assert_eq!(bus.stats().dropped_duplicate, 1);
    }

    #[test]
    fn dedup_window_is_bounded() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut sender = ActionBus::new("them".into(), 16);
        for uuid in ["a", "b", "c"] {
            sender
                .dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn(uuid)), &networks, 0)
                .unwrap();
        }
        let frames = sender.drain_outgoing();

        let mut bus = ActionBus::new("me".into(), 2);
        for f in &frames {
            bus.receive_bytes(&f.payload).unwrap();
        }
        assert_eq!(bus.drain_incoming(&networks, None).len(), 3);
        // "a" fell out of the window; redelivery is no longer caught here and
        // must be tolerated by the handler.
        bus.receive_bytes(&frames[0].payload).unwrap();
        assert_eq!(bus.drain_incoming(&networks, None).len(), 1);
    }

    #[test]
    fn remote_actions_for_other_peers_are_ignored() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        let mut env = ActionEnvelope::on_network("w".into(), Topic::World, spawn("a"))
            .to_peer("someone-else".into())
            .from_peer("them".into());
        env.id = Some(ActionId {
            origin: "them".into(),
            seq: 1,
        });
        assert!(!bus.receive(env.clone()));

        env.id = None;
        env.to = Destination::All;
        assert!(!bus.receive(env));
        assert_eq!(bus.pending_incoming(), 0);
    }

    #[test]
    fn zero_budget_still_makes_progress() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        for uuid in ["a", "b"] {
            bus.dispatch(ActionEnvelope::on_network("w".into(), Topic::World, spawn(uuid)), &networks, 0)
                .unwrap();
        }
        assert_eq!(uuids(&bus.drain_incoming(&networks, Some(0))), vec!["a"]);
        assert_eq!(uuids(&bus.drain_incoming(&networks, Some(0))), vec!["b"]);
    }

    #[test]
    fn remote_actions_need_origin_and_network() {
        let mut bus = ActionBus::new("me".into(), 16);
        let id = ActionId {
            origin: "them".into(),
            seq: 1,
        };

        let mut unstamped = ActionEnvelope::on_network("w".into(), Topic::World, spawn("a"));
        unstamped.id = Some(id.clone());
        assert!(!bus.receive(unstamped.clone()));

        let mut local = ActionEnvelope::local(spawn("a")).from_peer("them".into());
        local.id = Some(id);
        assert!(!bus.receive(local));

        assert!(bus.receive(unstamped.from_peer("them".into())));
        assert_eq!(bus.pending_incoming(), 1);
    }

    #[test]
    fn owner_id_is_carried() {
        let networks = registry(&[("w", Topic::World, true)]);
        let mut bus = ActionBus::new("me".into(), 16);
        bus.dispatch(ActionEnvelope::local(spawn("a")), &networks, 0).unwrap();
        let applied = bus.drain_incoming(&networks, None);
        match &applied[0].action {
            WorldAction::SpawnEntity { owner_id, .. } => assert_eq!(*owner_id, UserId::from("alice")),
            other => panic!("unexpected action {other:?}"),
        }
    }
}

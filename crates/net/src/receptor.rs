use worldnet_common::{NetworkId, Topic};

use crate::action::{ActionEnvelope, NetworkTarget, WorldAction};
use crate::network::NetworkRegistry;
use crate::peer::NetworkPeer;

/// Outcome of applying a join or leave to the peer registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
    Joined {
        network: NetworkId,
        peer: NetworkPeer,
    },
    Left {
        network: NetworkId,
        peer: NetworkPeer,
        /// The user has no peers left on the network.
        user_gone: bool,
    },
}

/// Apply `PeerJoined` / `PeerLeft` to the receiving peer's registry.
///
/// Both are idempotent: a join for a known peer and a leave for an unknown
/// peer change nothing and return `None`. `Local` actions apply to the world
/// network. Other action kinds are ignored.
pub fn apply_peer_action(
    networks: &mut NetworkRegistry,
    envelope: &ActionEnvelope,
) -> Option<PeerChange> {
    let network = match &envelope.network {
        NetworkTarget::Network(id) => networks.get_mut(id)?,
        NetworkTarget::Local => networks.network_for_topic_mut(Topic::World)?,
    };
    match &envelope.action {
        WorldAction::PeerJoined {
            peer_id,
            peer_index,
            user_id,
            user_index,
        } => {
            if network.has_peer(peer_id) {
                tracing::debug!(network = %network.id(), peer = %peer_id, "peer already joined");
                return None;
            }
            if let Err(error) =
                network.create_peer(peer_id.clone(), *peer_index, user_id.clone(), *user_index)
            {
                tracing::warn!(network = %network.id(), %error, "rejected peer join");
                return None;
            }
            let peer = network.peer(peer_id)?.clone();
            Some(PeerChange::Joined {
                network: network.id().clone(),
                peer,
            })
        }
        WorldAction::PeerLeft { peer_id, .. } => {
            let peer = network.destroy_peer(peer_id)?;
            let user_gone = !network.has_user(&peer.user_id);
            Some(PeerChange::Left {
                network: network.id().clone(),
                peer,
                user_gone,
            })
        }
        WorldAction::SpawnEntity { .. }
        | WorldAction::DestroyEntity { .. }
        | WorldAction::RequestAuthority { .. }
        | WorldAction::TransferAuthority { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use worldnet_common::{PeerId, PeerIndex, UserId, UserIndex};

    fn setup() -> NetworkRegistry {
        let mut r = NetworkRegistry::new();
        r.add_network(Network::new("n".into(), Some("host".into()), Topic::World))
            .unwrap();
        r
    }

    fn joined(peer: &str, index: u32, user: &str) -> ActionEnvelope {
        ActionEnvelope::on_network(
            "n".into(),
            Topic::World,
            WorldAction::PeerJoined {
                peer_id: peer.into(),
                peer_index: PeerIndex(index),
                user_id: user.into(),
                user_index: UserIndex(index),
            },
        )
    }

    fn left(peer: &str, user: &str) -> ActionEnvelope {
        ActionEnvelope::on_network(
            "n".into(),
            Topic::World,
            WorldAction::PeerLeft {
                peer_id: peer.into(),
                user_id: user.into(),
            },
        )
    }

    #[test]
    fn join_then_leave_leaves_no_entry() {
        let mut r = setup();
        let change = apply_peer_action(&mut r, &joined("pa", 1, "ua")).unwrap();
        assert!(matches!(change, PeerChange::Joined { .. }));
        assert!(r.get(&"n".into()).unwrap().has_peer(&PeerId::from("pa")));

        let change = apply_peer_action(&mut r, &left("pa", "ua")).unwrap();
        assert!(matches!(change, PeerChange::Left { user_gone: true, .. }));
        let n = r.get(&"n".into()).unwrap();
        assert!(!n.has_peer(&PeerId::from("pa")));
        assert!(!n.has_user(&UserId::from("ua")));
        assert!(n.peer_by_index(PeerIndex(1)).is_none());
    }

    #[test]
    fn redelivered_join_and_leave_are_noops() {
        let mut r = setup();
        apply_peer_action(&mut r, &joined("pa", 1, "ua")).unwrap();
        assert!(apply_peer_action(&mut r, &joined("pa", 1, "ua")).is_none());
        apply_peer_action(&mut r, &left("pa", "ua")).unwrap();
        assert!(apply_peer_action(&mut r, &left("pa", "ua")).is_none());
    }

    #[test]
    fn conflicting_join_is_rejected_without_panic() {
        let mut r = setup();
        apply_peer_action(&mut r, &joined("pa", 1, "ua")).unwrap();
        assert!(apply_peer_action(&mut r, &joined("pb", 1, "ub")).is_none());
        assert_eq!(r.get(&"n".into()).unwrap().peer_count(), 1);
    }

    #[test]
    fn leave_of_one_of_several_peers_keeps_user() {
        let mut r = setup();
        apply_peer_action(&mut r, &joined("pa", 1, "ua")).unwrap();
        let mut second = joined("pa2", 2, "ua");
        if let WorldAction::PeerJoined { user_index, .. } = &mut second.action {
            *user_index = UserIndex(1);
        }
        apply_peer_action(&mut r, &second).unwrap();
        let change = apply_peer_action(&mut r, &left("pa", "ua")).unwrap();
        assert!(matches!(change, PeerChange::Left { user_gone: false, .. }));
    }

    #[test]
    fn absent_network_is_ignored() {
        let mut r = NetworkRegistry::new();
        assert!(apply_peer_action(&mut r, &joined("pa", 1, "ua")).is_none());
    }
}

use std::collections::BTreeMap;
use worldnet_common::{NetworkId, PeerId, PeerIndex, Topic, UserId, UserIndex};

use crate::peer::{NetworkPeer, PeerError, lowest_free};

/// Errors from network registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("network {0} is already registered")]
    DuplicateNetwork(NetworkId),
    #[error("topic {topic} is already served by network {existing}")]
    TopicOccupied { topic: Topic, existing: NetworkId },
    #[error("network id must not be empty")]
    EmptyNetworkId,
}

/// One logical multiplayer session scope: a topic, an optional host and the
/// peers admitted to it.
#[derive(Debug, Clone)]
pub struct Network {
    id: NetworkId,
    topic: Topic,
    host_peer_id: Option<PeerId>,
    host_user_id: Option<UserId>,
    peers: BTreeMap<PeerId, NetworkPeer>,
    users: BTreeMap<UserId, Vec<PeerId>>,
    peer_index_to_peer_id: BTreeMap<PeerIndex, PeerId>,
    user_index_to_user_id: BTreeMap<UserIndex, UserId>,
    user_id_to_user_index: BTreeMap<UserId, UserIndex>,
    ready: bool,
}

impl Network {
    /// Construct a network. It is not registered until passed to
    /// [`NetworkRegistry::add_network`].
    ///
    /// `host_peer_id` is `None` for host-less peer-to-peer sessions.
    pub fn new(id: NetworkId, host_peer_id: Option<PeerId>, topic: Topic) -> Self {
        Self {
            id,
            topic,
            host_peer_id,
            host_user_id: None,
            peers: BTreeMap::new(),
            users: BTreeMap::new(),
            peer_index_to_peer_id: BTreeMap::new(),
            user_index_to_user_id: BTreeMap::new(),
            user_id_to_user_index: BTreeMap::new(),
            ready: false,
        }
    }

    /// Record the user the host peer acts for.
    pub fn with_host_user(mut self, host_user_id: UserId) -> Self {
        self.host_user_id = Some(host_user_id);
        self
    }

    /// Registry key of this network.
    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Topic this network serves.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Host peer; `None` on host-less networks.
    pub fn host_peer_id(&self) -> Option<&PeerId> {
        self.host_peer_id.as_ref()
    }

    /// User of the host peer, when known.
    pub fn host_user_id(&self) -> Option<&UserId> {
        self.host_user_id.as_ref()
    }

    /// Whether `peer_id` hosts this network.
    pub fn is_host(&self, peer_id: &PeerId) -> bool {
        self.host_peer_id.as_ref() == Some(peer_id)
    }

    /// Whether entity actions may be applied on this network.
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Open or close the network for entity actions.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Live peers keyed by id.
    pub fn peers(&self) -> &BTreeMap<PeerId, NetworkPeer> {
        &self.peers
    }

    /// Live peer with `peer_id`.
    pub fn peer(&self, peer_id: &PeerId) -> Option<&NetworkPeer> {
        self.peers.get(peer_id)
    }

    /// Whether `peer_id` is joined.
    pub fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Live peer holding `index`.
    pub fn peer_by_index(&self, index: PeerIndex) -> Option<&NetworkPeer> {
        self.peer_index_to_peer_id
            .get(&index)
            .and_then(|id| self.peers.get(id))
    }

    /// User holding `index`.
    pub fn user_by_index(&self, index: UserIndex) -> Option<&UserId> {
        self.user_index_to_user_id.get(&index)
    }

    /// Index held by `user_id`.
    pub fn user_index_of(&self, user_id: &UserId) -> Option<UserIndex> {
        self.user_id_to_user_index.get(user_id).copied()
    }

    /// Live peers of a user, in join order.
    pub fn peers_for_user(&self, user_id: &UserId) -> &[PeerId] {
        self.users.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `user_id` has at least one live peer.
    pub fn has_user(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Indices a new peer of `user_id` would receive: the lowest free peer
    /// index, and the user's existing index or the lowest free user index.
    pub fn next_indices(&self, user_id: &UserId) -> (PeerIndex, UserIndex) {
        let peer_index = lowest_free(|i| self.peer_index_to_peer_id.contains_key(&PeerIndex(i)));
        let user_index = self.user_index_of(user_id).unwrap_or_else(|| {
            UserIndex(lowest_free(|i| {
                self.user_index_to_user_id.contains_key(&UserIndex(i))
            }))
        });
        (PeerIndex(peer_index), user_index)
    }

    /// Admit a peer. The caller allocates the indices.
    ///
    /// Duplicates are rejected rather than overwritten.
    pub fn create_peer(
        &mut self,
        peer_id: PeerId,
        peer_index: PeerIndex,
        user_id: UserId,
        user_index: UserIndex,
    ) -> Result<(), PeerError> {
        if peer_id.is_empty() {
            return Err(PeerError::EmptyIdentifier("peer_id"));
        }
        if user_id.is_empty() {
            return Err(PeerError::EmptyIdentifier("user_id"));
        }
        if self.peers.contains_key(&peer_id) {
            return Err(PeerError::DuplicatePeer(peer_id));
        }
        if let Some(holder) = self.peer_index_to_peer_id.get(&peer_index) {
            return Err(PeerError::PeerIndexInUse {
                index: peer_index,
                holder: holder.clone(),
            });
        }
        if let Some(holder) = self.user_index_to_user_id.get(&user_index) {
            if *holder != user_id {
                return Err(PeerError::UserIndexInUse {
                    index: user_index,
                    holder: holder.clone(),
                });
            }
        }
        if let Some(existing) = self.user_index_of(&user_id) {
            if existing != user_index {
                return Err(PeerError::UserIndexMismatch {
                    user: user_id,
                    existing,
                });
            }
        }

        tracing::debug!(network = %self.id, peer = %peer_id, ?peer_index, user = %user_id, "peer joined");
        self.peer_index_to_peer_id.insert(peer_index, peer_id.clone());
        self.user_index_to_user_id.insert(user_index, user_id.clone());
        self.user_id_to_user_index.insert(user_id.clone(), user_index);
        self.users
            .entry(user_id.clone())
            .or_default()
            .push(peer_id.clone());
        self.peers.insert(
            peer_id.clone(),
            NetworkPeer {
                peer_id,
                peer_index,
                user_id,
                user_index,
            },
        );
        Ok(())
    }

    /// Remove a peer, releasing its peer index. The user entry and its index
    /// go away with the user's last peer.
    pub fn destroy_peer(&mut self, peer_id: &PeerId) -> Option<NetworkPeer> {
        let peer = self.peers.remove(peer_id)?;
        self.peer_index_to_peer_id.remove(&peer.peer_index);
        if let Some(list) = self.users.get_mut(&peer.user_id) {
            list.retain(|p| p != peer_id);
            if list.is_empty() {
                self.users.remove(&peer.user_id);
                self.user_id_to_user_index.remove(&peer.user_id);
                self.user_index_to_user_id.remove(&peer.user_index);
            }
        }
        tracing::debug!(network = %self.id, peer = %peer_id, "peer left");
        Some(peer)
    }
}

/// Keyed collection of registered networks plus the per-topic host ids.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<NetworkId, Network>,
    host_ids: BTreeMap<Topic, NetworkId>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network and make it the one serving its topic.
    pub fn add_network(&mut self, network: Network) -> Result<(), NetworkError> {
        if network.id.is_empty() {
            return Err(NetworkError::EmptyNetworkId);
        }
        if self.networks.contains_key(&network.id) {
            return Err(NetworkError::DuplicateNetwork(network.id.clone()));
        }
        if let Some(existing) = self.host_ids.get(&network.topic) {
            return Err(NetworkError::TopicOccupied {
                topic: network.topic,
                existing: existing.clone(),
            });
        }
        tracing::debug!(network = %network.id, topic = %network.topic, "network added");
        self.host_ids.insert(network.topic, network.id.clone());
        self.networks.insert(network.id.clone(), network);
        Ok(())
    }

    /// Deregister a network. Later lookups for its id report absent.
    pub fn remove_network(&mut self, id: &NetworkId) -> Option<Network> {
        let network = self.networks.remove(id)?;
        if self.host_ids.get(&network.topic) == Some(id) {
            self.host_ids.remove(&network.topic);
        }
        tracing::debug!(network = %id, topic = %network.topic, "network removed");
        Some(network)
    }

    /// Network registered under `id`.
    pub fn get(&self, id: &NetworkId) -> Option<&Network> {
        self.networks.get(id)
    }

    pub fn get_mut(&mut self, id: &NetworkId) -> Option<&mut Network> {
        self.networks.get_mut(id)
    }

    pub fn contains(&self, id: &NetworkId) -> bool {
        self.networks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Id of the network currently serving `topic`.
    pub fn host_id(&self, topic: Topic) -> Option<&NetworkId> {
        self.host_ids.get(&topic)
    }

    /// Topic to serving-network map.
    pub fn host_ids(&self) -> &BTreeMap<Topic, NetworkId> {
        &self.host_ids
    }

    /// Network serving `topic`.
    pub fn network_for_topic(&self, topic: Topic) -> Option<&Network> {
        self.host_ids.get(&topic).and_then(|id| self.networks.get(id))
    }

    pub fn network_for_topic_mut(&mut self, topic: Topic) -> Option<&mut Network> {
        let id = self.host_ids.get(&topic)?;
        self.networks.get_mut(id)
    }

    /// Network serving the world topic.
    pub fn world_network(&self) -> Option<&Network> {
        self.network_for_topic(Topic::World)
    }

    pub fn world_network_mut(&mut self) -> Option<&mut Network> {
        self.network_for_topic_mut(Topic::World)
    }

    /// Network serving the media topic.
    pub fn media_network(&self) -> Option<&Network> {
        self.network_for_topic(Topic::Media)
    }

    /// Whether the world network exists and has been marked ready.
    pub fn is_world_ready(&self) -> bool {
        self.world_network().is_some_and(Network::ready)
    }
}

//! Typed action records and their provenance envelope.
//!
//! Every cross-peer-visible mutation is expressed as a [`WorldAction`]. The
//! envelope carries where it came from, which network and topic it targets,
//! and which peers should apply it.

use serde::{Deserialize, Serialize};
use worldnet_common::{EntityUuid, NetworkId, PeerId, PeerIndex, Topic, Transform, UserId, UserIndex};

/// Unique identity of a dispatched action: origin peer plus a per-origin
/// sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId {
    pub origin: PeerId,
    pub seq: u64,
}

/// Network an action is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkTarget {
    /// Apply on this process only; never transmitted.
    Local,
    Network(NetworkId),
}

/// Peers an action is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Every peer of the target network, including the sender.
    All,
    Peer(PeerId),
}

/// A world mutation. Closed set so handlers are checked for exhaustiveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldAction {
    PeerJoined {
        peer_id: PeerId,
        peer_index: PeerIndex,
        user_id: UserId,
        user_index: UserIndex,
    },
    PeerLeft {
        peer_id: PeerId,
        user_id: UserId,
    },
    SpawnEntity {
        entity_uuid: EntityUuid,
        parent_uuid: Option<EntityUuid>,
        owner_id: UserId,
        /// Defaults to the action's origin peer when absent.
        authority_peer_id: Option<PeerId>,
        transform: Transform,
        /// Scene source for scene-derived entities.
        source: Option<String>,
    },
    DestroyEntity {
        entity_uuid: EntityUuid,
    },
    RequestAuthority {
        entity_uuid: EntityUuid,
        requester: PeerId,
    },
    TransferAuthority {
        entity_uuid: EntityUuid,
        new_authority: PeerId,
    },
}

impl WorldAction {
    pub fn kind(&self) -> &'static str {
        match self {
            WorldAction::PeerJoined { .. } => "peer_joined",
            WorldAction::PeerLeft { .. } => "peer_left",
            WorldAction::SpawnEntity { .. } => "spawn_entity",
            WorldAction::DestroyEntity { .. } => "destroy_entity",
            WorldAction::RequestAuthority { .. } => "request_authority",
            WorldAction::TransferAuthority { .. } => "transfer_authority",
        }
    }

    /// Entity actions wait for the world network to be ready.
    pub fn requires_ready(&self) -> bool {
        !matches!(
            self,
            WorldAction::PeerJoined { .. } | WorldAction::PeerLeft { .. }
        )
    }

    /// The entity this action concerns, if any.
    pub fn entity_uuid(&self) -> Option<&EntityUuid> {
        match self {
            WorldAction::SpawnEntity { entity_uuid, .. }
            | WorldAction::DestroyEntity { entity_uuid }
            | WorldAction::RequestAuthority { entity_uuid, .. }
            | WorldAction::TransferAuthority { entity_uuid, .. } => Some(entity_uuid),
            WorldAction::PeerJoined { .. } | WorldAction::PeerLeft { .. } => None,
        }
    }

    /// Reject records with empty identifiers.
    pub fn validate(&self) -> Result<(), ActionError> {
        let empty = |field: &'static str, value: &str| {
            if value.is_empty() {
                Err(ActionError::EmptyIdentifier {
                    kind: self.kind(),
                    field,
                })
            } else {
                Ok(())
            }
        };
        match self {
            WorldAction::PeerJoined {
                peer_id, user_id, ..
            }
            | WorldAction::PeerLeft { peer_id, user_id } => {
                empty("peer_id", peer_id.as_str())?;
                empty("user_id", user_id.as_str())
            }
            WorldAction::SpawnEntity {
                entity_uuid,
                parent_uuid,
                owner_id,
                authority_peer_id,
                ..
            } => {
                empty("entity_uuid", entity_uuid.as_str())?;
                empty("owner_id", owner_id.as_str())?;
                if let Some(parent) = parent_uuid {
                    empty("parent_uuid", parent.as_str())?;
                    if parent == entity_uuid {
                        return Err(ActionError::SelfParent(entity_uuid.clone()));
                    }
                }
                if let Some(authority) = authority_peer_id {
                    empty("authority_peer_id", authority.as_str())?;
                }
                Ok(())
            }
            WorldAction::DestroyEntity { entity_uuid } => {
                empty("entity_uuid", entity_uuid.as_str())
            }
            WorldAction::RequestAuthority {
                entity_uuid,
                requester,
            } => {
                empty("entity_uuid", entity_uuid.as_str())?;
                empty("requester", requester.as_str())
            }
            WorldAction::TransferAuthority {
                entity_uuid,
                new_authority,
            } => {
                empty("entity_uuid", entity_uuid.as_str())?;
                empty("new_authority", new_authority.as_str())
            }
        }
    }
}

/// An action plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    /// Assigned by the bus at dispatch.
    pub id: Option<ActionId>,
    pub network: NetworkTarget,
    pub topic: Topic,
    pub to: Destination,
    /// Origin peer. `None` on locally-authored scene actions.
    pub from: Option<PeerId>,
    /// Tick of the dispatching session.
    pub tick: u64,
    pub action: WorldAction,
}

impl ActionEnvelope {
    /// An action applied on this process only.
    pub fn local(action: WorldAction) -> Self {
        Self {
            id: None,
            network: NetworkTarget::Local,
            topic: Topic::World,
            to: Destination::All,
            from: None,
            tick: 0,
            action,
        }
    }

    /// An action broadcast on a network.
    pub fn on_network(network: NetworkId, topic: Topic, action: WorldAction) -> Self {
        Self {
            id: None,
            network: NetworkTarget::Network(network),
            topic,
            to: Destination::All,
            from: None,
            tick: 0,
            action,
        }
    }

    pub fn to_peer(mut self, peer: PeerId) -> Self {
        self.to = Destination::Peer(peer);
        self
    }

    pub fn from_peer(mut self, peer: PeerId) -> Self {
        self.from = Some(peer);
        self
    }

    pub fn network_id(&self) -> Option<&NetworkId> {
        match &self.network {
            NetworkTarget::Local => None,
            NetworkTarget::Network(id) => Some(id),
        }
    }

    /// Whether `peer` is among the recipients.
    pub fn is_addressed_to(&self, peer: &PeerId) -> bool {
        match &self.to {
            Destination::All => true,
            Destination::Peer(p) => p == peer,
        }
    }

    /// Provenance checks that do not depend on registry state.
    pub fn validate(&self) -> Result<(), ActionError> {
        if let NetworkTarget::Network(id) = &self.network {
            if id.is_empty() {
                return Err(ActionError::MissingNetwork);
            }
        }
        if let Destination::Peer(p) = &self.to {
            if p.is_empty() {
                return Err(ActionError::MissingDestination);
            }
        }
        if self.from.as_ref().is_some_and(PeerId::is_empty) {
            return Err(ActionError::EmptyIdentifier {
                kind: self.action.kind(),
                field: "from",
            });
        }
        self.action.validate()
    }
}

/// Reasons an action is refused at dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("action targets a network but names none")]
    MissingNetwork,
    #[error("action is addressed to an empty peer id")]
    MissingDestination,
    #[error("{kind}: `{field}` must not be empty")]
    EmptyIdentifier {
        kind: &'static str,
        field: &'static str,
    },
    #[error("entity {0} cannot be its own parent")]
    SelfParent(EntityUuid),
    #[error("network {network} serves topic {expected}, action targets {actual}")]
    TopicMismatch {
        network: NetworkId,
        expected: Topic,
        actual: Topic,
    },
    #[error("failed to encode action: {0}")]
    Encode(String),
}

use std::collections::VecDeque;
use worldnet_common::{EntityUuid, NetworkId, PeerId, PeerIndex, Topic, Transform, UserId, UserIndex};
use worldnet_ecs::{ComponentStore, NetworkObject};
use worldnet_kernel::{EntityHandle, World};
use worldnet_net::{
    ActionBus, ActionEnvelope, ActionId, BusStats, Network, NetworkRegistry, NetworkTarget, PeerChange,
    Transport, TransportEvent, WorldAction, apply_peer_action,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::scene::{SceneEntity, SceneTracker};
use crate::waitlist::ParentWaitlist;

/// Everything one participant needs to take part in a session.
///
/// Owns the network registry, the action bus, the local entity store and
/// its components. All mutation goes through `&mut self`, which is the
/// single-writer discipline: call [`Session::tick`] from one place.
#[derive(Debug)]
pub struct Session {
    config: SyncConfig,
    local_peer: PeerId,
    local_user: UserId,
    networks: NetworkRegistry,
    bus: ActionBus,
    world: World,
    components: ComponentStore,
    waitlist: ParentWaitlist,
    scene: SceneTracker,
    tick: u64,
}

impl Session {
    pub fn new(config: SyncConfig, local_peer: PeerId, local_user: UserId) -> Self {
        let bus = ActionBus::new(local_peer.clone(), config.dedup_window);
        let waitlist = ParentWaitlist::new(config.parent_wait_ticks);
        Self {
            config,
            local_peer,
            local_user,
            networks: NetworkRegistry::new(),
            bus,
            world: World::new(),
            components: ComponentStore::new(),
            waitlist,
            scene: SceneTracker::new(),
            tick: 0,
        }
    }

    /// Tunables this session was created with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Peer id of this process.
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// User this process acts for.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Registered networks.
    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    /// Local entity store.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Network components of local entities.
    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    /// Spawns parked until their parent arrives.
    pub fn waitlist(&self) -> &ParentWaitlist {
        &self.waitlist
    }

    /// Scene-sourced entities reported by the loader.
    pub fn scene(&self) -> &SceneTracker {
        &self.scene
    }

    /// Action bus counters.
    pub fn bus_stats(&self) -> &BusStats {
        self.bus.stats()
    }

    /// Actions queued but not yet applied.
    pub fn pending_actions(&self) -> usize {
        self.bus.pending_incoming()
    }

    /// Network serving the world topic, if any.
    pub fn world_network(&self) -> Option<&Network> {
        self.networks.world_network()
    }

    /// Id of the network registered for `topic`.
    pub fn host_id(&self, topic: Topic) -> Option<&NetworkId> {
        self.networks.host_id(topic)
    }

    /// Whether entity actions may be applied.
    pub fn is_world_ready(&self) -> bool {
        self.networks.is_world_ready()
    }

    /// Local entity bound to `uuid`.
    pub fn entity_by_uuid(&self, uuid: &EntityUuid) -> Option<EntityHandle> {
        self.world.entity_by_uuid(uuid)
    }

    /// UUID of the parent of the entity bound to `uuid`.
    pub fn parent_uuid_of(&self, uuid: &EntityUuid) -> Option<&EntityUuid> {
        let entity = self.world.entity_by_uuid(uuid)?;
        let parent = self.world.parent(entity)?;
        self.world.uuid_of(parent)
    }

    /// Network component of the entity bound to `uuid`.
    pub fn network_object(&self, uuid: &EntityUuid) -> Option<&NetworkObject> {
        let entity = self.world.entity_by_uuid(uuid)?;
        self.components.get_network_object(entity)
    }

    // --- Network registry ---

    /// Construct a network without registering it.
    pub fn create_network(network_id: NetworkId, host_peer_id: Option<PeerId>, topic: Topic) -> Network {
        Network::new(network_id, host_peer_id, topic)
    }

    /// Register a network and its outgoing topic.
    pub fn add_network(&mut self, network: Network) -> Result<(), SyncError> {
        let topic = network.topic();
        self.networks.add_network(network)?;
        self.bus.topics_mut().add_outgoing_topic_if_necessary(topic);
        Ok(())
    }

    /// Deregister a network. Actions still queued for it are dropped when
    /// the bus next drains.
    pub fn remove_network(&mut self, network_id: &NetworkId) -> Option<Network> {
        self.networks.remove_network(network_id)
    }

    /// Register an outgoing topic. Returns true if it was new.
    pub fn add_outgoing_topic_if_necessary(&mut self, topic: Topic) -> bool {
        self.bus.topics_mut().add_outgoing_topic_if_necessary(topic)
    }

    /// Admit a peer to a registered network directly.
    pub fn create_peer(
        &mut self,
        network_id: &NetworkId,
        peer_id: PeerId,
        peer_index: PeerIndex,
        user_id: UserId,
        user_index: UserIndex,
    ) -> Result<(), SyncError> {
        let network = self
            .networks
            .get_mut(network_id)
            .ok_or_else(|| SyncError::UnknownNetwork(network_id.clone()))?;
        network.create_peer(peer_id, peer_index, user_id, user_index)?;
        Ok(())
    }

    /// Host a world network on this peer, register ourselves and mark it ready.
    pub fn host_world(&mut self, network_id: NetworkId) -> Result<(), SyncError> {
        let network = Network::new(network_id.clone(), Some(self.local_peer.clone()), Topic::World)
            .with_host_user(self.local_user.clone());
        self.add_network(network)?;
        self.create_peer(
            &network_id,
            self.local_peer.clone(),
            PeerIndex(1),
            self.local_user.clone(),
            UserIndex(1),
        )?;
        self.set_world_ready()
    }

    /// Single-player / offline session: a world network keyed by our user id
    /// with ourselves as host and the only peer.
    pub fn join_world_offline(&mut self) -> Result<NetworkId, SyncError> {
        let network_id = NetworkId::for_user(&self.local_user);
        self.host_world(network_id.clone())?;
        Ok(network_id)
    }

    /// Join a host-less world network. Peers are admitted locally from
    /// transport events; scene entities converge without a host.
    pub fn join_world_p2p(&mut self, network_id: NetworkId) -> Result<(), SyncError> {
        self.add_network(Network::new(network_id.clone(), None, Topic::World))?;
        let (peer_index, user_index) = self
            .networks
            .get(&network_id)
            .map(|n| n.next_indices(&self.local_user))
            .ok_or_else(|| SyncError::UnknownNetwork(network_id.clone()))?;
        self.create_peer(
            &network_id,
            self.local_peer.clone(),
            peer_index,
            self.local_user.clone(),
            user_index,
        )?;
        self.set_world_ready()
    }

    /// Register a world network hosted elsewhere. It becomes ready through
    /// [`Session::set_world_ready`] once the host handshake completes.
    pub fn join_world_as_client(&mut self, network_id: NetworkId, host_peer_id: PeerId) -> Result<(), SyncError> {
        self.add_network(Network::new(network_id, Some(host_peer_id), Topic::World))
    }

    /// Mark the world network ready and announce every scene entity seen so far.
    pub fn set_world_ready(&mut self) -> Result<(), SyncError> {
        let network = self.networks.world_network_mut().ok_or(SyncError::NotReady)?;
        if network.ready() {
            return Ok(());
        }
        network.set_ready(true);
        tracing::info!(network = %network.id(), peer = %self.local_peer, "world network ready");
        self.announce_scene()
    }

    // --- Dispatch ---

    /// Dispatch an arbitrary action through the bus.
    pub fn dispatch(&mut self, envelope: ActionEnvelope) -> Result<ActionId, SyncError> {
        Ok(self.bus.dispatch(envelope, &self.networks, self.tick)?)
    }

    fn world_network_id(&self) -> Result<NetworkId, SyncError> {
        match self.networks.world_network() {
            Some(n) if n.ready() => Ok(n.id().clone()),
            _ => Err(SyncError::NotReady),
        }
    }

    /// Spawn an entity owned by the local user on the world network.
    pub fn spawn_entity(
        &mut self,
        entity_uuid: EntityUuid,
        parent_uuid: Option<EntityUuid>,
        transform: Transform,
    ) -> Result<ActionId, SyncError> {
        let network_id = self.world_network_id()?;
        self.dispatch(ActionEnvelope::on_network(
            network_id,
            Topic::World,
            WorldAction::SpawnEntity {
                entity_uuid,
                parent_uuid,
                owner_id: self.local_user.clone(),
                authority_peer_id: Some(self.local_peer.clone()),
                transform,
                source: None,
            },
        ))
    }

    /// Destroy an entity on the world network, on every peer.
    pub fn destroy_entity(&mut self, entity_uuid: EntityUuid) -> Result<ActionId, SyncError> {
        let network_id = self.world_network_id()?;
        self.dispatch(ActionEnvelope::on_network(
            network_id,
            Topic::World,
            WorldAction::DestroyEntity { entity_uuid },
        ))
    }

    /// Ask whoever holds authority over `entity_uuid` to hand it to us.
    pub fn request_authority(&mut self, entity_uuid: EntityUuid) -> Result<ActionId, SyncError> {
        let network_id = self.world_network_id()?;
        if self.world.entity_by_uuid(&entity_uuid).is_none() {
            return Err(SyncError::UnknownEntity(entity_uuid));
        }
        self.dispatch(ActionEnvelope::on_network(
            network_id,
            Topic::World,
            WorldAction::RequestAuthority {
                entity_uuid,
                requester: self.local_peer.clone(),
            },
        ))
    }

    // --- Scene callbacks ---

    /// The local scene loader added a scene-sourced entity.
    pub fn on_scene_entity_added(
        &mut self,
        uuid: EntityUuid,
        parent_uuid: Option<EntityUuid>,
        source: impl Into<String>,
        transform: Transform,
    ) -> Result<(), SyncError> {
        let entity = SceneEntity {
            parent_uuid,
            source: source.into(),
            transform,
        };
        self.scene.insert(uuid.clone(), entity.clone());
        if self.is_world_ready() {
            self.dispatch_scene_spawn(uuid, &entity)?;
        }
        Ok(())
    }

    /// A scene-sourced entity moved in the hierarchy. Re-announces the spawn
    /// with the new parent every time.
    pub fn on_scene_entity_reparented(
        &mut self,
        uuid: EntityUuid,
        parent_uuid: Option<EntityUuid>,
    ) -> Result<(), SyncError> {
        if !self.scene.reparent(&uuid, parent_uuid) {
            return Err(SyncError::UnknownEntity(uuid));
        }
        if !self.is_world_ready() {
            return Ok(());
        }
        match self.scene.get(&uuid).cloned() {
            Some(entity) => self.dispatch_scene_spawn(uuid, &entity),
            None => Ok(()),
        }
    }

    /// The local scene loader removed a scene-sourced entity.
    pub fn on_scene_entity_removed(&mut self, uuid: EntityUuid) -> Result<(), SyncError> {
        if self.scene.remove(&uuid).is_none() {
            return Ok(());
        }
        if self.is_world_ready() {
            self.dispatch(ActionEnvelope::local(WorldAction::DestroyEntity { entity_uuid: uuid }))?;
        }
        Ok(())
    }

    fn dispatch_scene_spawn(&mut self, uuid: EntityUuid, entity: &SceneEntity) -> Result<(), SyncError> {
        self.dispatch(ActionEnvelope::local(WorldAction::SpawnEntity {
            entity_uuid: uuid,
            parent_uuid: entity.parent_uuid.clone(),
            owner_id: UserId::scene(),
            authority_peer_id: Some(PeerId::scene()),
            transform: entity.transform,
            source: Some(entity.source.clone()),
        }))?;
        Ok(())
    }

    fn announce_scene(&mut self) -> Result<(), SyncError> {
        let pending: Vec<(EntityUuid, SceneEntity)> =
            self.scene.iter().map(|(u, e)| (u.clone(), e.clone())).collect();
        for (uuid, entity) in pending {
            self.dispatch_scene_spawn(uuid, &entity)?;
        }
        Ok(())
    }

    // --- Transport ---

    /// React to connection lifecycle on a network.
    ///
    /// The host admits and announces newcomers and catches them up; host-less
    /// networks admit peers locally; clients wait for the host's broadcast.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SyncError> {
        match event {
            TransportEvent::Connected {
                network,
                peer_id,
                user_id,
            } => self.on_peer_connected(network, peer_id, user_id),
            TransportEvent::Disconnected { network, peer_id } => self.on_peer_disconnected(network, peer_id),
            TransportEvent::Reconnected { network } => self.on_reconnected(network),
        }
    }

    fn on_peer_connected(&mut self, network_id: NetworkId, peer_id: PeerId, user_id: UserId) -> Result<(), SyncError> {
        let Some(network) = self.networks.get_mut(&network_id) else {
            tracing::warn!(network = %network_id, peer = %peer_id, "connection on unknown network");
            return Ok(());
        };
        if network.has_peer(&peer_id) {
            return Ok(());
        }
        let topic = network.topic();
        let is_host = network.is_host(&self.local_peer);
        let hostless = network.host_peer_id().is_none();
        if !is_host && !hostless {
            tracing::debug!(network = %network_id, peer = %peer_id, "waiting for host to announce peer");
            return Ok(());
        }

        let (peer_index, user_index) = network.next_indices(&user_id);
        network.create_peer(peer_id.clone(), peer_index, user_id.clone(), user_index)?;
        if hostless {
            return Ok(());
        }

        self.dispatch(ActionEnvelope::on_network(
            network_id.clone(),
            topic,
            WorldAction::PeerJoined {
                peer_id: peer_id.clone(),
                peer_index,
                user_id,
                user_index,
            },
        ))?;
        self.catch_up(&network_id, topic, &peer_id)
    }

    /// Send a newcomer the peers and entities it missed.
    fn catch_up(&mut self, network_id: &NetworkId, topic: Topic, newcomer: &PeerId) -> Result<(), SyncError> {
        let Some(network) = self.networks.get(network_id) else {
            return Ok(());
        };
        let mut backlog: Vec<WorldAction> = network
            .peers()
            .values()
            .filter(|p| p.peer_id != *newcomer)
            .map(|p| WorldAction::PeerJoined {
                peer_id: p.peer_id.clone(),
                peer_index: p.peer_index,
                user_id: p.user_id.clone(),
                user_index: p.user_index,
            })
            .collect();
        for (entity, object) in self.components.network_objects() {
            if object.network_id.as_ref() != Some(network_id) {
                continue;
            }
            let (Some(data), Some(uuid)) = (self.world.get(*entity), self.world.uuid_of(*entity)) else {
                continue;
            };
            backlog.push(WorldAction::SpawnEntity {
                entity_uuid: uuid.clone(),
                parent_uuid: data.parent.and_then(|p| self.world.uuid_of(p)).cloned(),
                owner_id: object.owner_id.clone(),
                authority_peer_id: Some(object.authority_peer_id.clone()),
                transform: data.transform,
                source: self.components.get_scene_source(*entity).map(|s| s.0.clone()),
            });
        }
        tracing::debug!(network = %network_id, peer = %newcomer, actions = backlog.len(), "catching up newcomer");
        for action in backlog {
            self.dispatch(ActionEnvelope::on_network(network_id.clone(), topic, action).to_peer(newcomer.clone()))?;
        }
        Ok(())
    }

    fn on_peer_disconnected(&mut self, network_id: NetworkId, peer_id: PeerId) -> Result<(), SyncError> {
        let Some(network) = self.networks.get(&network_id) else {
            return Ok(());
        };
        if network.is_host(&peer_id) && peer_id != self.local_peer {
            tracing::info!(network = %network_id, host = %peer_id, "host disconnected, removing network");
            self.remove_network(&network_id);
            return Ok(());
        }
        let Some(peer) = network.peer(&peer_id) else {
            return Ok(());
        };
        let topic = network.topic();
        let leave = WorldAction::PeerLeft {
            peer_id: peer_id.clone(),
            user_id: peer.user_id.clone(),
        };
        let envelope = ActionEnvelope::on_network(network_id, topic, leave);
        if network.is_host(&self.local_peer) {
            self.dispatch(envelope)?;
        } else if network.host_peer_id().is_none() {
            // Host-less: apply on this peer only.
            self.dispatch(envelope.to_peer(self.local_peer.clone()))?;
        }
        Ok(())
    }

    /// After a reconnect the remote side may have lost state: re-announce
    /// ourselves and the entities we hold authority over, then the scene.
    fn on_reconnected(&mut self, network_id: NetworkId) -> Result<(), SyncError> {
        let Some(network) = self.networks.get(&network_id) else {
            return Ok(());
        };
        let topic = network.topic();
        let mut announce: Vec<WorldAction> = network
            .peer(&self.local_peer)
            .map(|me| WorldAction::PeerJoined {
                peer_id: me.peer_id.clone(),
                peer_index: me.peer_index,
                user_id: me.user_id.clone(),
                user_index: me.user_index,
            })
            .into_iter()
            .collect();
        for (entity, object) in self.components.network_objects() {
            if object.authority_peer_id != self.local_peer || object.network_id.as_ref() != Some(&network_id) {
                continue;
            }
            let (Some(data), Some(uuid)) = (self.world.get(*entity), self.world.uuid_of(*entity)) else {
                continue;
            };
            announce.push(WorldAction::SpawnEntity {
                entity_uuid: uuid.clone(),
                parent_uuid: data.parent.and_then(|p| self.world.uuid_of(p)).cloned(),
                owner_id: object.owner_id.clone(),
                authority_peer_id: Some(object.authority_peer_id.clone()),
                transform: data.transform,
                source: None,
            });
        }
        tracing::info!(network = %network_id, actions = announce.len(), "re-announcing after reconnect");
        for action in announce {
            self.dispatch(ActionEnvelope::on_network(network_id.clone(), topic, action))?;
        }
        if topic == Topic::World && self.is_world_ready() {
            self.announce_scene()?;
        }
        Ok(())
    }

    /// Hand queued frames to the transport. Send failures are logged and the
    /// frame is dropped. Returns the number of frames sent.
    pub fn flush_outgoing(&mut self, transport: &mut impl Transport) -> usize {
        let mut sent = 0;
        for frame in self.bus.drain_outgoing() {
            match transport.send(frame.topic, &frame.to, &frame.payload) {
                Ok(()) => sent += 1,
                Err(error) => {
                    tracing::warn!(%error, topic = %frame.topic, network = %frame.network, "dropping outgoing frame");
                }
            }
        }
        sent
    }

    /// Enqueue serialized actions received from the transport.
    pub fn receive_frames<I>(&mut self, frames: I) -> usize
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut accepted = 0;
        for frame in frames {
            match self.bus.receive_bytes(&frame) {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(error) => tracing::warn!(%error, "dropping undecodable frame"),
            }
        }
        accepted
    }

    // --- Application ---

    /// Advance one tick: apply incoming actions, then expire stale parked spawns.
    pub fn tick(&mut self) -> usize {
        let _span = tracing::debug_span!("session_tick", peer = %self.local_peer, tick = self.tick).entered();
        self.tick += 1;
        let applied = self.apply_incoming_actions();
        for envelope in self.waitlist.expire(self.tick) {
            tracing::warn!(
                entity = ?envelope.action.entity_uuid(),
                "parent never arrived, dropping spawn"
            );
        }
        applied
    }

    /// Drain the bus and apply every ready action in order. Returns how many
    /// actions were applied.
    pub fn apply_incoming_actions(&mut self) -> usize {
        let actions = self
            .bus
            .drain_incoming(&self.networks, self.config.max_actions_per_tick);
        let count = actions.len();
        for envelope in actions {
            self.apply(envelope);
        }
        count
    }

    fn apply(&mut self, envelope: ActionEnvelope) {
        if matches!(envelope.action, WorldAction::SpawnEntity { .. }) {
            self.apply_spawn_with_dependents(envelope);
            return;
        }
        match &envelope.action {
            WorldAction::PeerJoined { .. } | WorldAction::PeerLeft { .. } => {
                if let Some(PeerChange::Left {
                    network,
                    peer,
                    user_gone: true,
                }) = apply_peer_action(&mut self.networks, &envelope)
                {
                    self.release_departed_user(&network, &peer.user_id);
                }
            }
            WorldAction::DestroyEntity { entity_uuid } => self.apply_destroy(entity_uuid),
            WorldAction::RequestAuthority { entity_uuid, requester } => {
                self.apply_authority_request(&envelope, entity_uuid, requester)
            }
            WorldAction::TransferAuthority {
                entity_uuid,
                new_authority,
            } => self.apply_authority_transfer(&envelope, entity_uuid, new_authority),
            WorldAction::SpawnEntity { .. } => {}
        }
    }

    fn apply_spawn_with_dependents(&mut self, envelope: ActionEnvelope) {
        let mut work = VecDeque::from([envelope]);
        while let Some(envelope) = work.pop_front() {
            if let Some(uuid) = self.apply_spawn(envelope) {
                work.extend(self.waitlist.release(&uuid));
            }
        }
    }

    /// Apply one spawn. Returns the UUID when the entity exists afterwards.
    fn apply_spawn(&mut self, envelope: ActionEnvelope) -> Option<EntityUuid> {
        let WorldAction::SpawnEntity {
            entity_uuid,
            parent_uuid,
            owner_id,
            authority_peer_id,
            transform,
            source,
        } = &envelope.action
        else {
            return None;
        };

        // Only the latest spawn of a UUID may stay parked.
        let superseded = self.waitlist.forget(entity_uuid);
        if superseded > 0 {
            tracing::debug!(entity = %entity_uuid, superseded, "dropping older parked spawn");
        }

        let parent = match parent_uuid {
            None => None,
            Some(p) => match self.world.entity_by_uuid(p) {
                Some(handle) => Some(handle),
                None => {
                    let parent = p.clone();
                    self.waitlist.park(parent, envelope, self.tick);
                    return None;
                }
            },
        };

        if let Some(existing) = self.world.entity_by_uuid(entity_uuid) {
            match self.world.set_parent(existing, parent) {
                Ok(true) => tracing::debug!(entity = %entity_uuid, parent = ?parent_uuid, "re-parented"),
                Ok(false) => tracing::debug!(entity = %entity_uuid, "spawn re-asserted"),
                Err(error) => tracing::warn!(entity = %entity_uuid, %error, "ignoring re-parent"),
            }
            return Some(entity_uuid.clone());
        }

        let entity = self.world.create_entity();
        if let Err(error) = self.world.assign_uuid(entity, entity_uuid.clone()) {
            tracing::warn!(entity = %entity_uuid, %error, "could not bind uuid");
            self.world.remove_entity(entity);
            return None;
        }
        if let Err(error) = self.world.set_parent(entity, parent) {
            tracing::warn!(entity = %entity_uuid, %error, "spawned at root");
        }
        self.world.set_transform(entity, *transform);

        let authority = authority_peer_id
            .clone()
            .or_else(|| envelope.from.clone())
            .unwrap_or_else(|| {
                if owner_id.is_scene() {
                    PeerId::scene()
                } else {
                    self.local_peer.clone()
                }
            });
        self.components.set_network_object(
            entity,
            NetworkObject {
                owner_id: owner_id.clone(),
                authority_peer_id: authority,
                network_id: envelope.network_id().cloned(),
            },
        );
        if let Some(source) = source {
            self.components.set_scene_source(entity, source.clone());
        }
        tracing::debug!(entity = %entity_uuid, owner = %owner_id, ?entity, "spawned");
        Some(entity_uuid.clone())
    }

    fn apply_destroy(&mut self, uuid: &EntityUuid) {
        let forgotten = self.waitlist.forget(uuid);
        let Some(entity) = self.world.entity_by_uuid(uuid) else {
            tracing::debug!(entity = %uuid, forgotten, "destroy of absent entity");
            return;
        };
        self.components.remove_entity(entity);
        self.world.remove_entity(entity);
        tracing::debug!(entity = %uuid, "destroyed");
    }

    fn apply_authority_request(&mut self, envelope: &ActionEnvelope, uuid: &EntityUuid, requester: &PeerId) {
        let Some(object) = self.network_object(uuid) else {
            return;
        };
        if object.authority_peer_id != self.local_peer || *requester == self.local_peer {
            return;
        }
        let transfer = WorldAction::TransferAuthority {
            entity_uuid: uuid.clone(),
            new_authority: requester.clone(),
        };
        let reply = match &envelope.network {
            NetworkTarget::Network(id) => ActionEnvelope::on_network(id.clone(), envelope.topic, transfer),
            NetworkTarget::Local => ActionEnvelope::local(transfer),
        };
        if let Err(error) = self.dispatch(reply) {
            tracing::warn!(entity = %uuid, %error, "could not answer authority request");
        }
    }

    fn apply_authority_transfer(&mut self, envelope: &ActionEnvelope, uuid: &EntityUuid, new_authority: &PeerId) {
        let Some(entity) = self.world.entity_by_uuid(uuid) else {
            return;
        };
        let Some(object) = self.components.get_network_object(entity) else {
            return;
        };
        let allowed = match &envelope.from {
            None => true,
            Some(from) => {
                *from == object.authority_peer_id
                    || envelope
                        .network_id()
                        .and_then(|id| self.networks.get(id))
                        .is_some_and(|n| n.is_host(from))
            }
        };
        if !allowed {
            tracing::warn!(entity = %uuid, from = ?envelope.from, "ignoring transfer from non-authority");
            return;
        }
        let mut updated = object.clone();
        updated.authority_peer_id = new_authority.clone();
        self.components.set_network_object(entity, updated);
    }

    /// A user's last peer left: the host destroys what it owned on every
    /// peer; host-less networks clean up locally.
    fn release_departed_user(&mut self, network_id: &NetworkId, user_id: &UserId) {
        let Some(network) = self.networks.get(network_id) else {
            return;
        };
        let is_host = network.is_host(&self.local_peer);
        let hostless = network.host_peer_id().is_none();
        let topic = network.topic();
        if !is_host && !hostless {
            return;
        }
        let owned: Vec<EntityUuid> = self
            .components
            .owned_by(user_id)
            .into_iter()
            .filter(|e| {
                self.components
                    .get_network_object(*e)
                    .is_some_and(|o| o.network_id.as_ref() == Some(network_id))
            })
            .filter_map(|e| self.world.uuid_of(e).cloned())
            .collect();
        tracing::debug!(network = %network_id, user = %user_id, entities = owned.len(), "releasing departed user");
        for uuid in owned {
            if hostless {
                self.apply_destroy(&uuid);
            } else {
                let destroy = ActionEnvelope::on_network(
                    network_id.clone(),
                    topic,
                    WorldAction::DestroyEntity { entity_uuid: uuid },
                );
                if let Err(error) = self.dispatch(destroy) {
                    tracing::warn!(%error, "could not dispatch ownership release");
                }
            }
        }
    }

    /// Drain the entity store's mutation log.
    pub fn drain_world_events(&mut self) -> Vec<worldnet_kernel::WorldEvent> {
        self.world.drain_events()
    }
}

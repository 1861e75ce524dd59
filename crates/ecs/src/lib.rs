//! Minimal deterministic component model for synchronized entities.
//!
//! Components are stored in BTreeMap keyed by the local [`EntityHandle`].
//!
//! # Invariants
//! - All component mutations produce events.
//! - Iteration order is deterministic (BTreeMap).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldnet_common::{NetworkId, PeerId, UserId};
use worldnet_kernel::EntityHandle;

/// Marks an entity as network-synchronized and records who controls it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkObject {
    /// User that owns the entity. Scene entities are owned by `UserId::scene()`.
    pub owner_id: UserId,
    /// Peer currently allowed to drive the entity.
    pub authority_peer_id: PeerId,
    /// Network the spawn arrived on; `None` for locally-authored spawns.
    pub network_id: Option<NetworkId>,
}

/// Scene source an entity was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSource(pub String);

/// Human-readable name component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

/// Events produced by component mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentEvent {
    NetworkObjectAdded { entity: EntityHandle, object: NetworkObject },
    NetworkObjectUpdated { entity: EntityHandle, old: NetworkObject, new: NetworkObject },
    NetworkObjectRemoved { entity: EntityHandle, object: NetworkObject },
    SceneSourceAdded { entity: EntityHandle, source: String },
    SceneSourceRemoved { entity: EntityHandle, source: String },
    NameAdded { entity: EntityHandle, name: String },
    NameRemoved { entity: EntityHandle, name: String },
}

/// Deterministic component storage.
#[derive(Debug, Clone, Default)]
pub struct ComponentStore {
    network_objects: BTreeMap<EntityHandle, NetworkObject>,
    scene_sources: BTreeMap<EntityHandle, SceneSource>,
    names: BTreeMap<EntityHandle, Name>,
    events: Vec<ComponentEvent>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return all pending component events.
    pub fn drain_events(&mut self) -> Vec<ComponentEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only access to pending events.
    pub fn events(&self) -> &[ComponentEvent] {
        &self.events
    }

    // --- NetworkObject ---
    pub fn set_network_object(&mut self, entity: EntityHandle, object: NetworkObject) {
        if let Some(old) = self.network_objects.get(&entity) {
            if *old == object {
                return;
            }
            self.events.push(ComponentEvent::NetworkObjectUpdated {
                entity,
                old: old.clone(),
                new: object.clone(),
            });
        } else {
            self.events.push(ComponentEvent::NetworkObjectAdded {
                entity,
                object: object.clone(),
            });
        }
        self.network_objects.insert(entity, object);
    }

    pub fn remove_network_object(&mut self, entity: EntityHandle) -> Option<NetworkObject> {
        let removed = self.network_objects.remove(&entity);
        if let Some(ref object) = removed {
            self.events.push(ComponentEvent::NetworkObjectRemoved {
                entity,
                object: object.clone(),
            });
        }
        removed
    }

    pub fn get_network_object(&self, entity: EntityHandle) -> Option<&NetworkObject> {
        self.network_objects.get(&entity)
    }

    pub fn has_network_object(&self, entity: EntityHandle) -> bool {
        self.network_objects.contains_key(&entity)
    }

    pub fn network_objects(&self) -> &BTreeMap<EntityHandle, NetworkObject> {
        &self.network_objects
    }

    /// Entities owned by `owner`, in handle order.
    pub fn owned_by(&self, owner: &UserId) -> Vec<EntityHandle> {
        self.network_objects
            .iter()
            .filter(|(_, o)| o.owner_id == *owner)
            .map(|(e, _)| *e)
            .collect()
    }

    // --- SceneSource ---
    pub fn set_scene_source(&mut self, entity: EntityHandle, source: String) {
        self.events.push(ComponentEvent::SceneSourceAdded {
            entity,
            source: source.clone(),
        });
        self.scene_sources.insert(entity, SceneSource(source));
    }

    pub fn remove_scene_source(&mut self, entity: EntityHandle) -> Option<SceneSource> {
        let removed = self.scene_sources.remove(&entity);
        if let Some(ref s) = removed {
            self.events.push(ComponentEvent::SceneSourceRemoved {
                entity,
                source: s.0.clone(),
            });
        }
        removed
    }

    pub fn get_scene_source(&self, entity: EntityHandle) -> Option<&SceneSource> {
        self.scene_sources.get(&entity)
    }

    pub fn has_scene_source(&self, entity: EntityHandle) -> bool {
        self.scene_sources.contains_key(&entity)
    }

    // --- Name ---
    pub fn set_name(&mut self, entity: EntityHandle, name: String) {
        self.events.push(ComponentEvent::NameAdded {
            entity,
            name: name.clone(),
        });
        self.names.insert(entity, Name(name));
    }

    pub fn remove_name(&mut self, entity: EntityHandle) -> Option<Name> {
        let removed = self.names.remove(&entity);
        if let Some(ref n) = removed {
            self.events.push(ComponentEvent::NameRemoved {
                entity,
                name: n.0.clone(),
            });
        }
        removed
    }

    pub fn get_name(&self, entity: EntityHandle) -> Option<&Name> {
        self.names.get(&entity)
    }

    /// Remove all components for an entity.
    pub fn remove_entity(&mut self, entity: EntityHandle) {
        self.remove_network_object(entity);
        self.remove_scene_source(entity);
        self.remove_name(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(owner: &str) -> NetworkObject {
        NetworkObject {
            owner_id: owner.into(),
            authority_peer_id: PeerId::scene(),
            network_id: None,
        }
    }

    #[test]
    fn network_object_add_update_remove() {
        let mut store = ComponentStore::new();
        let e = EntityHandle(1);
        store.set_network_object(e, object("alice"));
        assert!(store.has_network_object(e));

        let mut moved = object("alice");
        moved.authority_peer_id = "peer-b".into();
        store.set_network_object(e, moved.clone());
        assert_eq!(store.get_network_object(e), Some(&moved));

        store.remove_network_object(e);
        assert!(!store.has_network_object(e));
        // Add + Update + Remove
        assert_eq!(store.events().len(), 3);
    }

    #[test]
    fn identical_network_object_is_not_an_update() {
        let mut store = ComponentStore::new();
        let e = EntityHandle(1);
        store.set_network_object(e, object("alice"));
        store.set_network_object(e, object("alice"));
        assert_eq!(store.events().len(), 1);
    }

    #[test]
    fn owned_by_filters_in_handle_order() {
        let mut store = ComponentStore::new();
        store.set_network_object(EntityHandle(3), object("alice"));
        store.set_network_object(EntityHandle(1), object("alice"));
        store.set_network_object(EntityHandle(2), object("bob"));
        assert_eq!(
            store.owned_by(&"alice".into()),
            vec![EntityHandle(1), EntityHandle(3)]
        );
    }

    #[test]
    fn remove_entity_clears_all() {
        let mut store = ComponentStore::new();
        let e = EntityHandle(7);
        store.set_network_object(e, object("scene"));
        store.set_scene_source(e, "lobby.gltf".into());
        store.set_name(e, "Lamp".into());

        store.remove_entity(e);
        assert!(!store.has_network_object(e));
        assert!(!store.has_scene_source(e));
        assert!(store.get_name(e).is_none());
    }

    #[test]
    fn drain_events() {
        let mut store = ComponentStore::new();
        store.set_name(EntityHandle(1), "Test".into());
        assert_eq!(store.drain_events().len(), 1);
        assert!(store.events().is_empty());
    }
}

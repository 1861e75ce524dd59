use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldnet_common::{EntityUuid, Transform};

/// Process-local handle of an entity-table slot.
///
/// Handles are allocated monotonically and never cross the wire; peers only
/// ever exchange [`EntityUuid`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub u32);

/// An event record produced by every mutation to the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// An empty entity slot was created.
    Created { entity: EntityHandle },
    /// A UUID was bound to an entity.
    UuidAssigned { entity: EntityHandle, uuid: EntityUuid },
    /// Entity was removed. Carries the UUID it was bound to, if any.
    Removed {
        entity: EntityHandle,
        uuid: Option<EntityUuid>,
    },
    /// Entity moved in the hierarchy.
    Reparented {
        entity: EntityHandle,
        old: Option<EntityHandle>,
        new: Option<EntityHandle>,
    },
    /// Entity transform was updated.
    TransformUpdated {
        entity: EntityHandle,
        old: Transform,
        new: Transform,
    },
}

/// Errors from entity store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("entity {0:?} not found")]
    EntityNotFound(EntityHandle),
    #[error("uuid {uuid} already bound to {entity:?}")]
    UuidInUse {
        uuid: EntityUuid,
        entity: EntityHandle,
    },
    #[error("entity {entity:?} already has uuid {uuid}")]
    UuidAlreadyAssigned {
        entity: EntityHandle,
        uuid: EntityUuid,
    },
    #[error("parenting {entity:?} under {parent:?} would create a cycle")]
    ParentCycle {
        entity: EntityHandle,
        parent: EntityHandle,
    },
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub uuid: Option<EntityUuid>,
    pub parent: Option<EntityHandle>,
    pub transform: Transform,
}

/// The local entity store.
///
/// Owns the entity table, the UUID→entity index and the parent hierarchy.
/// Uses BTreeMap for deterministic iteration order.
#[derive(Debug, Clone, Default)]
pub struct World {
    entities: BTreeMap<EntityHandle, EntityData>,
    uuid_index: BTreeMap<EntityUuid, EntityHandle>,
    next_handle: u32,
    /// Append-only event log of all mutations.
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Read-only access to all entities.
    pub fn entities(&self) -> &BTreeMap<EntityHandle, EntityData> {
        &self.entities
    }

    /// Allocate a fresh entity with default data.
    pub fn create_entity(&mut self) -> EntityHandle {
        self.next_handle += 1;
        let entity = EntityHandle(self.next_handle);
        self.entities.insert(entity, EntityData::default());
        self.event_log.push(WorldEvent::Created { entity });
        entity
    }

    /// Bind a UUID to an entity that has none yet.
    pub fn assign_uuid(&mut self, entity: EntityHandle, uuid: EntityUuid) -> Result<(), WorldError> {
        if let Some(&holder) = self.uuid_index.get(&uuid) {
            return Err(WorldError::UuidInUse { uuid, entity: holder });
        }
        let data = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        if let Some(existing) = &data.uuid {
            return Err(WorldError::UuidAlreadyAssigned {
                entity,
                uuid: existing.clone(),
            });
        }
        data.uuid = Some(uuid.clone());
        self.uuid_index.insert(uuid.clone(), entity);
        self.event_log.push(WorldEvent::UuidAssigned { entity, uuid });
        Ok(())
    }

    /// Resolve a UUID to the local entity bound to it.
    pub fn entity_by_uuid(&self, uuid: &EntityUuid) -> Option<EntityHandle> {
        self.uuid_index.get(uuid).copied()
    }

    pub fn uuid_of(&self, entity: EntityHandle) -> Option<&EntityUuid> {
        self.entities.get(&entity).and_then(|d| d.uuid.as_ref())
    }

    pub fn contains(&self, entity: EntityHandle) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn get(&self, entity: EntityHandle) -> Option<&EntityData> {
        self.entities.get(&entity)
    }

    /// Remove an entity and its UUID binding. Returns the data if it existed.
    ///
    /// Children are detached to the root rather than removed.
    pub fn remove_entity(&mut self, entity: EntityHandle) -> Option<EntityData> {
        let data = self.entities.remove(&entity)?;
        tracing::trace!(?entity, uuid = ?data.uuid, "removing entity");
        if let Some(uuid) = &data.uuid {
            self.uuid_index.remove(uuid);
        }
        for child in self.children(entity) {
            if let Some(child_data) = self.entities.get_mut(&child) {
                child_data.parent = None;
                self.event_log.push(WorldEvent::Reparented {
                    entity: child,
                    old: Some(entity),
                    new: None,
                });
            }
        }
        self.event_log.push(WorldEvent::Removed {
            entity,
            uuid: data.uuid.clone(),
        });
        Some(data)
    }

    pub fn parent(&self, entity: EntityHandle) -> Option<EntityHandle> {
        self.entities.get(&entity).and_then(|d| d.parent)
    }

    /// Direct children of an entity, in handle order.
    pub fn children(&self, entity: EntityHandle) -> Vec<EntityHandle> {
        self.entities
            .iter()
            .filter(|(_, d)| d.parent == Some(entity))
            .map(|(h, _)| *h)
            .collect()
    }

    /// Move an entity under `parent` (or to the root with `None`).
    ///
    /// Returns `Ok(false)` when the entity already had that parent.
    pub fn set_parent(
        &mut self,
        entity: EntityHandle,
        parent: Option<EntityHandle>,
    ) -> Result<bool, WorldError> {
        if let Some(p) = parent {
            if !self.entities.contains_key(&p) {
                return Err(WorldError::EntityNotFound(p));
            }
            // Walk up from the new parent; meeting `entity` means a cycle.
            let mut cursor = Some(p);
            while let Some(c) = cursor {
                if c == entity {
                    return Err(WorldError::ParentCycle { entity, parent: p });
                }
                cursor = self.parent(c);
            }
        }
        let data = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        let old = data.parent;
        if old == parent {
            return Ok(false);
        }
        data.parent = parent;
        self.event_log.push(WorldEvent::Reparented {
            entity,
            old,
            new: parent,
        });
        Ok(true)
    }

    /// Update an entity's transform and log the change.
    pub fn set_transform(&mut self, entity: EntityHandle, new: Transform) -> bool {
        if let Some(data) = self.entities.get_mut(&entity) {
            let old = data.transform;
            data.transform = new;
            self.event_log
                .push(WorldEvent::TransformUpdated { entity, old, new });
            true
        } else {
            false
        }
    }

    /// Deterministic digest of the UUID-visible state.
    ///
    /// Hashes UUIDs, parent UUIDs and transforms in UUID order, so two peers
    /// holding the same synchronized entities agree on the value even though
    /// their local handles differ. Entities without a UUID are ignored.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        for (uuid, entity) in &self.uuid_index {
            let Some(data) = self.entities.get(entity) else {
                continue;
            };
            mix(&mut h, uuid.as_str().as_bytes());
            mix(&mut h, &[0xff]);
            match data.parent.and_then(|p| self.uuid_of(p)) {
                Some(parent_uuid) => mix(&mut h, parent_uuid.as_str().as_bytes()),
                None => mix(&mut h, b"<root>"),
            }
            let t = &data.transform;
            for f in [
                t.position.x,
                t.position.y,
                t.position.z,
                t.rotation.x,
                t.rotation.y,
                t.rotation.z,
                t.rotation.w,
                t.scale.x,
                t.scale.y,
                t.scale.z,
            ] {
                mix(&mut h, &f.to_le_bytes());
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(world: &mut World, uuid: &str) -> EntityHandle {
        let e = world.create_entity();
        world.assign_uuid(e, EntityUuid::from(uuid)).unwrap();
        e
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.entity_count(), 0);
        assert!(w.events().is_empty());
    }

    #[test]
    fn handles_are_never_reused() {
        let mut w = World::new();
        let a = w.create_entity();
        w.remove_entity(a);
        let b = w.create_entity();
        assert_ne!(a, b);
    }

    #[test]
    fn uuid_lookup_roundtrip() {
        let mut w = World::new();
        let e = spawn(&mut w, "crate-1");
        assert_eq!(w.entity_by_uuid(&"crate-1".into()), Some(e));
        assert_eq!(w.uuid_of(e), Some(&EntityUuid::from("crate-1")));
    }

    #[test]
    fn uuid_cannot_be_bound_twice() {
        let mut w = World::new();
        let first = spawn(&mut w, "crate-1");
        let second = w.create_entity();
        let err = w.assign_uuid(second, "crate-1".into()).unwrap_err();
        assert_eq!(
            err,
            WorldError::UuidInUse {
                uuid: "crate-1".into(),
                entity: first
            }
        );
        assert!(w.assign_uuid(first, "crate-2".into()).is_err());
    }

    #[test]
    fn remove_drops_uuid_and_detaches_children() {
        let mut w = World::new();
        let parent = spawn(&mut w, "root");
        let child = spawn(&mut w, "leaf");
        w.set_parent(child, Some(parent)).unwrap();

        let data = w.remove_entity(parent).unwrap();
        assert_eq!(data.uuid, Some("root".into()));
        assert!(w.entity_by_uuid(&"root".into()).is_none());
        assert_eq!(w.parent(child), None);
        assert!(w.remove_entity(parent).is_none());
    }

    #[test]
    fn set_parent_reports_changes() {
        let mut w = World::new();
        let a = spawn(&mut w, "a");
        let b = spawn(&mut w, "b");
        assert!(w.set_parent(b, Some(a)).unwrap());
        assert!(!w.set_parent(b, Some(a)).unwrap());
        assert_eq!(w.children(a), vec![b]);
        assert!(w.set_parent(b, None).unwrap());
        assert!(w.children(a).is_empty());
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut w = World::new();
        let a = spawn(&mut w, "a");
        let b = spawn(&mut w, "b");
        w.set_parent(b, Some(a)).unwrap();
        assert!(matches!(
            w.set_parent(a, Some(b)),
            Err(WorldError::ParentCycle { .. })
        ));
        assert!(matches!(
            w.set_parent(a, Some(a)),
            Err(WorldError::ParentCycle { .. })
        ));
    }

    #[test]
    fn set_parent_rejects_unknown_parent() {
        let mut w = World::new();
        let a = spawn(&mut w, "a");
        assert_eq!(
            w.set_parent(a, Some(EntityHandle(99))),
            Err(WorldError::EntityNotFound(EntityHandle(99)))
        );
    }

    #[test]
    fn mutations_are_logged() {
        let mut w = World::new();
        let e = spawn(&mut w, "a");
        w.set_transform(
            e,
            Transform {
                position: glam::Vec3::new(1.0, 2.0, 3.0),
                ..Transform::default()
            },
        );
        w.remove_entity(e);
        // created + uuid + transform + removed
        assert_eq!(w.drain_events().len(), 4);
        assert!(w.events().is_empty());
    }

    #[test]
    fn state_hash_ignores_local_handles() {
        let mut w1 = World::new();
        let mut w2 = World::new();
        // Different creation order gives different handles.
        let r1 = spawn(&mut w1, "root");
        let c1 = spawn(&mut w1, "child");
        w1.set_parent(c1, Some(r1)).unwrap();

        w2.create_entity();
        let c2 = spawn(&mut w2, "child");
        let r2 = spawn(&mut w2, "root");
        w2.set_parent(c2, Some(r2)).unwrap();

        assert_eq!(w1.state_hash(), w2.state_hash());

        w2.set_parent(c2, None).unwrap();
        assert_ne!(w1.state_hash(), w2.state_hash());
    }
}

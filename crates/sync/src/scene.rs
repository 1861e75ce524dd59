use std::collections::BTreeMap;
use worldnet_common::{EntityUuid, Transform};

/// A scene node observed by the local scene loader.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntity {
    pub parent_uuid: Option<EntityUuid>,
    pub source: String,
    pub transform: Transform,
}

/// Scene-sourced entities currently present in the locally loaded scene.
///
/// The session replays these as spawns when the world network becomes ready,
/// so callbacks that arrive early are not lost.
#[derive(Debug, Clone, Default)]
pub struct SceneTracker {
    entities: BTreeMap<EntityUuid, SceneEntity>,
}

impl SceneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, uuid: &EntityUuid) -> Option<&SceneEntity> {
        self.entities.get(uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityUuid, &SceneEntity)> {
        self.entities.iter()
    }

    pub fn insert(&mut self, uuid: EntityUuid, entity: SceneEntity) {
        self.entities.insert(uuid, entity);
    }

    /// Record a new parent. Returns false for an untracked entity.
    pub fn reparent(&mut self, uuid: &EntityUuid, parent: Option<EntityUuid>) -> bool {
        match self.entities.get_mut(uuid) {
            Some(entity) => {
                entity.parent_uuid = parent;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, uuid: &EntityUuid) -> Option<SceneEntity> {
        self.entities.remove(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parent: Option<&str>) -> SceneEntity {
        SceneEntity {
            parent_uuid: parent.map(EntityUuid::from),
            source: "lobby.gltf".into(),
            transform: Transform::default(),
        }
    }

    #[test]
    fn tracks_insert_reparent_remove() {
        let mut tracker = SceneTracker::new();
        tracker.insert("a".into(), node(None));
        assert!(tracker.reparent(&"a".into(), Some("root".into())));
        assert_eq!(
            tracker.get(&"a".into()).unwrap().parent_uuid,
            Some(EntityUuid::from("root"))
        );
        assert!(!tracker.reparent(&"missing".into(), None));
        assert!(tracker.remove(&"a".into()).is_some());
        assert!(tracker.is_empty());
    }
}

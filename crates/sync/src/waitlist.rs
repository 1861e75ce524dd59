use std::collections::BTreeMap;
use worldnet_common::EntityUuid;
use worldnet_net::ActionEnvelope;

#[derive(Debug, Clone)]
struct Parked {
    envelope: ActionEnvelope,
    parked_at: u64,
}

/// Spawns whose parent UUID is not yet known locally.
///
/// Entries are released when the parent spawns and expire after a bounded
/// number of ticks.
#[derive(Debug, Clone)]
pub struct ParentWaitlist {
    waiting: BTreeMap<EntityUuid, Vec<Parked>>,
    ttl_ticks: u64,
}

impl ParentWaitlist {
    pub fn new(ttl_ticks: u64) -> Self {
        Self {
            waiting: BTreeMap::new(),
            ttl_ticks,
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn is_waiting_on(&self, parent: &EntityUuid) -> bool {
        self.waiting.contains_key(parent)
    }

    /// Park a spawn until `parent` resolves.
    pub fn park(&mut self, parent: EntityUuid, envelope: ActionEnvelope, tick: u64) {
        tracing::debug!(%parent, entity = ?envelope.action.entity_uuid(), "parking spawn until parent resolves");
        self.waiting.entry(parent).or_default().push(Parked {
            envelope,
            parked_at: tick,
        });
    }

    /// Take every spawn waiting on `parent`, in park order.
    pub fn release(&mut self, parent: &EntityUuid) -> Vec<ActionEnvelope> {
        self.waiting
            .remove(parent)
            .map(|list| list.into_iter().map(|p| p.envelope).collect())
            .unwrap_or_default()
    }

    /// Drop parked spawns of `entity` (it was destroyed before its parent arrived).
    pub fn forget(&mut self, entity: &EntityUuid) -> usize {
        let mut removed = 0;
        self.waiting.retain(|_, list| {
            let before = list.len();
            list.retain(|p| p.envelope.action.entity_uuid() != Some(entity));
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Remove entries parked for longer than the TTL and return them.
    pub fn expire(&mut self, now: u64) -> Vec<ActionEnvelope> {
        let ttl = self.ttl_ticks;
        let mut expired = Vec::new();
        self.waiting.retain(|_, list| {
            let (old, fresh): (Vec<Parked>, Vec<Parked>) = list
                .drain(..)
                .partition(|p| now.saturating_sub(p.parked_at) > ttl);
            expired.extend(old.into_iter().map(|p| p.envelope));
            *list = fresh;
            !list.is_empty()
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldnet_common::{Transform, UserId};
    use worldnet_net::WorldAction;

    fn spawn(uuid: &str, parent: &str) -> ActionEnvelope {
        ActionEnvelope::local(WorldAction::SpawnEntity {
            entity_uuid: uuid.into(),
            parent_uuid: Some(parent.into()),
            owner_id: UserId::scene(),
            authority_peer_id: None,
            transform: Transform::default(),
            source: None,
        })
    }

    #[test]
    fn release_returns_in_park_order() {
        let mut w = ParentWaitlist::new(10);
        w.park("root".into(), spawn("a", "root"), 0);
        w.park("root".into(), spawn("b", "root"), 1);
        w.park("other".into(), spawn("c", "other"), 1);
        assert_eq!(w.len(), 3);

        let released = w.release(&"root".into());
        let ids: Vec<_> = released
            .iter()
            .filter_map(|e| e.action.entity_uuid().cloned())
            .collect();
        assert_eq!(ids, vec![EntityUuid::from("a"), EntityUuid::from("b")]);
        assert!(!w.is_waiting_on(&"root".into()));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn expire_drops_only_stale_entries() {
        let mut w = ParentWaitlist::new(5);
        w.park("root".into(), spawn("a", "root"), 0);
        w.park("root".into(), spawn("b", "root"), 4);
        assert!(w.expire(5).is_empty());
        assert_eq!(w.expire(6).len(), 1);
        assert_eq!(w.len(), 1);
        assert_eq!(w.expire(100).len(), 1);
        assert!(w.is_empty());
    }

    #[test]
    fn forget_removes_destroyed_entity() {
        let mut w = ParentWaitlist::new(5);
        w.park("root".into(), spawn("a", "root"), 0);
        w.park("root".into(), spawn("b", "root"), 0);
        assert_eq!(w.forget(&"a".into()), 1);
        assert_eq!(w.len(), 1);
        assert_eq!(w.forget(&"b".into()), 1);
        assert!(w.is_empty());
    }
}

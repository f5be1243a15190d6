//! Active-mob registry: room id → entity handle → mob.
//!
//! Entries are keyed by generational [`EntityHandle`]s, so a despawned
//! entity can never be confused with a later one. Despawned entries are
//! removed by [`MobRegistry::sweep`], which the periodic entity check runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::host::EntityHandle;
use crate::identifier::IdKey;
use crate::mob::DungeonMob;

#[derive(Debug, Default)]
pub struct MobRegistry {
    rooms: BTreeMap<IdKey, HashMap<EntityHandle, Arc<dyn DungeonMob>>>,
}

impl MobRegistry {
    pub fn insert(&mut self, room: &IdKey, handle: EntityHandle, mob: Arc<dyn DungeonMob>) {
        self.rooms.entry(room.clone()).or_default().insert(handle, mob);
    }

    pub fn remove(&mut self, room: &IdKey, handle: EntityHandle) -> Option<Arc<dyn DungeonMob>> {
        self.rooms.get_mut(room).and_then(|mobs| mobs.remove(&handle))
    }

    pub fn count(&self, room: &IdKey) -> usize {
        self.rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.rooms.values().map(HashMap::len).sum()
    }

    /// Room a tracked entity belongs to.
    pub fn room_of(&self, handle: EntityHandle) -> Option<&IdKey> {
        self.rooms
            .iter()
            .find(|(_, mobs)| mobs.contains_key(&handle))
            .map(|(room, _)| room)
    }

    pub fn handles(&self) -> Vec<EntityHandle> {
        self.rooms.values().flat_map(|m| m.keys().copied()).collect()
    }

    /// Drops every entry whose entity is no longer alive; returns how many went.
    pub fn sweep(&mut self, mut alive: impl FnMut(EntityHandle) -> bool) -> usize {
        let mut reaped = 0;
        for mobs in self.rooms.values_mut() {
            let before = mobs.len();
            mobs.retain(|handle, _| alive(*handle));
            reaped += before - mobs.len();
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EntityArena;
    use crate::mob::SimpleMob;

    fn zombie() -> Arc<dyn DungeonMob> {
        Arc::new(SimpleMob::new(IdKey::mob("zombie"), false))
    }

    #[test]
    fn sweep_removes_only_dead_entities() {
        let mut arena = EntityArena::new();
        let a = arena.insert(());
        let b = arena.insert(());
        let c = arena.insert(());
        let mut registry = MobRegistry::default();
        let hall = IdKey::room("hall");
        let vault = IdKey::room("vault");
        registry.insert(&hall, a, zombie());
        registry.insert(&hall, b, zombie());
        registry.insert(&vault, c, zombie());

        arena.remove(b);
        arena.remove(c);
        let reaped = registry.sweep(|h| arena.contains(h));
        assert_eq!(reaped, 2);
        assert_eq!(registry.count(&hall), 1);
        assert_eq!(registry.count(&vault), 0);
        assert_eq!(registry.room_of(a), Some(&hall));
    }

    #[test]
    fn reused_slot_is_not_tracked() {
        let mut arena = EntityArena::new();
        let old = arena.insert(());
        let mut registry = MobRegistry::default();
        let hall = IdKey::room("hall");
        registry.insert(&hall, old, zombie());
        arena.remove(old);
        let fresh = arena.insert(());
        assert!(registry.remove(&hall, fresh).is_none());
        assert_eq!(registry.sweep(|h| arena.contains(h)), 1);
    }
}

//! Keyed stores for loaded definitions.
//!
//! A [`Storage`] is filled by [`load`](Storage::load), which replaces the
//! whole content, and afterwards only grows through
//! [`register`](Storage::register) when the store allows it. The component
//! store adds the UUID and reverse room lookups the engine needs.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use uuid::Uuid;

use crate::component::Component;
use crate::dungeon::Format;
use crate::errors::{DungeonError, Result};
use crate::identifier::IdKey;
use crate::mob::DungeonMob;

pub struct Storage<K, V> {
    name: &'static str,
    entries: RwLock<BTreeMap<K, V>>,
    loaded: AtomicBool,
    allow_post_register: bool,
}

impl<K, V> Storage<K, V>
where
    K: Ord + Clone + Display,
    V: Clone,
{
    pub fn new(name: &'static str, allow_post_register: bool) -> Self {
        Self {
            name,
            entries: RwLock::new(BTreeMap::new()),
            loaded: AtomicBool::new(false),
            allow_post_register,
        }
    }

    /// Replaces everything held with `entries`.
    pub fn load(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let fresh: BTreeMap<K, V> = entries.into_iter().collect();
        debug!("{} storage loaded {} entries", self.name, fresh.len());
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.loaded.store(true, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Adds one entry after loading. Ignored before the first load.
    pub fn register(&self, key: K, value: V) -> Result<()> {
        if !self.is_loaded() {
            debug!("{} storage ignored register of {} before load", self.name, key);
            return Ok(());
        }
        if !self.allow_post_register {
            return Err(DungeonError::Internal(format!(
                "{} storage does not accept registrations after load",
                self.name
            )));
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or_err(&self, key: &K) -> Result<V> {
        self.get(key)
            .ok_or_else(|| DungeonError::NotFound(format!("{} in {} storage", key, self.name)))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutates one entry in place under the write lock.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
            .map(f)
    }

    /// Finds the first entry matching `pred` under one read lock.
    pub fn find_map<R>(&self, mut pred: impl FnMut(&K, &V) -> Option<R>) -> Option<R> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|(k, v)| pred(k, v))
    }
}

pub type FormatStorage = Storage<IdKey, Arc<Format>>;
pub type MobStorage = Storage<IdKey, Arc<dyn DungeonMob>>;

/// Components per room format, in declaration order.
pub struct ComponentStorage {
    inner: Storage<IdKey, Vec<Arc<Component>>>,
}

impl Default for ComponentStorage {
    fn default() -> Self {
        Self {
            inner: Storage::new("component", true),
        }
    }
}

impl ComponentStorage {
    pub fn load(&self, entries: impl IntoIterator<Item = (IdKey, Vec<Arc<Component>>)>) {
        self.inner.load(entries)
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    pub fn rooms(&self) -> Vec<IdKey> {
        self.inner.keys()
    }

    pub fn components_in(&self, room: &IdKey) -> Vec<Arc<Component>> {
        self.inner.get(room).unwrap_or_default()
    }

    pub fn all(&self) -> Vec<(IdKey, Arc<Component>)> {
        self.inner
            .keys()
            .into_iter()
            .flat_map(|room| {
                self.components_in(&room)
                    .into_iter()
                    .map(move |c| (room.clone(), c))
            })
            .collect()
    }

    /// Linear scan for a component by UUID.
    pub fn get_by_uuid(&self, uuid: Uuid) -> Option<Arc<Component>> {
        self.inner
            .find_map(|_, list| list.iter().find(|c| c.uuid() == uuid).cloned())
    }

    pub fn get_by_uuid_or_err(&self, uuid: Uuid) -> Result<Arc<Component>> {
        self.get_by_uuid(uuid)
            .ok_or_else(|| DungeonError::NotFound(format!("component {}", uuid)))
    }

    /// Room format holding the component with `uuid`.
    pub fn room_of_component(&self, uuid: Uuid) -> Option<IdKey> {
        self.inner.find_map(|room, list| {
            list.iter()
                .any(|c| c.uuid() == uuid)
                .then(|| room.clone())
        })
    }

    /// Appends a component to a room, creating the room entry if needed.
    pub fn add(&self, room: &IdKey, component: Arc<Component>) -> Result<()> {
        if self
            .inner
            .update(room, |list| list.push(component.clone()))
            .is_none()
        {
            self.inner.register(room.clone(), vec![component])?;
        }
        Ok(())
    }

    /// Atomically swaps the component with `new`'s UUID for `new`, returning the old value.
    pub fn replace(&self, new: Arc<Component>) -> Result<Arc<Component>> {
        let room = self
            .room_of_component(new.uuid())
            .ok_or_else(|| DungeonError::NotFound(format!("component {}", new.uuid())))?;
        self.inner
            .update(&room, |list| {
                list.iter_mut()
                    .find(|c| c.uuid() == new.uuid())
                    .map(|slot| std::mem::replace(slot, new.clone()))
            })
            .flatten()
            .ok_or_else(|| DungeonError::NotFound(format!("component {}", new.uuid())))
    }

    pub fn len(&self) -> usize {
        self.inner.values().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

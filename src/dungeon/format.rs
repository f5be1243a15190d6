//! Dungeon and room templates.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glam::{IVec3, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance::Instance;
use crate::context::AppContext;
use crate::errors::Result;
use crate::geometry::{Region, WorldPos};
use crate::host::BlockType;
use crate::identifier::IdKey;
use crate::lanes::{OnLane, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyDropMode {
    /// A key drops when a marked mob dies.
    MarkedRoomMobKill,
    /// A key drops when the last tracked mob of the room dies.
    RoomMobsClear,
}

/// Template for one room. `region` is relative to the instance anchor,
/// `origin` is the room anchor relative to the instance anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFormat {
    pub identifier: IdKey,
    pub parent: IdKey,
    pub origin: IVec3,
    pub region: Region,
    pub key_drop_mode: KeyDropMode,
    pub key_item: BlockType,
}

impl RoomFormat {
    pub fn new(identifier: IdKey, parent: IdKey, origin: IVec3, region: Region) -> Self {
        Self {
            identifier,
            parent,
            origin,
            region,
            key_drop_mode: KeyDropMode::RoomMobsClear,
            key_item: BlockType::new("tripwire_hook"),
        }
    }

    pub fn with_key_drop(mut self, mode: KeyDropMode, item: BlockType) -> Self {
        self.key_drop_mode = mode;
        self.key_item = item;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceOption {
    /// Build an empty instance and hold it in reserve.
    Cache,
    /// Always build a fresh, never-cached instance.
    NewNonCached,
    /// Reuse a cached instance of the format if one exists, else build fresh.
    ConsumeCache,
}

/// Template for a whole dungeon, plus the set of its live instances.
pub struct Format {
    identifier: IdKey,
    spawn: Vec3,
    template: Option<String>,
    rooms: Vec<Arc<RoomFormat>>,
    instances: Mutex<Vec<Arc<Instance>>>,
}

impl Format {
    pub fn new(
        identifier: IdKey,
        spawn: Vec3,
        template: Option<String>,
        rooms: Vec<RoomFormat>,
    ) -> Self {
        Self {
            identifier,
            spawn,
            template,
            rooms: rooms.into_iter().map(Arc::new).collect(),
            instances: Mutex::new(Vec::new()),
        }
    }

    pub fn identifier(&self) -> &IdKey {
        &self.identifier
    }

    /// Player spawn point relative to the instance anchor.
    pub fn spawn(&self) -> Vec3 {
        self.spawn
    }

    /// Paste template handed to the terrain editor; `None` means nothing is pasted.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn rooms(&self) -> &[Arc<RoomFormat>] {
        &self.rooms
    }

    pub fn room(&self, id: &IdKey) -> Option<&Arc<RoomFormat>> {
        self.rooms.iter().find(|r| &r.identifier == id)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Instance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.lock().clone()
    }

    pub fn cached(&self) -> Vec<Arc<Instance>> {
        self.lock()
            .iter()
            .filter(|i| i.cache_state().is_cached())
            .cloned()
            .collect()
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.lock().iter().any(|i| i.uuid() == uuid)
    }

    pub(crate) fn attach(&self, instance: Arc<Instance>) {
        let mut instances = self.lock();
        if !instances.iter().any(|i| i.uuid() == instance.uuid()) {
            instances.push(instance);
        }
    }

    pub(crate) fn detach(&self, uuid: Uuid) -> bool {
        let mut instances = self.lock();
        let before = instances.len();
        instances.retain(|i| i.uuid() != uuid);
        instances.len() != before
    }

    /// Materialises an instance at `anchor` under `option` and adds it to the instance set.
    pub fn instantiate(
        self: &Arc<Self>,
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        anchor: WorldPos,
        option: InstanceOption,
    ) -> Result<Arc<Instance>> {
        let instance = match option {
            InstanceOption::Cache => Instance::build(app, tick, self, anchor, true)?,
            InstanceOption::NewNonCached => Instance::build(app, tick, self, anchor, false)?,
            InstanceOption::ConsumeCache => match self.cached().into_iter().next() {
                Some(cached) => {
                    debug!("{} reusing cached instance {}", self.identifier, cached.uuid());
                    cached
                }
                None => Instance::build(app, tick, self, anchor, false)?,
            },
        };
        self.attach(instance.clone());
        Ok(instance)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format")
            .field("identifier", &self.identifier)
            .field("spawn", &self.spawn)
            .field("template", &self.template)
            .field(
                "rooms",
                &self.rooms.iter().map(|r| r.identifier.to_string()).collect::<Vec<_>>(),
            )
            .field("instances", &self.lock().len())
            .finish()
    }
}

//! Dungeon mob templates and the per-instance registry of live mobs.

pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dungeon::RoomInstance;
use crate::host::{EntityHandle, KillMethod};
use crate::identifier::IdKey;

pub use registry::MobRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathVerdict {
    Allow,
    Veto,
}

pub trait DungeonMob: Send + Sync + fmt::Debug {
    fn identifier(&self) -> &IdKey;

    /// Marked mobs drop a key when their room uses marked-kill key drops.
    fn is_marked(&self) -> bool;

    fn custom(&self) -> &HashMap<String, String>;

    /// Fresh copy handed to each spawned entity.
    fn clone_mob(&self) -> Arc<dyn DungeonMob>;

    fn on_death(
        &self,
        room: &RoomInstance,
        victim: EntityHandle,
        killer: Option<&KillMethod>,
    ) -> DeathVerdict;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleMob {
    pub identifier: IdKey,
    #[serde(default)]
    pub marked: bool,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl SimpleMob {
    pub fn new(identifier: IdKey, marked: bool) -> Self {
        Self {
            identifier,
            marked,
            custom: HashMap::new(),
        }
    }
}

impl DungeonMob for SimpleMob {
    fn identifier(&self) -> &IdKey {
        &self.identifier
    }

    fn is_marked(&self) -> bool {
        self.marked
    }

    fn custom(&self) -> &HashMap<String, String> {
        &self.custom
    }

    fn clone_mob(&self) -> Arc<dyn DungeonMob> {
        Arc::new(self.clone())
    }

    fn on_death(&self, _room: &RoomInstance, _victim: EntityHandle, _killer: Option<&KillMethod>) -> DeathVerdict {
        DeathVerdict::Allow
    }
}

/// A boss is always marked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossMob {
    pub identifier: IdKey,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl BossMob {
    pub fn new(identifier: IdKey) -> Self {
        Self {
            identifier,
            custom: HashMap::new(),
        }
    }
}

impl DungeonMob for BossMob {
    fn identifier(&self) -> &IdKey {
        &self.identifier
    }

    fn is_marked(&self) -> bool {
        true
    }

    fn custom(&self) -> &HashMap<String, String> {
        &self.custom
    }

    fn clone_mob(&self) -> Arc<dyn DungeonMob> {
        Arc::new(self.clone())
    }

    fn on_death(&self, room: &RoomInstance, victim: EntityHandle, _killer: Option<&KillMethod>) -> DeathVerdict {
        log::info!("boss {} ({}) defeated in {}", self.identifier, victim, room.identifier());
        DeathVerdict::Allow
    }
}

//! Host simulation collaborators.
//!
//! The dungeon core never owns the simulated world. Everything it needs from
//! the host is behind [`WorldHost`] (worlds, players, entities) and
//! [`TerrainEditor`] (region mutation). Every call that mutates live world or
//! entity state takes an `&OnLane<Tick>` proof.

pub mod arena;
pub mod memory;

use std::fmt;

use glam::IVec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, TerrainError};
use crate::geometry::{Region, WorldPos};
use crate::identifier::IdKey;
use crate::lanes::{OnLane, Tick};

pub use arena::{EntityArena, EntityHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Block state name, e.g. `ice` or `air`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(pub String);

impl BlockType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn air() -> Self {
        Self::new("air")
    }

    pub fn is_air(&self) -> bool {
        self.0 == "air"
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who or what dealt a killing blow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillMethod {
    Player(PlayerId),
    Entity(EntityHandle),
    Environment(String),
}

impl KillMethod {
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            KillMethod::Player(p) => Some(*p),
            _ => None,
        }
    }
}

/// Generation settings for the placement canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSettings {
    pub name: String,
    pub flat: bool,
    pub structures: bool,
    pub void_generator: bool,
    pub mob_spawning: bool,
    pub weather: bool,
    pub daylight_cycle: bool,
}

impl WorldSettings {
    /// Flat, structure-free, void world with spawning, weather and daylight off.
    pub fn canvas(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flat: true,
            structures: false,
            void_generator: true,
            mob_spawning: false,
            weather: false,
            daylight_cycle: false,
        }
    }
}

pub trait WorldHost: Send + Sync {
    fn world_exists(&self, name: &str) -> bool;
    fn create_world(&self, lane: &OnLane<Tick>, settings: &WorldSettings) -> Result<()>;
    fn unload_world(&self, lane: &OnLane<Tick>, name: &str, delete: bool) -> Result<()>;
    fn world_spawn(&self, name: &str) -> Option<WorldPos>;
    /// Spawn of the main (non-dungeon) world.
    fn main_spawn(&self) -> WorldPos;

    fn is_online(&self, player: PlayerId) -> bool;
    fn player_location(&self, player: PlayerId) -> Option<WorldPos>;
    fn online_players(&self) -> Vec<PlayerId>;
    fn teleport(&self, lane: &OnLane<Tick>, player: PlayerId, to: &WorldPos) -> bool;
    fn is_editing(&self, player: PlayerId) -> bool;
    fn show_caption(&self, player: PlayerId, title: &str, subtitle: &str);
    fn dispatch_command(&self, lane: &OnLane<Tick>, command: &str) -> bool;

    fn spawn_mob(&self, lane: &OnLane<Tick>, mob: &IdKey, at: &WorldPos) -> Result<EntityHandle>;
    /// Spawns a non-interactive key marker; `glow` carries the glow colour when enabled.
    fn spawn_key_marker(
        &self,
        lane: &OnLane<Tick>,
        item: &BlockType,
        at: &WorldPos,
        glow: Option<&str>,
    ) -> Result<EntityHandle>;
    fn entity_alive(&self, handle: EntityHandle) -> bool;
    fn entity_location(&self, handle: EntityHandle) -> Option<WorldPos>;
    fn remove_entity(&self, lane: &OnLane<Tick>, handle: EntityHandle) -> bool;
    /// Removes every non-player entity inside `region`, returning how many went.
    fn remove_entities_in(&self, lane: &OnLane<Tick>, world: &str, region: &Region) -> usize;
}

pub trait TerrainEditor: Send + Sync {
    /// Pastes `template` with its origin at `at` and returns the covered region.
    fn paste(
        &self,
        lane: &OnLane<Tick>,
        at: &WorldPos,
        template: &str,
    ) -> std::result::Result<Region, TerrainError>;

    fn set_blocks(
        &self,
        lane: &OnLane<Tick>,
        world: &str,
        blocks: &[IVec3],
        block: &BlockType,
    ) -> std::result::Result<(), TerrainError>;

    /// Sets every block in `region` to air.
    fn clear_region(
        &self,
        lane: &OnLane<Tick>,
        world: &str,
        region: &Region,
    ) -> std::result::Result<(), TerrainError>;

    fn block_at(&self, world: &str, at: IVec3) -> BlockType;
}

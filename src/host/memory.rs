//! In-memory host used by the `simulate` command and the test suite.
//!
//! Worlds are sparse block maps, entities live in an [`EntityArena`], players
//! are plain records. Everything sits behind one mutex; the lane proofs on the
//! trait methods already serialise world mutation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use glam::{DVec3, IVec3};

use super::{
    BlockType, EntityArena, EntityHandle, PlayerId, TerrainEditor, WorldHost, WorldSettings,
};
use crate::errors::{DungeonError, Result, TerrainError};
use crate::geometry::{Region, WorldPos};
use crate::identifier::IdKey;
use crate::lanes::{OnLane, Tick};

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Mob(IdKey),
    KeyMarker { item: BlockType, glow: Option<String> },
}

#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub at: WorldPos,
}

#[derive(Debug, Clone)]
struct PlayerRecord {
    online: bool,
    location: WorldPos,
    editing: bool,
}

#[derive(Debug, Clone)]
struct Template {
    size: IVec3,
    blocks: Vec<(IVec3, BlockType)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    worlds: BTreeMap<String, WorldSettings>,
    blocks: HashMap<(String, IVec3), BlockType>,
    players: BTreeMap<PlayerId, PlayerRecord>,
    entities: EntityArena<EntityRecord>,
    templates: HashMap<String, Template>,
    captions: Vec<(PlayerId, String)>,
    commands: Vec<String>,
    rejected_pastes: HashSet<String>,
    fail_clear: bool,
}

pub struct MemoryHost {
    main_world: String,
    state: Mutex<MemoryState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new("world")
    }
}

impl MemoryHost {
    pub fn new(main_world: impl Into<String>) -> Self {
        let main_world = main_world.into();
        let mut state = MemoryState::default();
        state
            .worlds
            .insert(main_world.clone(), WorldSettings::canvas(main_world.clone()));
        Self {
            main_world,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a paste template of `size` with the given solid blocks (template-relative).
    pub fn register_template(&self, name: &str, size: IVec3, blocks: Vec<(IVec3, BlockType)>) {
        self.lock()
            .templates
            .insert(name.to_string(), Template { size, blocks });
    }

    /// Makes every paste of `template` fail until cleared.
    pub fn reject_pastes_of(&self, template: &str) {
        self.lock().rejected_pastes.insert(template.to_string());
    }

    pub fn fail_clears(&self, fail: bool) {
        self.lock().fail_clear = fail;
    }

    pub fn join(&self, player: PlayerId, at: WorldPos) {
        self.lock().players.insert(
            player,
            PlayerRecord {
                online: true,
                location: at,
                editing: false,
            },
        );
    }

    pub fn join_at_spawn(&self) -> PlayerId {
        let player = PlayerId::random();
        self.join(player, self.main_spawn());
        player
    }

    pub fn set_online(&self, player: PlayerId, online: bool) {
        if let Some(p) = self.lock().players.get_mut(&player) {
            p.online = online;
        }
    }

    pub fn set_editing(&self, player: PlayerId, editing: bool) {
        if let Some(p) = self.lock().players.get_mut(&player) {
            p.editing = editing;
        }
    }

    /// Moves a player without going through a lane, as the player walking would.
    pub fn walk(&self, player: PlayerId, to: WorldPos) {
        if let Some(p) = self.lock().players.get_mut(&player) {
            p.location = to;
        }
    }

    /// Despawns an entity outside of any lane, as the simulation itself would.
    pub fn despawn(&self, handle: EntityHandle) -> bool {
        self.lock().entities.remove(handle).is_some()
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<EntityRecord> {
        self.lock().entities.get(handle).cloned()
    }

    pub fn entities(&self) -> Vec<(EntityHandle, EntityRecord)> {
        self.lock()
            .entities
            .iter()
            .map(|(h, r)| (h, r.clone()))
            .collect()
    }

    pub fn captions_for(&self, player: PlayerId) -> Vec<String> {
        self.lock()
            .captions
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn dispatched_commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn world_settings(&self, name: &str) -> Option<WorldSettings> {
        self.lock().worlds.get(name).cloned()
    }

    pub fn solid_blocks_in(&self, world: &str) -> usize {
        self.lock()
            .blocks
            .iter()
            .filter(|((w, _), b)| w == world && !b.is_air())
            .count()
    }
}

impl WorldHost for MemoryHost {
    fn world_exists(&self, name: &str) -> bool {
        self.lock().worlds.contains_key(name)
    }

    fn create_world(&self, _lane: &OnLane<Tick>, settings: &WorldSettings) -> Result<()> {
        let mut state = self.lock();
        if state.worlds.contains_key(&settings.name) {
            return Err(DungeonError::WorldUnavailable(format!(
                "{} already exists",
                settings.name
            )));
        }
        state.worlds.insert(settings.name.clone(), settings.clone());
        Ok(())
    }

    fn unload_world(&self, _lane: &OnLane<Tick>, name: &str, delete: bool) -> Result<()> {
        let mut state = self.lock();
        if state.worlds.remove(name).is_none() {
            return Err(DungeonError::WorldUnavailable(name.to_string()));
        }
        if delete {
            state.blocks.retain(|(w, _), _| w != name);
            state.entities.remove_where(|e| e.at.world == name);
        }
        Ok(())
    }

    fn world_spawn(&self, name: &str) -> Option<WorldPos> {
        self.world_exists(name)
            .then(|| WorldPos::new(name, DVec3::new(0.0, 64.0, 0.0)))
    }

    fn main_spawn(&self) -> WorldPos {
        WorldPos::new(self.main_world.clone(), DVec3::new(0.0, 64.0, 0.0))
    }

    fn is_online(&self, player: PlayerId) -> bool {
        self.lock().players.get(&player).map(|p| p.online).unwrap_or(false)
    }

    fn player_location(&self, player: PlayerId) -> Option<WorldPos> {
        self.lock().players.get(&player).map(|p| p.location.clone())
    }

    fn online_players(&self) -> Vec<PlayerId> {
        self.lock()
            .players
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(id, _)| *id)
            .collect()
    }

    fn teleport(&self, _lane: &OnLane<Tick>, player: PlayerId, to: &WorldPos) -> bool {
        match self.lock().players.get_mut(&player) {
            Some(p) if p.online => {
                p.location = to.clone();
                true
            }
            _ => false,
        }
    }

    fn is_editing(&self, player: PlayerId) -> bool {
        self.lock().players.get(&player).map(|p| p.editing).unwrap_or(false)
    }

    fn show_caption(&self, player: PlayerId, title: &str, subtitle: &str) {
        let caption = if subtitle.is_empty() {
            title.to_string()
        } else {
            format!("{} - {}", title, subtitle)
        };
        self.lock().captions.push((player, caption));
    }

    fn dispatch_command(&self, _lane: &OnLane<Tick>, command: &str) -> bool {
        self.lock().commands.push(command.to_string());
        true
    }

    fn spawn_mob(&self, _lane: &OnLane<Tick>, mob: &IdKey, at: &WorldPos) -> Result<EntityHandle> {
        let mut state = self.lock();
        if !state.worlds.contains_key(&at.world) {
            return Err(DungeonError::WorldUnavailable(at.world.clone()));
        }
        Ok(state.entities.insert(EntityRecord {
            kind: EntityKind::Mob(mob.clone()),
            at: at.clone(),
        }))
    }

    fn spawn_key_marker(
        &self,
        _lane: &OnLane<Tick>,
        item: &BlockType,
        at: &WorldPos,
        glow: Option<&str>,
    ) -> Result<EntityHandle> {
        Ok(self.lock().entities.insert(EntityRecord {
            kind: EntityKind::KeyMarker {
                item: item.clone(),
                glow: glow.map(str::to_string),
            },
            at: at.clone(),
        }))
    }

    fn entity_alive(&self, handle: EntityHandle) -> bool {
        self.lock().entities.contains(handle)
    }

    fn entity_location(&self, handle: EntityHandle) -> Option<WorldPos> {
        self.lock().entities.get(handle).map(|e| e.at.clone())
    }

    fn remove_entity(&self, _lane: &OnLane<Tick>, handle: EntityHandle) -> bool {
        self.lock().entities.remove(handle).is_some()
    }

    fn remove_entities_in(&self, _lane: &OnLane<Tick>, world: &str, region: &Region) -> usize {
        self.lock()
            .entities
            .remove_where(|e| e.at.world == world && region.contains(e.at.pos.as_vec3()))
            .len()
    }
}

impl TerrainEditor for MemoryHost {
    fn paste(
        &self,
        _lane: &OnLane<Tick>,
        at: &WorldPos,
        template: &str,
    ) -> std::result::Result<Region, TerrainError> {
        let mut state = self.lock();
        if state.rejected_pastes.contains(template) {
            return Err(TerrainError::Rejected(format!("paste of {} refused", template)));
        }
        if !state.worlds.contains_key(&at.world) {
            return Err(TerrainError::WorldNotLoaded(at.world.clone()));
        }
        let shape = state
            .templates
            .get(template)
            .cloned()
            .ok_or_else(|| TerrainError::UnknownTemplate(template.to_string()))?;
        let origin = at.block();
        for (offset, block) in shape.blocks {
            state.blocks.insert((at.world.clone(), origin + offset), block);
        }
        let last = origin + (shape.size - IVec3::ONE).max(IVec3::ZERO);
        Ok(Region::from_blocks(origin, last))
    }

    fn set_blocks(
        &self,
        _lane: &OnLane<Tick>,
        world: &str,
        blocks: &[IVec3],
        block: &BlockType,
    ) -> std::result::Result<(), TerrainError> {
        let mut state = self.lock();
        if !state.worlds.contains_key(world) {
            return Err(TerrainError::WorldNotLoaded(world.to_string()));
        }
        for pos in blocks {
            state.blocks.insert((world.to_string(), *pos), block.clone());
        }
        Ok(())
    }

    fn clear_region(
        &self,
        _lane: &OnLane<Tick>,
        world: &str,
        region: &Region,
    ) -> std::result::Result<(), TerrainError> {
        let mut state = self.lock();
        if state.fail_clear {
            return Err(TerrainError::Rejected("clear refused".into()));
        }
        state
            .blocks
            .retain(|(w, pos), _| w != world || !region.contains(pos.as_vec3()));
        Ok(())
    }

    fn block_at(&self, world: &str, at: IVec3) -> BlockType {
        self.lock()
            .blocks
            .get(&(world.to_string(), at))
            .cloned()
            .unwrap_or_else(BlockType::air)
    }
}

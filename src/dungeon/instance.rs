//! Live instances: placement, roster, removal and recycling.
//!
//! Instance state is split by owner. World-facing state (rooms, roster,
//! footprint, key markers) changes on the tick lane. The mob registry, door
//! keys and trigger use counters only change through methods that take an
//! `OnLane<Components>` proof.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use glam::{IVec3, Vec3};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::format::Format;
use super::room::RoomInstance;
use crate::context::AppContext;
use crate::errors::{DungeonError, Result};
use crate::events::DungeonEvent;
use crate::geometry::{Region, WorldPos};
use crate::host::{EntityHandle, PlayerId};
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane, Tick};
use crate::mob::{DungeonMob, MobRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheState {
    NeverCached,
    Cached,
    PreviouslyCached,
}

impl CacheState {
    pub fn is_cached(&self) -> bool {
        matches!(self, CacheState::Cached)
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, CacheState::Cached | CacheState::PreviouslyCached)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemovalReason {
    NoPlayersLeft,
    FormatChange,
    PluginReload,
    ExceptionThrown,
    PluginDisable,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemovalReason::NoPlayersLeft => "NO_PLAYERS_LEFT",
            RemovalReason::FormatChange => "FORMAT_CHANGE",
            RemovalReason::PluginReload => "PLUGIN_RELOAD",
            RemovalReason::ExceptionThrown => "EXCEPTION_THROWN",
            RemovalReason::PluginDisable => "PLUGIN_DISABLE",
        };
        f.write_str(s)
    }
}

/// Key into the per-instance trigger use counters: owning component and trigger tag.
pub type UseKey = (Uuid, &'static str);

#[derive(Debug)]
struct WorldState {
    cache: CacheState,
    difficulty: f64,
    rooms: Vec<Arc<RoomInstance>>,
    players: BTreeMap<PlayerId, WorldPos>,
    footprint: Region,
    key_markers: HashSet<EntityHandle>,
    detached: bool,
}

#[derive(Debug, Default)]
struct LaneState {
    mobs: MobRegistry,
    door_keys: u32,
    uses: HashMap<UseKey, u32>,
}

/// Serializable summary of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub identifier: String,
    pub uuid: Uuid,
    pub cache: CacheState,
    pub anchor: [i32; 3],
    pub rooms: Vec<String>,
    pub players: usize,
    pub door_keys: u32,
    pub tracked_mobs: usize,
    pub created_at: DateTime<Utc>,
}

pub struct Instance {
    identifier: IdKey,
    uuid: Uuid,
    format: Weak<Format>,
    anchor: WorldPos,
    spawn: Vec3,
    created_at: DateTime<Utc>,
    world: Mutex<WorldState>,
    lane: Mutex<LaneState>,
}

impl Instance {
    /// Pastes the format's template at `anchor` and builds the rooms.
    ///
    /// A failed paste rolls the partial instance back through
    /// [`remove`](Self::remove) with `EXCEPTION_THROWN` before returning the error.
    pub(crate) fn build(
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        format: &Arc<Format>,
        anchor: WorldPos,
        cache: bool,
    ) -> Result<Arc<Self>> {
        let corner = anchor.pos.as_vec3();
        let instance = Arc::new(Self {
            identifier: format.identifier().clone(),
            uuid: Uuid::new_v4(),
            format: Arc::downgrade(format),
            spawn: format.spawn(),
            created_at: Utc::now(),
            world: Mutex::new(WorldState {
                cache: if cache {
                    CacheState::Cached
                } else {
                    CacheState::NeverCached
                },
                difficulty: 1.0,
                rooms: Vec::new(),
                players: BTreeMap::new(),
                footprint: Region::new(corner, corner + Vec3::splat(10.0)),
                key_markers: HashSet::new(),
                detached: false,
            }),
            lane: Mutex::new(LaneState::default()),
            anchor,
        });
        if let Some(template) = format.template() {
            match app.terrain.paste(tick, &instance.anchor, template) {
                Ok(region) => instance.world().footprint = region,
                Err(e) => {
                    warn!(
                        "paste of {} for {} failed, rolling back: {}",
                        template, instance.identifier, e
                    );
                    if let Err(rollback) =
                        instance.remove(app, tick, RemovalReason::ExceptionThrown, false)
                    {
                        warn!("rollback of {} incomplete: {}", instance.uuid, rollback);
                    }
                    return Err(DungeonError::Terrain(e));
                }
            }
        }
        instance.build_rooms(app, format);
        app.metrics.instance_created();
        info!(
            "Created instance {} of {} at {} (cache={:?})",
            instance.uuid,
            instance.identifier,
            instance.anchor.block(),
            instance.cache_state()
        );
        Ok(instance)
    }

    fn world(&self) -> MutexGuard<'_, WorldState> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lane(&self) -> MutexGuard<'_, LaneState> {
        self.lane.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_rooms(self: &Arc<Self>, app: &Arc<AppContext>, format: &Format) {
        let rooms: Vec<Arc<RoomInstance>> = format
            .rooms()
            .iter()
            .map(|rf| Arc::new(RoomInstance::new(self, rf.clone())))
            .collect();
        self.world().rooms = rooms.clone();
        for room in &rooms {
            room.initialize(app);
        }
    }

    pub fn identifier(&self) -> &IdKey {
        &self.identifier
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn format(&self) -> Result<Arc<Format>> {
        self.format
            .upgrade()
            .ok_or_else(|| DungeonError::NotFound(format!("format {} is unloaded", self.identifier)))
    }

    /// World position of the instance origin.
    pub fn anchor(&self) -> &WorldPos {
        &self.anchor
    }

    pub fn anchor_block(&self) -> IVec3 {
        self.anchor.block()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn cache_state(&self) -> CacheState {
        self.world().cache
    }

    pub fn difficulty(&self) -> f64 {
        self.world().difficulty
    }

    pub fn footprint(&self) -> Region {
        self.world().footprint
    }

    pub fn is_detached(&self) -> bool {
        self.world().detached
    }

    pub fn rooms(&self) -> Vec<Arc<RoomInstance>> {
        self.world().rooms.clone()
    }

    pub fn room(&self, id: &IdKey) -> Option<Arc<RoomInstance>> {
        self.world().rooms.iter().find(|r| r.identifier() == id).cloned()
    }

    pub fn room_at(&self, pos: &WorldPos) -> Option<Arc<RoomInstance>> {
        if pos.world != self.anchor.world {
            return None;
        }
        let point = pos.pos.as_vec3();
        self.world().rooms.iter().find(|r| r.region().contains(point)).cloned()
    }

    pub fn room_at_block(&self, world: &str, block: IVec3) -> Option<Arc<RoomInstance>> {
        self.room_at(&WorldPos::at_block(world, block))
    }

    // ---- roster ----

    pub fn players(&self) -> Vec<PlayerId> {
        self.world().players.keys().copied().collect()
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.world().players.contains_key(&player)
    }

    /// Where `player` stood before entering.
    pub fn saved_location(&self, player: PlayerId) -> Option<WorldPos> {
        self.world().players.get(&player).cloned()
    }

    pub fn online_players(&self, app: &AppContext) -> Vec<PlayerId> {
        self.players()
            .into_iter()
            .filter(|p| app.host.is_online(*p))
            .collect()
    }

    pub fn spawn_point(&self) -> WorldPos {
        self.anchor.offset(self.spawn)
    }

    pub fn add_player(self: &Arc<Self>, app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId) {
        let elsewhere = app
            .manager
            .current_dungeon(app, player)
            .filter(|other| other.uuid != self.uuid);
        let mut location = elsewhere
            .as_ref()
            .and_then(|other| other.saved_location(player))
            .or_else(|| app.host.player_location(player))
            .unwrap_or_else(|| app.host.main_spawn());
        if location.world == app.manager.world_name() {
            location = self
                .saved_location(player)
                .unwrap_or_else(|| app.host.main_spawn());
        }
        if let Some(other) = elsewhere {
            other.world().players.remove(&player);
        }
        {
            let mut world = self.world();
            world.players.insert(player, location);
            if world.cache == CacheState::Cached {
                world.cache = CacheState::PreviouslyCached;
            }
        }
        if !app.host.teleport(tick, player, &self.spawn_point()) {
            warn!("could not move {} into instance {}", player, self.uuid);
        }
        app.metrics.record_entry(&self.identifier.key);
        info!("{} entered {} ({})", player, self.identifier, self.uuid);
    }

    /// Restores `player`'s pre-entry location and drops them from the roster.
    /// An instance left empty in a safe state is removed with recycling allowed.
    pub fn remove_player(self: &Arc<Self>, app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId) -> bool {
        let (saved, now_empty) = {
            let mut world = self.world();
            let saved = world.players.remove(&player);
            (saved, world.players.is_empty())
        };
        let Some(saved) = saved else {
            return false;
        };
        if app.host.is_online(player) {
            app.host.teleport(tick, player, &saved);
        }
        app.metrics.record_exit(&self.identifier.key);
        info!("{} left {} ({})", player, self.identifier, self.uuid);
        if now_empty && app.state().is_safe() {
            if let Err(e) = self.remove(app, tick, RemovalReason::NoPlayersLeft, true) {
                log::error!("removing empty instance {} failed: {}", self.uuid, e);
            }
        }
        true
    }

    /// Evicts every occupant, restoring their pre-entry locations.
    pub fn remove_players(&self, app: &AppContext, tick: &OnLane<Tick>) -> usize {
        let players = std::mem::take(&mut self.world().players);
        for (player, saved) in &players {
            if app.host.is_online(*player) {
                app.host.teleport(tick, *player, saved);
            }
            app.metrics.record_exit(&self.identifier.key);
        }
        players.len()
    }

    // ---- removal ----

    /// Empties and tears down the instance, then either recycles or erases it.
    ///
    /// Recycling happens only when the instance was ever cached, `allow_cache`
    /// is set, the service is in a safe state and no listener cancels the
    /// cache event. Otherwise the instance is detached from its format and its
    /// footprint erased.
    pub fn remove(
        self: &Arc<Self>,
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        reason: RemovalReason,
        allow_cache: bool,
    ) -> Result<()> {
        info!(
            "Removing instance {} of {} (reason={}, allow_cache={})",
            self.uuid, self.identifier, reason, allow_cache
        );
        self.remove_players(app, tick);
        let rooms = std::mem::take(&mut self.world().rooms);
        for room in &rooms {
            room.tear_down(app);
        }
        self.remove_mobs(app, tick);

        let recycle = self.cache_state().was_cached() && allow_cache && app.state().is_safe();
        if !recycle {
            return self.detach_and_erase(app, tick);
        }
        if app
            .bus
            .publish(&DungeonEvent::Cache {
                instance: self.clone(),
            })
            .cancelled
        {
            info!("re-cache of {} cancelled by listener", self.uuid);
            return self.detach_and_erase(app, tick);
        }
        let format = match self.format() {
            Ok(format) => format,
            Err(e) => {
                warn!("cannot re-cache {}: {}", self.uuid, e);
                return self.detach_and_erase(app, tick);
            }
        };
        self.build_rooms(app, &format);
        self.world().cache = CacheState::Cached;
        app.metrics.instance_recycled();
        info!("Re-cached instance {} of {}", self.uuid, self.identifier);
        Ok(())
    }

    /// Removes tracked mob and key-marker entities and queues the registry reset.
    fn remove_mobs(self: &Arc<Self>, app: &Arc<AppContext>, tick: &OnLane<Tick>) {
        let handles = self.lane().mobs.handles();
        let markers: Vec<EntityHandle> = self.world().key_markers.drain().collect();
        for handle in handles.iter().chain(markers.iter()) {
            app.host.remove_entity(tick, *handle);
        }
        let instance = self.clone();
        if let Err(e) = app
            .lanes
            .components
            .submit(move |lane| instance.reset_lane_state(lane))
        {
            debug!("registry reset for {} skipped: {}", self.uuid, e);
        }
    }

    fn detach_and_erase(&self, app: &AppContext, tick: &OnLane<Tick>) -> Result<()> {
        if let Ok(format) = self.format() {
            format.detach(self.uuid);
        }
        let footprint = {
            let mut world = self.world();
            if world.detached {
                return Ok(());
            }
            world.detached = true;
            world.footprint
        };
        let world_name = &self.anchor.world;
        let removed = app.host.remove_entities_in(tick, world_name, &footprint);
        if removed > 0 {
            debug!("removed {} stray entities from {}", removed, self.uuid);
        }
        app.metrics.instance_erased();
        app.terrain
            .clear_region(tick, world_name, &footprint)
            .map_err(|e| DungeonError::PhysicalRemoval {
                instance: self.uuid.to_string(),
                reason: e.to_string(),
            })
    }

    // ---- key markers (tick lane) ----

    pub(crate) fn add_key_marker(&self, _tick: &OnLane<Tick>, marker: EntityHandle) {
        self.world().key_markers.insert(marker);
    }

    /// Forgets a marker; true if it belonged to this instance.
    pub(crate) fn take_key_marker(&self, _tick: &OnLane<Tick>, marker: EntityHandle) -> bool {
        self.world().key_markers.remove(&marker)
    }

    pub fn has_key_marker(&self, marker: EntityHandle) -> bool {
        self.world().key_markers.contains(&marker)
    }

    /// Collects a dropped key: the marker goes away and the door key counter
    /// is bumped on the components lane. False if the marker was already
    /// collected or the instance was removed in the meantime.
    pub fn collect_key(
        self: &Arc<Self>,
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        marker: EntityHandle,
        player: Option<PlayerId>,
    ) -> bool {
        if !self.take_key_marker(tick, marker) {
            return false;
        }
        app.host.remove_entity(tick, marker);
        let instance = self.clone();
        let job_app = app.clone();
        let queued = app.lanes.components.submit(move |lane| {
            let keys = instance.add_door_key(lane);
            job_app.metrics.key_collected();
            job_app.bus.publish(&DungeonEvent::KeyCollected {
                instance: instance.clone(),
                player,
            });
            info!("instance {} now holds {} door key(s)", instance.uuid, keys);
        });
        if let Err(e) = queued {
            warn!("collected key for {} not counted: {}", self.uuid, e);
            return false;
        }
        true
    }

    // ---- component-lane state ----

    pub fn track_mob(&self, _lane: &OnLane<Components>, room: &IdKey, handle: EntityHandle, mob: Arc<dyn DungeonMob>) {
        self.lane().mobs.insert(room, handle, mob);
    }

    pub fn take_mob(&self, _lane: &OnLane<Components>, room: &IdKey, handle: EntityHandle) -> Option<Arc<dyn DungeonMob>> {
        self.lane().mobs.remove(room, handle)
    }

    pub fn room_mob_count(&self, _lane: &OnLane<Components>, room: &IdKey) -> usize {
        self.lane().mobs.count(room)
    }

    /// Room a tracked entity belongs to.
    pub fn room_of_mob(&self, handle: EntityHandle) -> Option<IdKey> {
        self.lane().mobs.room_of(handle).cloned()
    }

    pub fn tracked_mobs(&self) -> Vec<EntityHandle> {
        self.lane().mobs.handles()
    }

    pub fn sweep_mobs(&self, _lane: &OnLane<Components>, alive: impl FnMut(EntityHandle) -> bool) -> usize {
        self.lane().mobs.sweep(alive)
    }

    pub fn door_keys(&self) -> u32 {
        self.lane().door_keys
    }

    pub fn add_door_key(&self, _lane: &OnLane<Components>) -> u32 {
        let mut lane = self.lane();
        lane.door_keys += 1;
        lane.door_keys
    }

    /// Applies a trigger's use ceiling. Negative ceilings never refuse.
    pub fn consume_use(&self, _lane: &OnLane<Components>, key: UseKey, ceiling: i32) -> bool {
        if ceiling < 0 {
            return true;
        }
        let mut lane = self.lane();
        let used = lane.uses.entry(key).or_insert(0);
        if *used >= ceiling as u32 {
            return false;
        }
        *used += 1;
        true
    }

    pub fn uses_of(&self, key: UseKey) -> u32 {
        self.lane().uses.get(&key).copied().unwrap_or(0)
    }

    /// Clears the mob registry, use counters and door keys.
    fn reset_lane_state(&self, _lane: &OnLane<Components>) {
        *self.lane() = LaneState::default();
    }

    pub fn status(&self) -> InstanceStatus {
        let world = self.world();
        let lane = self.lane();
        let anchor = self.anchor.block();
        InstanceStatus {
            identifier: self.identifier.to_string(),
            uuid: self.uuid,
            cache: world.cache,
            anchor: [anchor.x, anchor.y, anchor.z],
            rooms: world.rooms.iter().map(|r| r.identifier().to_string()).collect(),
            players: world.players.len(),
            door_keys: lane.door_keys,
            tracked_mobs: lane.mobs.total(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("identifier", &self.identifier)
            .field("uuid", &self.uuid)
            .field("anchor", &self.anchor.block())
            .field("cache", &self.cache_state())
            .finish()
    }
}

//! Placement and lifecycle of every live instance.
//!
//! The manager owns no instances itself: each [`Format`] keeps its own
//! instance set and the manager walks the formats in `app.formats`.

use std::sync::Arc;

use glam::IVec3;
use log::{debug, error, info, warn};
use uuid::Uuid;

use super::format::{Format, InstanceOption};
use super::instance::{Instance, InstanceStatus, RemovalReason};
use super::placement;
use super::room::RoomInstance;
use crate::component::InvocationContext;
use crate::context::AppContext;
use crate::errors::{DungeonError, Result};
use crate::geometry::WorldPos;
use crate::host::{PlayerId, WorldSettings};
use crate::identifier::IdKey;
use crate::lanes::{OnLane, Tick};

#[derive(Debug, Clone)]
pub struct DungeonManager {
    world: String,
    grid_size: i32,
    spawn_y: i32,
}

impl DungeonManager {
    pub fn new(world: impl Into<String>, grid_size: i32, spawn_y: i32) -> Self {
        Self {
            world: world.into(),
            grid_size: grid_size.max(1),
            spawn_y,
        }
    }

    /// Name of the backing world used as the placement canvas.
    pub fn world_name(&self) -> &str {
        &self.world
    }

    /// Reuses the backing world if it exists, otherwise creates it.
    pub fn acquire_world(&self, app: &AppContext, tick: &OnLane<Tick>) -> Result<()> {
        if app.host.world_exists(&self.world) {
            debug!("reusing backing world {}", self.world);
            return Ok(());
        }
        app.host
            .create_world(tick, &WorldSettings::canvas(self.world.clone()))
            .map_err(|e| DungeonError::WorldUnavailable(format!("{}: {}", self.world, e)))?;
        info!("Created backing world {}", self.world);
        Ok(())
    }

    pub fn formats(&self, app: &AppContext) -> Vec<Arc<Format>> {
        app.formats.values()
    }

    pub fn instances(&self, app: &AppContext) -> Vec<Arc<Instance>> {
        app.formats
            .values()
            .iter()
            .flat_map(|format| format.instances())
            .collect()
    }

    pub fn instance(&self, app: &AppContext, uuid: Uuid) -> Option<Arc<Instance>> {
        self.instances(app).into_iter().find(|i| i.uuid() == uuid)
    }

    /// The instance `player` is rostered in, if any.
    pub fn current_dungeon(&self, app: &AppContext, player: PlayerId) -> Option<Arc<Instance>> {
        self.instances(app).into_iter().find(|i| i.has_player(player))
    }

    /// Anchor for the next instance, based on the current live instance count.
    pub fn next_anchor(&self, app: &AppContext) -> WorldPos {
        let existing: Vec<IVec3> = self
            .instances(app)
            .iter()
            .map(|i| i.anchor_block())
            .collect();
        let spawn = app
            .host
            .world_spawn(&self.world)
            .map(|p| p.block())
            .unwrap_or(IVec3::new(0, self.spawn_y, 0));
        let anchor = placement::next_anchor(&existing, self.grid_size, spawn);
        WorldPos::at_block(self.world.clone(), anchor)
    }

    /// Places an instance of `format` and moves the reachable `players` into it.
    ///
    /// Players are evicted from whatever instance they occupy first, so a
    /// player is never rostered in two instances.
    pub fn start_instance(
        &self,
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        format: &Arc<Format>,
        option: InstanceOption,
        players: &[PlayerId],
    ) -> Result<Arc<Instance>> {
        for player in players {
            if let Some(current) = self.current_dungeon(app, *player) {
                current.remove_player(app, tick, *player);
            }
        }
        let anchor = self.next_anchor(app);
        let instance = format
            .instantiate(app, tick, anchor, option)
            .map_err(|e| DungeonError::Instantiation {
                format: format.identifier().to_string(),
                source: Box::new(e),
            })?;
        for player in players {
            if app.host.is_online(*player) {
                instance.add_player(app, tick, *player);
            } else {
                debug!("{} is offline, not added to {}", player, instance.uuid());
            }
        }
        Ok(instance)
    }

    /// Starts the format named `name`, reusing a cached instance when one is ready.
    pub fn start_instance_by_id(
        &self,
        app: &Arc<AppContext>,
        tick: &OnLane<Tick>,
        name: &str,
        players: &[PlayerId],
    ) -> Result<Arc<Instance>> {
        let format = app.formats.get_or_err(&IdKey::dungeon(name))?;
        self.start_instance(app, tick, &format, InstanceOption::ConsumeCache, players)
    }

    /// [`start_instance`](Self::start_instance) from any thread, hopping to the tick lane.
    pub async fn start(
        &self,
        app: &Arc<AppContext>,
        format: IdKey,
        option: InstanceOption,
        players: Vec<PlayerId>,
    ) -> Result<Arc<Instance>> {
        let job_app = app.clone();
        app.lanes
            .tick
            .call(move |tick| {
                let format = job_app.formats.get_or_err(&format)?;
                job_app
                    .manager
                    .start_instance(&job_app, tick, &format, option, &players)
            })
            .await?
    }

    pub fn remove_player(&self, app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId) -> bool {
        match self.current_dungeon(app, player) {
            Some(instance) => instance.remove_player(app, tick, player),
            None => false,
        }
    }

    /// Empties and removes every live instance.
    ///
    /// Only a reload allows recycling; a disable tears everything down.
    pub fn cleanup(&self, app: &Arc<AppContext>, tick: &OnLane<Tick>, reason: RemovalReason) -> usize {
        let allow_cache = reason == RemovalReason::PluginReload;
        let instances = self.instances(app);
        for instance in &instances {
            instance.remove_players(app, tick);
            if let Err(e) = instance.remove(app, tick, reason, allow_cache) {
                error!("cleanup of {} failed: {}", instance.uuid(), e);
            }
        }
        info!("Cleaned up {} instance(s) ({})", instances.len(), reason);
        instances.len()
    }

    /// Removes every instance and unloads the backing world.
    pub fn shutdown(&self, app: &Arc<AppContext>, tick: &OnLane<Tick>) -> Result<()> {
        self.cleanup(app, tick, RemovalReason::PluginDisable);
        if app.host.world_exists(&self.world) {
            app.host.unload_world(tick, &self.world, true)?;
        }
        Ok(())
    }

    /// Tears down each format's non-cached instances and builds empty cached
    /// ones up to `cache_size`. Returns how many were built.
    pub fn top_up_cache(&self, app: &Arc<AppContext>, tick: &OnLane<Tick>, cache_size: usize) -> usize {
        let formats = app.formats.values();
        if cache_size == 0 || formats.is_empty() {
            return 0;
        }
        let mut built = 0;
        for format in &formats {
            for stale in format.instances().into_iter().filter(|i| !i.cache_state().is_cached()) {
                if let Err(e) = stale.remove(app, tick, RemovalReason::FormatChange, false) {
                    warn!("could not clear {} before caching: {}", stale.uuid(), e);
                }
            }
            while format.cached().len() < cache_size {
                match self.start_instance(app, tick, format, InstanceOption::Cache, &[]) {
                    Ok(_) => built += 1,
                    Err(e) => {
                        error!("could not cache {}: {}", format.identifier(), e);
                        break;
                    }
                }
            }
        }
        info!("Cache top-up built {} instance(s)", built);
        built
    }

    /// Instances that are not cached and have no online players.
    pub fn idle_instances(&self, app: &AppContext) -> Vec<Arc<Instance>> {
        self.instances(app)
            .into_iter()
            .filter(|i| !i.cache_state().is_cached() && i.online_players(app).is_empty())
            .collect()
    }

    pub fn reap_idle(&self, app: &Arc<AppContext>, tick: &OnLane<Tick>, idle: &[Arc<Instance>]) -> usize {
        let mut reaped = 0;
        for instance in idle {
            // re-check: a player may have come back since the sample
            if instance.is_detached() || !instance.online_players(app).is_empty() {
                continue;
            }
            if let Err(e) = instance.remove(app, tick, RemovalReason::NoPlayersLeft, false) {
                error!("reaping {} failed: {}", instance.uuid(), e);
            }
            reaped += 1;
        }
        if reaped > 0 {
            info!("Reaped {} idle instance(s)", reaped);
        }
        reaped
    }

    /// Invokes a component by uuid.
    ///
    /// With a room, invokes it there. Without, invokes it in the matching room
    /// of every live instance. Returns the number of invocations queued.
    pub fn invoke_component(
        &self,
        app: &Arc<AppContext>,
        uuid: Uuid,
        room: Option<Arc<RoomInstance>>,
    ) -> Result<usize> {
        let component = app.components.get_by_uuid_or_err(uuid)?;
        let home = app
            .components
            .room_of_component(uuid)
            .ok_or_else(|| DungeonError::NotFound(format!("room of component {}", uuid)))?;
        let rooms: Vec<Arc<RoomInstance>> = match room {
            Some(room) if room.identifier() == &home => vec![room],
            Some(room) => {
                return Err(DungeonError::NotFound(format!(
                    "component {} in room {}",
                    uuid,
                    room.identifier()
                )))
            }
            None => self
                .instances(app)
                .iter()
                .filter_map(|i| i.room(&home))
                .collect(),
        };
        for room in &rooms {
            crate::engine::invoke_component(app, component.clone(), InvocationContext::new(room.clone()))?;
        }
        Ok(rooms.len())
    }

    pub fn status(&self, app: &AppContext) -> Vec<InstanceStatus> {
        self.instances(app).iter().map(|i| i.status()).collect()
    }
}

//! Live rooms, mob death reconciliation and key drops.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use glam::{IVec3, Vec3};
use log::{debug, info, warn};
use uuid::Uuid;

use super::format::{KeyDropMode, RoomFormat};
use super::instance::Instance;
use crate::component::InvocationContext;
use crate::context::AppContext;
use crate::errors::{DungeonError, Result};
use crate::events::DungeonEvent;
use crate::geometry::{Region, WorldPos};
use crate::host::{EntityHandle, KillMethod};
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane};
use crate::mob::{DeathVerdict, DungeonMob};

/// Result of a death reconciliation, reported back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathOutcome {
    Accepted,
    /// The kill was cancelled or vetoed and the host should cancel the damage.
    Rejected,
}

pub struct RoomInstance {
    identifier: IdKey,
    format: Arc<RoomFormat>,
    parent: Weak<Instance>,
    origin: IVec3,
    world: String,
    region: Region,
    doors: Mutex<HashMap<Uuid, bool>>,
    mobs_spawned: AtomicBool,
    torn_down: AtomicBool,
}

impl RoomInstance {
    pub(crate) fn new(parent: &Arc<Instance>, format: Arc<RoomFormat>) -> Self {
        let anchor = parent.anchor_block();
        Self {
            identifier: format.identifier.clone(),
            origin: anchor + format.origin,
            region: format.region.shifted(anchor),
            world: parent.anchor().world.clone(),
            parent: Arc::downgrade(parent),
            doors: Mutex::new(HashMap::new()),
            mobs_spawned: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            format,
        }
    }

    pub fn identifier(&self) -> &IdKey {
        &self.identifier
    }

    pub fn format(&self) -> &Arc<RoomFormat> {
        &self.format
    }

    pub fn instance(&self) -> Option<Arc<Instance>> {
        self.parent.upgrade()
    }

    pub fn instance_or_err(&self) -> Result<Arc<Instance>> {
        self.instance()
            .ok_or_else(|| DungeonError::NotFound(format!("instance owning room {}", self.identifier)))
    }

    /// World block the room's relative coordinates are measured from.
    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    /// World-space bounds of the room.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn contains(&self, pos: &WorldPos) -> bool {
        pos.world == self.world && self.region.contains(pos.pos.as_vec3())
    }

    pub fn world_pos(&self, relative: Vec3) -> WorldPos {
        WorldPos::new(self.world.clone(), (self.origin.as_vec3() + relative).as_dvec3())
    }

    pub fn world_block(&self, relative: Vec3) -> IVec3 {
        self.origin + relative.floor().as_ivec3()
    }

    pub fn door_open(&self, _lane: &OnLane<Components>, component: Uuid) -> bool {
        self.doors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&component)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_door_open(&self, _lane: &OnLane<Components>, component: Uuid, open: bool) {
        self.doors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component, open);
    }

    pub fn mark_mobs_spawned(&self) {
        self.mobs_spawned.store(true, Ordering::Release);
    }

    pub fn mobs_spawned(&self) -> bool {
        self.mobs_spawned.load(Ordering::Acquire)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn lifecycle_components(&self, app: &AppContext) -> Vec<Arc<crate::component::Component>> {
        app.components
            .components_in(&self.identifier)
            .into_iter()
            .filter(|c| c.kind().has_lifecycle())
            .collect()
    }

    /// Queues the initialize hooks of this room's components.
    pub(crate) fn initialize(self: &Arc<Self>, app: &Arc<AppContext>) {
        let components = self.lifecycle_components(app);
        if components.is_empty() {
            return;
        }
        let room = self.clone();
        let job_app = app.clone();
        let queued = app.lanes.components.submit(move |lane| {
            let ctx = InvocationContext::new(room.clone());
            for component in components {
                let ctx = ctx.with_component(component.clone());
                if let Err(e) = component.kind().initialize(&job_app, &component, &ctx, lane) {
                    warn!("initialize of {} in {} failed: {}", component.uuid(), room.identifier, e);
                }
            }
        });
        if let Err(e) = queued {
            debug!("room {} not initialized: {}", self.identifier, e);
        }
    }

    /// Marks the room torn down, which stops in-flight loops, and queues the shutdown hooks.
    pub(crate) fn tear_down(self: &Arc<Self>, app: &Arc<AppContext>) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let components = self.lifecycle_components(app);
        if components.is_empty() {
            return;
        }
        let room = self.clone();
        let job_app = app.clone();
        let queued = app.lanes.components.submit(move |lane| {
            let ctx = InvocationContext::new(room.clone());
            for component in components {
                let ctx = ctx.with_component(component.clone());
                if let Err(e) = component.kind().shutdown(&job_app, &component, &ctx, lane) {
                    warn!("shutdown of {} in {} failed: {}", component.uuid(), room.identifier, e);
                }
            }
        });
        if let Err(e) = queued {
            debug!("room {} shutdown hooks skipped: {}", self.identifier, e);
        }
    }

    /// Spawns `mob` on the tick lane, then tracks the entity from the components lane.
    ///
    /// An entity that comes up after the room was torn down is removed again.
    pub fn spawn_tracked(
        self: &Arc<Self>,
        app: &Arc<AppContext>,
        mob: Arc<dyn DungeonMob>,
        at: WorldPos,
    ) -> Result<()> {
        let room = self.clone();
        let job_app = app.clone();
        app.lanes.tick.submit(move |tick| {
            let handle = match job_app.host.spawn_mob(tick, mob.identifier(), &at) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("failed to spawn {} in {}: {}", mob.identifier(), room.identifier, e);
                    return;
                }
            };
            let track_app = job_app.clone();
            let queued = job_app.lanes.components.submit(move |lane| {
                match room.instance() {
                    Some(instance) if !room.is_torn_down() => {
                        instance.track_mob(lane, &room.identifier, handle, mob);
                    }
                    _ => {
                        let cleanup_app = track_app.clone();
                        let _ = track_app.lanes.tick.submit(move |tick| {
                            cleanup_app.host.remove_entity(tick, handle);
                        });
                    }
                }
            });
            if queued.is_err() {
                job_app.host.remove_entity(tick, handle);
            }
        })?;
        Ok(())
    }

    /// Reconciles the death of a tracked mob.
    ///
    /// The mob leaves the registry first. A cancelled kill event or a vetoing
    /// `on_death` puts it back and rejects the kill. An accepted kill may drop
    /// a key, depending on the room's key drop mode.
    pub fn register_mob_death(
        self: &Arc<Self>,
        app: &Arc<AppContext>,
        victim: EntityHandle,
        killer: Option<KillMethod>,
        lane: &OnLane<Components>,
    ) -> Result<DeathOutcome> {
        let instance = self.instance_or_err()?;
        let mob = instance
            .take_mob(lane, &self.identifier, victim)
            .ok_or_else(|| {
                DungeonError::Bookkeeping(format!(
                    "entity {} died in {} but was never tracked there",
                    victim, self.identifier
                ))
            })?;
        let event = DungeonEvent::MobKill {
            room: self.clone(),
            mob: mob.identifier().clone(),
            victim,
            method: killer.clone(),
        };
        if app.bus.publish(&event).cancelled {
            debug!("kill of {} in {} cancelled", victim, self.identifier);
            instance.track_mob(lane, &self.identifier, victim, mob);
            return Ok(DeathOutcome::Rejected);
        }
        if mob.on_death(self, victim, killer.as_ref()) == DeathVerdict::Veto {
            debug!("{} vetoed its own death in {}", mob.identifier(), self.identifier);
            instance.track_mob(lane, &self.identifier, victim, mob);
            return Ok(DeathOutcome::Rejected);
        }
        let drops = match self.format.key_drop_mode {
            KeyDropMode::MarkedRoomMobKill => mob.is_marked(),
            KeyDropMode::RoomMobsClear => instance.room_mob_count(lane, &self.identifier) == 0,
        };
        if drops {
            let at = app
                .host
                .entity_location(victim)
                .unwrap_or_else(|| WorldPos::new(self.world.clone(), self.region.center().as_dvec3()));
            self.drop_key(app, &instance, at);
        }
        Ok(DeathOutcome::Accepted)
    }

    /// Drops a key marker at `at`; it auto-collects after the configured delay.
    fn drop_key(self: &Arc<Self>, app: &Arc<AppContext>, instance: &Arc<Instance>, at: WorldPos) {
        let event = DungeonEvent::KeyDrop {
            room: self.clone(),
            at: at.clone(),
        };
        if app.bus.publish(&event).cancelled {
            debug!("key drop in {} cancelled", self.identifier);
            return;
        }
        app.metrics.key_dropped();
        info!("key dropped in {} ({})", self.identifier, instance.uuid());

        let item = self.format.key_item.clone();
        let instance = instance.clone();
        let job_app = app.clone();
        let queued = app.lanes.tick.submit(move |tick| {
            let keys = &job_app.config.keys;
            let glow = keys.glow.then_some(keys.glow_color.as_str());
            let marker = match job_app.host.spawn_key_marker(tick, &item, &at, glow) {
                Ok(marker) => marker,
                Err(e) => {
                    warn!("failed to place key marker: {}", e);
                    return;
                }
            };
            instance.add_key_marker(tick, marker);
            for player in instance.online_players(&job_app) {
                job_app
                    .host
                    .show_caption(player, "A key dropped!", "It will be picked up shortly");
            }
            let pickup_app = job_app.clone();
            let pickup_instance = instance.clone();
            let scheduled = job_app.lanes.tick.submit_after(keys.auto_pickup(), move |tick| {
                pickup_instance.collect_key(&pickup_app, tick, marker, None);
            });
            if let Err(e) = scheduled {
                warn!("key auto-pickup not scheduled: {}", e);
            }
        });
        if let Err(e) = queued {
            warn!("key drop in {} lost: {}", self.identifier, e);
        }
    }
}

impl fmt::Debug for RoomInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomInstance")
            .field("identifier", &self.identifier)
            .field("origin", &self.origin)
            .field("world", &self.world)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

//! Host event handlers.
//!
//! The host calls these when something happens in the simulated world. Handlers
//! that touch world state take an `&OnLane<Tick>` since the host delivers its
//! events on the tick. Player quits and mob deaths hop to other lanes.

use std::sync::Arc;

use glam::IVec3;
use log::{debug, info};

use crate::context::AppContext;
use crate::dungeon::DeathOutcome;
use crate::errors::{DungeonError, Result};
use crate::events::{DungeonEvent, PlayerAction};
use crate::geometry::WorldPos;
use crate::host::{BlockType, EntityHandle, KillMethod, PlayerId};
use crate::lanes::{OnLane, TaskHandle, Tick};

/// Schedules roster removal once the quit grace period has passed.
///
/// A player who reconnects before then keeps their instance.
pub fn on_quit(app: &Arc<AppContext>, player: PlayerId) -> Result<TaskHandle> {
    app.bus.publish(&DungeonEvent::Player {
        player,
        action: PlayerAction::Quit,
    });
    let job_app = app.clone();
    app.lanes
        .background
        .submit_after(app.config.timing.quit_grace(), move |_| {
            if job_app.host.is_online(player) {
                debug!("{} came back within the grace period", player);
                return;
            }
            let tick_app = job_app.clone();
            let queued = job_app.lanes.tick.submit(move |tick| {
                if !tick_app.host.is_online(player) && tick_app.manager.remove_player(&tick_app, tick, player) {
                    info!("{} removed from their instance after quitting", player);
                }
            });
            if let Err(e) = queued {
                debug!("quit removal for {} skipped: {}", player, e);
            }
        })
}

/// Sends a player stranded in the backing world without an instance to the
/// main spawn. Returns true when the player was moved.
pub fn on_join(app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId) -> bool {
    app.bus.publish(&DungeonEvent::Player {
        player,
        action: PlayerAction::Join,
    });
    let in_backing_world = app
        .host
        .player_location(player)
        .map(|at| at.world == app.manager.world_name())
        .unwrap_or(false);
    if !in_backing_world || app.manager.current_dungeon(app, player).is_some() {
        return false;
    }
    info!("{} joined inside the dungeon world without an instance", player);
    app.host.teleport(tick, player, &app.host.main_spawn())
}

/// Reconciles lethal damage to an entity.
///
/// `Ok(None)` means the entity is not a tracked dungeon mob. A rejected
/// outcome tells the host to cancel the damage.
pub async fn on_lethal_damage(
    app: &Arc<AppContext>,
    victim: EntityHandle,
    killer: Option<KillMethod>,
) -> Result<Option<DeathOutcome>> {
    let found = app
        .manager
        .instances(app)
        .into_iter()
        .find_map(|instance| instance.room_of_mob(victim).and_then(|id| instance.room(&id)));
    let Some(room) = found else {
        return Ok(None);
    };
    let job_app = app.clone();
    let outcome = app
        .lanes
        .components
        .call(move |lane| room.register_mob_death(&job_app, victim, killer, lane))
        .await??;
    Ok(Some(outcome))
}

/// Whether a block may be placed in `world` by `player`.
pub fn on_block_place(app: &AppContext, player: PlayerId, world: &str) -> bool {
    world != app.manager.world_name() || app.host.is_editing(player)
}

/// Leaving the backing world costs the player their instance.
pub fn on_teleport(app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId, from: &WorldPos, to: &WorldPos) -> bool {
    app.bus.publish(&DungeonEvent::Player {
        player,
        action: PlayerAction::Teleport,
    });
    let backing = app.manager.world_name();
    if from.world != backing || to.world == backing {
        return false;
    }
    app.manager.remove_player(app, tick, player)
}

pub fn on_block_interact(app: &AppContext, player: PlayerId, block: BlockType, world: &str, at: IVec3) {
    app.bus.publish(&DungeonEvent::BlockInteract {
        player,
        block,
        world: world.to_string(),
        at,
    });
}

/// A player walked over a key marker before it auto-collected.
pub fn on_key_pickup(app: &Arc<AppContext>, tick: &OnLane<Tick>, player: PlayerId, marker: EntityHandle) -> Result<bool> {
    let instance = app
        .manager
        .instances(app)
        .into_iter()
        .find(|i| i.has_key_marker(marker))
        .ok_or_else(|| DungeonError::NotFound(format!("key marker {}", marker)))?;
    Ok(instance.collect_key(app, tick, marker, Some(player)))
}

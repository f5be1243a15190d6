//! Periodic housekeeping.
//!
//! Three repeating tasks run for the lifetime of the service:
//!
//! * entity check (tick lane): samples liveness of every tracked mob entity,
//!   then hands the sample to the components lane for the registry sweep
//! * idle reaping (background lane): finds instances nobody is playing and
//!   removes them on the tick lane
//! * room tracking (tick lane): publishes room enter/leave events as rostered
//!   players move between rooms

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use log::{debug, info, warn};

use crate::context::AppContext;
use crate::dungeon::RoomInstance;
use crate::errors::Result;
use crate::events::DungeonEvent;
use crate::host::{EntityHandle, PlayerId};
use crate::lanes::TaskHandle;

/// Starts every maintenance task and returns their handles.
pub fn start(app: &Arc<AppContext>) -> Result<Vec<TaskHandle>> {
    let handles = vec![
        start_entity_check(app)?,
        start_idle_reaper(app)?,
        start_room_tracker(app)?,
    ];
    info!("Started {} maintenance task(s)", handles.len());
    Ok(handles)
}

pub fn start_entity_check(app: &Arc<AppContext>) -> Result<TaskHandle> {
    let weak: Weak<AppContext> = Arc::downgrade(app);
    app.lanes
        .tick
        .repeat(app.config.timing.entity_check_interval(), move |_tick, own| {
            let Some(app) = weak.upgrade() else {
                own.cancel();
                return;
            };
            for instance in app.manager.instances(&app) {
                let sample: HashMap<EntityHandle, bool> = instance
                    .tracked_mobs()
                    .into_iter()
                    .map(|handle| (handle, app.host.entity_alive(handle)))
                    .collect();
                if sample.values().all(|alive| *alive) {
                    continue;
                }
                let submitted = app.lanes.components.submit(move |lane| {
                    let swept = instance.sweep_mobs(lane, |h| sample.get(&h).copied().unwrap_or(true));
                    if swept > 0 {
                        debug!("swept {} despawned mob(s) from {}", swept, instance.uuid());
                    }
                });
                if let Err(e) = submitted {
                    debug!("entity sweep skipped: {}", e);
                }
            }
        })
}

pub fn start_idle_reaper(app: &Arc<AppContext>) -> Result<TaskHandle> {
    let weak: Weak<AppContext> = Arc::downgrade(app);
    app.lanes
        .background
        .repeat(app.config.timing.idle_reap_interval(), move |_lane, own| {
            let Some(app) = weak.upgrade() else {
                own.cancel();
                return;
            };
            if !app.state().is_safe() {
                return;
            }
            let idle = app.manager.idle_instances(&app);
            if idle.is_empty() {
                return;
            }
            let job_app = app.clone();
            if let Err(e) = app
                .lanes
                .tick
                .submit(move |tick| {
                    job_app.manager.reap_idle(&job_app, tick, &idle);
                })
            {
                warn!("idle reap not scheduled: {}", e);
            }
        })
}

pub fn start_room_tracker(app: &Arc<AppContext>) -> Result<TaskHandle> {
    let weak: Weak<AppContext> = Arc::downgrade(app);
    let mut previous: HashMap<PlayerId, Arc<RoomInstance>> = HashMap::new();
    app.lanes
        .tick
        .repeat(app.config.timing.room_tracking_interval(), move |_tick, own| {
            let Some(app) = weak.upgrade() else {
                own.cancel();
                return;
            };
            track_rooms(&app, &mut previous);
        })
}

/// One room-tracking sample. `previous` holds each player's room from the last sample.
pub fn track_rooms(app: &AppContext, previous: &mut HashMap<PlayerId, Arc<RoomInstance>>) {
    let mut seen = HashSet::new();
    for instance in app.manager.instances(app) {
        for player in instance.online_players(app) {
            seen.insert(player);
            let current = app
                .host
                .player_location(player)
                .and_then(|at| instance.room_at(&at));
            let before = previous.get(&player).cloned();
            let unchanged = match (&before, &current) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }
            if let Some(room) = before.filter(|r| !r.is_torn_down()) {
                app.bus.publish(&DungeonEvent::RoomLeave { player, room });
            }
            match current {
                Some(room) => {
                    previous.insert(player, room.clone());
                    app.bus.publish(&DungeonEvent::RoomEnter { player, room });
                }
                None => {
                    previous.remove(&player);
                }
            }
        }
    }
    previous.retain(|player, room| {
        if seen.contains(player) {
            return true;
        }
        if !room.is_torn_down() {
            app.bus.publish(&DungeonEvent::RoomLeave {
                player: *player,
                room: room.clone(),
            });
        }
        false
    });
}

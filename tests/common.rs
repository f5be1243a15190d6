//! Test utilities & fixtures.
//! Builds an application context over the in-memory host with short timings.

use std::sync::Arc;
use std::time::Duration;

use glam::{IVec3, Vec3};
use instancer::config::Config;
use instancer::context::AppContext;
use instancer::dungeon::{Instance, InstanceOption};
use instancer::host::memory::MemoryHost;
use instancer::host::PlayerId;
use instancer::identifier::IdKey;
use instancer::lanes::{OnLane, Tick};
use instancer::loader::{DefinitionSet, FormatDef, RoomDef};

/// Timings short enough for tests; the idle reaper stays out of the way.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dungeon.cache_size_per_dungeon = 0;
    config.keys.auto_pickup_secs = 3600;
    config.timing.idle_reap_interval_secs = 3600;
    config.timing.quit_grace_secs = 0;
    config.timing.entity_check_interval_ms = 3_600_000;
    config.timing.room_tracking_interval_ms = 20;
    config.timing.door_layer_stagger_ms = 1;
    config.timing.prompt_timeout_secs = 1;
    config
}

pub fn setup_with(config: Config) -> (Arc<AppContext>, Arc<MemoryHost>) {
    let host = Arc::new(MemoryHost::default());
    let app = AppContext::new(config, host.clone(), host.clone()).expect("context");
    (app, host)
}

#[allow(dead_code)]
pub fn setup() -> (Arc<AppContext>, Arc<MemoryHost>) {
    setup_with(test_config())
}

/// One format `crypt` with a single 10x10x10 room `hall` at the anchor.
#[allow(dead_code)]
pub fn crypt() -> DefinitionSet {
    DefinitionSet::new().with_format(
        FormatDef::new("crypt", Vec3::new(5.0, 1.0, 5.0)).with_room(RoomDef::new(
            "hall",
            IVec3::ZERO,
            IVec3::ZERO,
            IVec3::splat(9),
        )),
    )
}

#[allow(dead_code)]
pub async fn enabled(config: Config, definitions: &DefinitionSet) -> (Arc<AppContext>, Arc<MemoryHost>) {
    let (app, host) = setup_with(config);
    app.enable(definitions).await.expect("enable");
    (app, host)
}

/// Runs `f` on the tick lane and waits for its result.
#[allow(dead_code)]
pub async fn on_tick<R, F>(app: &Arc<AppContext>, f: F) -> R
where
    R: Send + 'static,
    F: FnOnce(&Arc<AppContext>, &OnLane<Tick>) -> R + Send + 'static,
{
    let job_app = app.clone();
    app.lanes
        .tick
        .call(move |tick| f(&job_app, tick))
        .await
        .expect("tick lane open")
}

/// Lets work bounce between the components and tick lanes until it settles.
#[allow(dead_code)]
pub async fn settle(app: &Arc<AppContext>) {
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.lanes.components.flush().await.expect("components lane open");
        app.lanes.tick.flush().await.expect("tick lane open");
    }
}

#[allow(dead_code)]
pub async fn start(
    app: &Arc<AppContext>,
    format: &str,
    option: InstanceOption,
    players: Vec<PlayerId>,
) -> Arc<Instance> {
    let instance = app
        .manager
        .start(app, IdKey::dungeon(format), option, players)
        .await
        .expect("instance starts");
    settle(app).await;
    instance
}

//! Mob tracking, death reconciliation and the door key counter.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::{IVec3, Vec3};
use instancer::codec::CodecRegistry;
use instancer::component::traits::{LocationAndDirectionTrait, QuantityRange, SpawnerTrait};
use instancer::component::Component;
use instancer::config::Config;
use instancer::context::AppContext;
use instancer::dungeon::{DeathOutcome, Instance, InstanceOption, KeyDropMode};
use instancer::events::{EventKind, Verdict};
use instancer::host::memory::{EntityKind, MemoryHost};
use instancer::host::{EntityHandle, KillMethod, PlayerId};
use instancer::identifier::IdKey;
use instancer::listeners;
use instancer::loader::{DefinitionSet, FormatDef, MobDef, RoomDef};
use uuid::Uuid;

use common::{on_tick, settle, start, test_config};

struct Den {
    app: Arc<AppContext>,
    host: Arc<MemoryHost>,
    instance: Arc<Instance>,
    spawner: Uuid,
    player: PlayerId,
}

async fn lair(config: Config, mode: KeyDropMode, mob: MobDef, quantity: u32) -> Den {
    let spawner = Uuid::new_v4();
    let component = Component::spawner(
        LocationAndDirectionTrait::new(Vec3::new(4.0, 1.0, 4.0), 0.0, 0.0),
        SpawnerTrait::new(IdKey::mob(mob.name.clone()), QuantityRange::exactly(quantity), 0.0),
        spawner,
    )
    .expect("spawner has its traits");
    let defs = DefinitionSet::new()
        .with_format(
            FormatDef::new("lair", Vec3::new(2.0, 1.0, 2.0))
                .with_room(RoomDef::new("den", IVec3::ZERO, IVec3::ZERO, IVec3::splat(9)).with_key_drop(mode)),
        )
        .with_mob(mob)
        .with_component("den", &component, CodecRegistry::global())
        .expect("spawner encodes");
    let (app, host) = common::enabled(config, &defs).await;
    let player = host.join_at_spawn();
    let instance = start(&app, "lair", InstanceOption::NewNonCached, vec![player]).await;
    Den {
        app,
        host,
        instance,
        spawner,
        player,
    }
}

impl Den {
    async fn spawn(&self) -> Vec<EntityHandle> {
        let room = self.instance.room(&IdKey::room("den")).expect("den built");
        self.app
            .manager
            .invoke_component(&self.app, self.spawner, Some(room))
            .expect("spawner invoked");
        settle(&self.app).await;
        self.instance.tracked_mobs()
    }

    async fn kill(&self, victim: EntityHandle) -> Option<DeathOutcome> {
        listeners::on_lethal_damage(&self.app, victim, Some(KillMethod::Player(self.player)))
            .await
            .expect("death reconciled")
    }

    fn markers(&self) -> Vec<EntityHandle> {
        self.host
            .entities()
            .into_iter()
            .filter(|(_, e)| matches!(e.kind, EntityKind::KeyMarker { .. }))
            .map(|(h, _)| h)
            .collect()
    }
}

#[tokio::test]
async fn spawner_tracks_every_mob() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 3).await;
    let mobs = den.spawn().await;
    assert_eq!(mobs.len(), 3);
    for handle in &mobs {
        let record = den.host.entity(*handle).expect("mob spawned");
        assert_eq!(record.kind, EntityKind::Mob(IdKey::mob("zombie")));
        assert_eq!(den.instance.room_of_mob(*handle), Some(IdKey::room("den")));
    }
}

#[tokio::test]
async fn clearing_the_room_drops_exactly_one_key() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 2).await;
    let mobs = den.spawn().await;
    assert_eq!(mobs.len(), 2);

    assert_eq!(den.kill(mobs[0]).await, Some(DeathOutcome::Accepted));
    settle(&den.app).await;
    assert_eq!(den.app.metrics.snapshot().keys_dropped, 0);

    assert_eq!(den.kill(mobs[1]).await, Some(DeathOutcome::Accepted));
    settle(&den.app).await;
    assert_eq!(den.app.metrics.snapshot().keys_dropped, 1);

    let markers = den.markers();
    assert_eq!(markers.len(), 1);
    assert!(den.instance.has_key_marker(markers[0]));
    assert!(den
        .host
        .captions_for(den.player)
        .iter()
        .any(|c| c.starts_with("A key dropped!")));
}

#[tokio::test]
async fn picking_up_a_key_adds_a_door_key() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 1).await;
    let mobs = den.spawn().await;
    den.kill(mobs[0]).await;
    settle(&den.app).await;
    let marker = den.markers()[0];

    let player = den.player;
    let collected = on_tick(&den.app, move |app, tick| listeners::on_key_pickup(app, tick, player, marker))
        .await
        .expect("marker belongs to an instance");
    assert!(collected);
    settle(&den.app).await;
    assert_eq!(den.instance.door_keys(), 1);
    assert!(den.markers().is_empty());

    let again = on_tick(&den.app, move |app, tick| listeners::on_key_pickup(app, tick, player, marker)).await;
    assert!(again.is_err());
    assert_eq!(den.instance.door_keys(), 1);
    assert_eq!(den.app.metrics.snapshot().keys_collected, 1);
}

#[tokio::test]
async fn keys_auto_collect_after_the_delay() {
    let mut config = test_config();
    config.keys.auto_pickup_secs = 1;
    let den = lair(config, KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 1).await;
    let mobs = den.spawn().await;
    den.kill(mobs[0]).await;
    settle(&den.app).await;
    assert_eq!(den.markers().len(), 1);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    settle(&den.app).await;
    assert!(den.markers().is_empty());
    assert_eq!(den.instance.door_keys(), 1);
}

#[tokio::test]
async fn marked_kill_mode_drops_for_marked_mobs_only() {
    let den = lair(test_config(), KeyDropMode::MarkedRoomMobKill, MobDef::new("imp", false), 2).await;
    let mobs = den.spawn().await;
    den.kill(mobs[0]).await;
    settle(&den.app).await;
    assert_eq!(den.app.metrics.snapshot().keys_dropped, 0);

    let boss = lair(test_config(), KeyDropMode::MarkedRoomMobKill, MobDef::boss("lich"), 2).await;
    let mobs = boss.spawn().await;
    boss.kill(mobs[0]).await;
    settle(&boss.app).await;
    assert_eq!(boss.app.metrics.snapshot().keys_dropped, 1);
}

#[tokio::test]
async fn cancelled_kill_keeps_the_mob_tracked() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 1).await;
    let mobs = den.spawn().await;
    let vetoes = Arc::new(AtomicUsize::new(0));
    let seen = vetoes.clone();
    den.app.bus.subscribe(EventKind::MobKill, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Verdict::Cancel
    });

    assert_eq!(den.kill(mobs[0]).await, Some(DeathOutcome::Rejected));
    assert_eq!(vetoes.load(Ordering::SeqCst), 1);
    assert_eq!(den.instance.tracked_mobs(), mobs);
    assert_eq!(den.app.metrics.snapshot().keys_dropped, 0);
}

#[tokio::test]
async fn untracked_entities_are_not_dungeon_mobs() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 1).await;
    let stray = EntityHandle {
        index: 9999,
        generation: 1,
    };
    assert_eq!(den.kill(stray).await, None);
}

#[tokio::test]
async fn despawned_mobs_are_swept_from_the_registry() {
    let mut config = test_config();
    config.timing.entity_check_interval_ms = 30;
    let den = lair(config, KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 2).await;
    let mobs = den.spawn().await;
    assert!(den.host.despawn(mobs[0]));

    tokio::time::sleep(Duration::from_millis(150)).await;
    settle(&den.app).await;
    assert_eq!(den.instance.tracked_mobs(), vec![mobs[1]]);
}

#[tokio::test]
async fn removal_clears_mobs_and_markers() {
    let den = lair(test_config(), KeyDropMode::RoomMobsClear, MobDef::new("zombie", false), 2).await;
    let mobs = den.spawn().await;
    den.kill(mobs[0]).await;
    settle(&den.app).await;

    let player = den.player;
    on_tick(&den.app, move |app, tick| app.manager.remove_player(app, tick, player)).await;
    settle(&den.app).await;

    assert!(den.instance.is_detached());
    assert!(den.instance.tracked_mobs().is_empty());
    assert!(den.host.entities().is_empty());
}

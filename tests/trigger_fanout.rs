//! Event triggers, use ceilings and fan-out to target components.

mod common;

use std::sync::Arc;
use std::time::Duration;

use glam::{IVec3, Vec3};
use instancer::codec::CodecRegistry;
use instancer::component::traits::{LocationTrait, SendCommandTrait, SetBlocksTrait, SweepStrategy};
use instancer::component::triggers::{
    BlockInteractTrigger, RoomEnterTrigger, TriggerRule, BLOCK_INTERACT, ROOM_ENTER,
};
use instancer::component::Component;
use instancer::context::AppContext;
use instancer::dungeon::{CacheState, Instance, InstanceOption, RoomInstance};
use instancer::edit::{publish_edit, EditCommand};
use instancer::events::EventKind;
use instancer::geometry::WorldPos;
use instancer::host::memory::MemoryHost;
use instancer::host::{BlockType, PlayerId, TerrainEditor};
use instancer::identifier::IdKey;
use instancer::listeners;
use instancer::loader::{DefinitionSet, FormatDef, RoomDef};
use uuid::Uuid;

use common::{crypt, enabled, on_tick, settle, start, test_config};

const LEVER: Vec3 = Vec3::new(3.0, 1.0, 3.0);

fn command(uuid: Uuid) -> Component {
    Component::send_command(SendCommandTrait::new("say {player} in {room}"), uuid).expect("command has its trait")
}

fn lever(uses: i32, targets: Vec<Uuid>, uuid: Uuid) -> Component {
    Component::on_block_interact(
        BlockInteractTrigger::new(None, TriggerRule::new(uses, targets)),
        LocationTrait::new(LEVER),
        uuid,
    )
    .expect("lever has its traits")
}

struct Hall {
    app: Arc<AppContext>,
    host: Arc<MemoryHost>,
    instance: Arc<Instance>,
    hall: Arc<RoomInstance>,
    player: PlayerId,
}

impl Hall {
    async fn pull_lever(&self) {
        listeners::on_block_interact(
            &self.app,
            self.player,
            BlockType::new("lever"),
            self.hall.world(),
            self.hall.world_block(LEVER),
        );
        settle(&self.app).await;
    }
}

async fn hall_with(components: &[Component]) -> Hall {
    let mut defs = crypt();
    for component in components {
        defs = defs
            .with_component("hall", component, CodecRegistry::global())
            .expect("component encodes");
    }
    let (app, host) = enabled(test_config(), &defs).await;
    let player = host.join_at_spawn();
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![player]).await;
    let hall = instance.room(&IdKey::room("hall")).expect("hall built");
    Hall {
        app,
        host,
        instance,
        hall,
        player,
    }
}

#[tokio::test]
async fn use_ceiling_caps_fan_outs() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(2, vec![target], lever_id), command(target)]).await;

    for _ in 0..3 {
        hall.pull_lever().await;
    }

    let commands = hall.host.dispatched_commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0], format!("say {} in hall", hall.player));
    assert_eq!(hall.instance.uses_of((lever_id, BLOCK_INTERACT)), 2);
    let metrics = hall.app.metrics.snapshot();
    assert_eq!(metrics.fan_outs_fired, 2);
    assert_eq!(metrics.fan_outs_suppressed, 1);
}

#[tokio::test]
async fn negative_ceiling_never_runs_out() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(-1, vec![target], lever_id), command(target)]).await;

    for _ in 0..5 {
        hall.pull_lever().await;
    }
    assert_eq!(hall.host.dispatched_commands().len(), 5);
}

#[tokio::test]
async fn other_blocks_do_not_fire_the_lever() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(-1, vec![target], lever_id), command(target)]).await;

    listeners::on_block_interact(
        &hall.app,
        hall.player,
        BlockType::new("lever"),
        hall.hall.world(),
        hall.hall.world_block(LEVER) + IVec3::X,
    );
    settle(&hall.app).await;
    assert!(hall.host.dispatched_commands().is_empty());
}

#[tokio::test]
async fn missing_targets_are_skipped() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(-1, vec![Uuid::new_v4(), target], lever_id), command(target)]).await;

    hall.pull_lever().await;
    assert_eq!(hall.host.dispatched_commands().len(), 1);
}

#[tokio::test]
async fn editing_the_ceiling_takes_effect_immediately() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(-1, vec![target], lever_id), command(target)]).await;

    hall.pull_lever().await;
    publish_edit(&hall.app, lever_id, &EditCommand::SetUses(1)).expect("edit applies");
    hall.pull_lever().await;
    hall.pull_lever().await;

    assert_eq!(hall.host.dispatched_commands().len(), 2);
    assert_eq!(hall.app.triggers.registration_count(EventKind::BlockInteract), 1);
}

#[tokio::test]
async fn room_enter_fires_from_the_tracker() {
    let (trigger, target) = (Uuid::new_v4(), Uuid::new_v4());
    let enter = Component::on_room_enter(RoomEnterTrigger::new(TriggerRule::new(1, vec![target])), trigger)
        .expect("trigger has its trait");
    let hall = hall_with(&[enter, command(target)]).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    settle(&hall.app).await;
    assert_eq!(hall.host.dispatched_commands().len(), 1);

    let outside = WorldPos::new(hall.hall.world(), hall.hall.world_pos(Vec3::new(50.0, 1.0, 50.0)).pos);
    hall.host.walk(hall.player, outside);
    tokio::time::sleep(Duration::from_millis(100)).await;
    hall.host.walk(hall.player, hall.hall.world_pos(Vec3::new(5.0, 1.0, 5.0)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle(&hall.app).await;

    assert_eq!(hall.host.dispatched_commands().len(), 1);
    assert_eq!(hall.instance.uses_of((trigger, ROOM_ENTER)), 1);
}

#[tokio::test]
async fn fan_out_reaches_a_door_in_another_room() {
    let (lever_id, door_id) = (Uuid::new_v4(), Uuid::new_v4());
    let door = Component::door(
        SetBlocksTrait::new(BlockType::new("ice"), BlockType::air(), SweepStrategy::BottomUp, vec![IVec3::ONE]),
        door_id,
    )
    .expect("door has its traits");
    let defs = DefinitionSet::new()
        .with_format(
            FormatDef::new("crypt", Vec3::new(5.0, 1.0, 5.0))
                .with_room(RoomDef::new("hall", IVec3::ZERO, IVec3::ZERO, IVec3::splat(9)))
                .with_room(RoomDef::new(
                    "vault",
                    IVec3::new(10, 0, 0),
                    IVec3::new(10, 0, 0),
                    IVec3::new(19, 9, 9),
                )),
        )
        .with_component("hall", &lever(-1, vec![door_id], lever_id), CodecRegistry::global())
        .and_then(|d| d.with_component("vault", &door, CodecRegistry::global()))
        .expect("components encode");
    let (app, host) = enabled(test_config(), &defs).await;
    let player = host.join_at_spawn();
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![player]).await;
    let hall = instance.room(&IdKey::room("hall")).expect("hall built");
    let vault = instance.room(&IdKey::room("vault")).expect("vault built");

    listeners::on_block_interact(&app, player, BlockType::new("lever"), hall.world(), hall.world_block(LEVER));
    settle(&app).await;

    let door_room = vault.clone();
    let open = app
        .lanes
        .components
        .call(move |lane| door_room.door_open(lane, door_id))
        .await
        .expect("components lane open");
    assert!(open);

    let at = vault.origin() + IVec3::ONE;
    assert_eq!(host.block_at(vault.world(), at), BlockType::new("ice"));
}

#[tokio::test]
async fn triggers_stay_quiet_while_reloading() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let hall = hall_with(&[lever(-1, vec![target], lever_id), command(target)]).await;
    assert_eq!(hall.app.triggers.registration_count(EventKind::BlockInteract), 1);

    hall.app.set_state(instancer::context::ServiceState::Reloading);
    assert_eq!(hall.app.triggers.registration_count(EventKind::BlockInteract), 0);
    hall.pull_lever().await;
    assert!(hall.host.dispatched_commands().is_empty());
}

#[tokio::test]
async fn recycling_an_instance_restores_its_use_ceiling() {
    let (lever_id, target) = (Uuid::new_v4(), Uuid::new_v4());
    let defs = crypt()
        .with_component("hall", &lever(1, vec![target], lever_id), CodecRegistry::global())
        .and_then(|d| d.with_component("hall", &command(target), CodecRegistry::global()))
        .expect("components encode");
    let mut config = test_config();
    config.dungeon.cache_size_per_dungeon = 1;
    let (app, host) = enabled(config, &defs).await;
    let player = host.join_at_spawn();
    let instance = start(&app, "crypt", InstanceOption::ConsumeCache, vec![player]).await;

    let pull = |hall: Arc<RoomInstance>| {
        let app = app.clone();
        async move {
            listeners::on_block_interact(&app, player, BlockType::new("lever"), hall.world(), hall.world_block(LEVER));
            settle(&app).await;
        }
    };
    let hall = instance.room(&IdKey::room("hall")).expect("hall built");
    pull(hall.clone()).await;
    pull(hall).await;
    assert_eq!(host.dispatched_commands().len(), 1);
    assert_eq!(instance.uses_of((lever_id, BLOCK_INTERACT)), 1);

    let removed = on_tick(&app, move |app, tick| app.manager.remove_player(app, tick, player)).await;
    assert!(removed);
    settle(&app).await;
    assert_eq!(instance.cache_state(), CacheState::Cached);
    assert_eq!(instance.uses_of((lever_id, BLOCK_INTERACT)), 0);

    let back = instance.clone();
    on_tick(&app, move |app, tick| back.add_player(app, tick, player)).await;
    let rebuilt = instance.room(&IdKey::room("hall")).expect("hall rebuilt");
    pull(rebuilt.clone()).await;
    pull(rebuilt).await;
    assert_eq!(host.dispatched_commands().len(), 2);
    assert_eq!(instance.uses_of((lever_id, BLOCK_INTERACT)), 1);
}

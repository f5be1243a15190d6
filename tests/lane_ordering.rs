//! Component-lane state stays linearizable under concurrent submitters.

mod common;

use std::sync::{mpsc, Arc, Mutex};

use glam::IVec3;
use instancer::codec::CodecRegistry;
use instancer::component::traits::{SetBlocksTrait, SweepStrategy};
use instancer::component::{Component, InvocationContext};
use instancer::context::AppContext;
use instancer::dungeon::{InstanceOption, RoomInstance};
use instancer::engine;
use instancer::errors::DungeonError;
use instancer::host::BlockType;
use instancer::identifier::IdKey;
use uuid::Uuid;

use common::{crypt, enabled, start, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn door_keys_count_every_concurrent_increment() {
    let (app, _host) = enabled(test_config(), &crypt()).await;
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![]).await;

    let mut submitters = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        let instance = instance.clone();
        submitters.push(tokio::spawn(async move {
            for _ in 0..250 {
                let instance = instance.clone();
                app.lanes
                    .components
                    .submit(move |lane| {
                        instance.add_door_key(lane);
                    })
                    .expect("components lane open");
            }
        }));
    }
    for submitter in submitters {
        submitter.await.expect("submitter finished");
    }
    app.lanes.components.flush().await.expect("components lane open");
    assert_eq!(instance.door_keys(), 2000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn use_ceiling_holds_under_contention() {
    let (app, _host) = enabled(test_config(), &crypt()).await;
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![]).await;
    let key = (Uuid::new_v4(), "on-room-enter");

    let mut calls = Vec::new();
    for _ in 0..64 {
        let instance = instance.clone();
        calls.push(app.lanes.components.call(move |lane| instance.consume_use(lane, key, 10)));
    }
    let mut granted = 0;
    for call in calls {
        if call.await.expect("components lane open") {
            granted += 1;
        }
    }
    assert_eq!(granted, 10);
    assert_eq!(instance.uses_of(key), 10);
}

#[tokio::test]
async fn lane_proofs_are_only_issued_on_their_lane() {
    let (app, _host) = enabled(test_config(), &crypt()).await;
    assert!(matches!(
        app.lanes.components.proof(),
        Err(DungeonError::LaneAffinity { .. })
    ));

    let job_app = Arc::clone(&app);
    let on_lane = app
        .lanes
        .components
        .call(move |_| job_app.lanes.components.proof().is_ok())
        .await
        .expect("components lane open");
    assert!(on_lane);
}

#[tokio::test]
async fn invoking_an_unknown_component_fails() {
    let (app, _host) = enabled(test_config(), &crypt()).await;
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![]).await;
    assert!(instance.room(&IdKey::room("hall")).is_some());

    let missing = app.manager.invoke_component(&app, Uuid::new_v4(), None);
    assert!(matches!(missing, Err(DungeonError::NotFound(_))));
}

fn door(uuid: Uuid) -> Component {
    Component::door(
        SetBlocksTrait::new(BlockType::new("ice"), BlockType::air(), SweepStrategy::BottomUp, vec![IVec3::ONE]),
        uuid,
    )
    .expect("door has its traits")
}

async fn hall_with_door(uuid: Uuid) -> (Arc<AppContext>, Arc<RoomInstance>, Arc<Component>) {
    let defs = crypt()
        .with_component("hall", &door(uuid), CodecRegistry::global())
        .expect("component encodes");
    let (app, _host) = enabled(test_config(), &defs).await;
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![]).await;
    let hall = instance.room(&IdKey::room("hall")).expect("hall built");
    let component = app.components.get_by_uuid(uuid).expect("component loaded");
    (app, hall, component)
}

async fn door_state(app: &Arc<AppContext>, hall: &Arc<RoomInstance>, uuid: Uuid) -> bool {
    let hall = hall.clone();
    app.lanes
        .components
        .call(move |lane| hall.door_open(lane, uuid))
        .await
        .expect("components lane open")
}

#[tokio::test]
async fn single_traits_refuse_to_run_off_the_components_lane() {
    let uuid = Uuid::new_v4();
    let (app, hall, component) = hall_with_door(uuid).await;

    let ctx = InvocationContext::new(hall.clone()).with_component(component.clone());
    let functional = component.functional_traits().next().expect("door is functional");
    assert!(matches!(
        engine::invoke_trait(&app, functional, &ctx),
        Err(DungeonError::LaneAffinity { .. })
    ));
    assert!(!door_state(&app, &hall, uuid).await);

    let job_app = app.clone();
    app.lanes
        .components
        .call(move |_| {
            let functional = component.functional_traits().next().expect("door is functional");
            engine::invoke_trait(&job_app, functional, &ctx)
        })
        .await
        .expect("components lane open")
        .expect("trait runs on its lane");
    assert!(door_state(&app, &hall, uuid).await);
}

#[tokio::test]
async fn component_invocation_runs_inline_on_the_lane_and_queues_elsewhere() {
    let uuid = Uuid::new_v4();
    let (app, hall, component) = hall_with_door(uuid).await;

    let (job_app, job_hall, job_component) = (app.clone(), hall.clone(), component.clone());
    let open_before_return = app
        .lanes
        .components
        .call(move |lane| {
            engine::invoke_component(&job_app, job_component, InvocationContext::new(job_hall.clone()))
                .expect("inline invocation succeeds");
            job_hall.door_open(lane, uuid)
        })
        .await
        .expect("components lane open");
    assert!(open_before_return);

    let (release, gate) = mpsc::channel::<()>();
    let seen_while_queued = Arc::new(Mutex::new(None));
    let (seen, gate_hall) = (seen_while_queued.clone(), hall.clone());
    app.lanes
        .components
        .submit(move |lane| {
            let _ = gate.recv();
            *seen.lock().unwrap() = Some(gate_hall.door_open(lane, uuid));
        })
        .expect("components lane open");
    engine::invoke_component(&app, component, InvocationContext::new(hall.clone())).expect("invocation queued");
    release.send(()).expect("gate still waiting");
    app.lanes.components.flush().await.expect("components lane open");

    assert_eq!(*seen_while_queued.lock().unwrap(), Some(true));
    assert!(!door_state(&app, &hall, uuid).await);
}

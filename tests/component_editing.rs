//! Editor prompts, published edits and outline sessions.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::IVec3;
use instancer::codec::CodecRegistry;
use instancer::component::traits::{SetBlocksTrait, SweepStrategy};
use instancer::component::Component;
use instancer::context::{AppContext, ServiceState};
use instancer::dungeon::InstanceOption;
use instancer::edit::{self, EditCommand, EditField, EditSession, OutlineSink};
use instancer::errors::DungeonError;
use instancer::events::{DungeonEvent, EventKind, Verdict};
use instancer::host::{BlockType, PlayerId};
use instancer::identifier::IdKey;
use uuid::Uuid;

use common::{crypt, enabled, start, test_config};

#[derive(Default)]
struct RecordingSink {
    drawn: Mutex<Vec<Vec<IVec3>>>,
}

impl OutlineSink for RecordingSink {
    fn draw_outline(&self, _player: PlayerId, _world: &str, blocks: &[IVec3]) {
        self.drawn.lock().unwrap().push(blocks.to_vec());
    }
}

async fn wait_for_question(app: &Arc<AppContext>, player: PlayerId) {
    for _ in 0..100 {
        if app.questions.is_waiting(player) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no question was opened for {}", player);
}

fn door(uuid: Uuid) -> Component {
    Component::door(
        SetBlocksTrait::new(BlockType::new("ice"), BlockType::air(), SweepStrategy::BottomUp, vec![IVec3::ONE]),
        uuid,
    )
    .unwrap()
}

#[tokio::test]
async fn answered_question_becomes_a_command() {
    let (app, host) = enabled(test_config(), &crypt()).await;
    let player = host.join_at_spawn();

    let asking = tokio::spawn({
        let app = app.clone();
        async move { edit::ask(&app, player, EditField::Uses).await }
    });
    wait_for_question(&app, player).await;
    assert!(app.questions.answer(player, " 3 "));

    let command = asking.await.unwrap().unwrap();
    assert!(matches!(command, EditCommand::SetUses(3)));
    assert!(host
        .captions_for(player)
        .iter()
        .any(|c| c.contains(EditField::Uses.prompt())));
}

#[tokio::test]
async fn unanswered_question_expires() {
    let (app, host) = enabled(test_config(), &crypt()).await;
    let player = host.join_at_spawn();

    let result = edit::ask_within(&app, player, EditField::Radius, Duration::from_millis(50)).await;
    assert!(matches!(result, Err(DungeonError::PromptExpired(_))));
    app.lanes.prompts.flush().await.unwrap();
    assert!(!app.questions.is_waiting(player));
    assert!(!app.questions.answer(player, "2.5"));
}

#[tokio::test]
async fn newer_question_cancels_the_older_one() {
    let (app, host) = enabled(test_config(), &crypt()).await;
    let player = host.join_at_spawn();

    let first = tokio::spawn({
        let app = app.clone();
        async move { edit::ask(&app, player, EditField::Mob).await }
    });
    wait_for_question(&app, player).await;
    let second = tokio::spawn({
        let app = app.clone();
        async move { edit::ask(&app, player, EditField::Command).await }
    });

    assert!(matches!(first.await.unwrap(), Err(DungeonError::Cancelled(_))));
    wait_for_question(&app, player).await;
    assert!(app.questions.answer(player, "/say hello"));
    match second.await.unwrap().unwrap() {
        EditCommand::SetCommand(command) => assert_eq!(command, "say hello"),
        other => panic!("unexpected command {:?}", other),
    }
}

#[tokio::test]
async fn published_edit_replaces_the_component_and_announces_it() {
    let uuid = Uuid::new_v4();
    let defs = crypt().with_component("hall", &door(uuid), CodecRegistry::global()).unwrap();
    let (app, _host) = enabled(test_config(), &defs).await;
    let replaced = Arc::new(Mutex::new(None));
    let seen = replaced.clone();
    app.bus.subscribe(EventKind::ComponentReplaced, move |event| {
        if let DungeonEvent::ComponentReplaced { old, new } = event {
            *seen.lock().unwrap() = Some((old.uuid(), new.uuid()));
        }
        Verdict::Continue
    });

    let edited = edit::publish_edit(&app, uuid, &EditCommand::SetSweep(SweepStrategy::TopDown)).unwrap();

    assert_eq!(edited.get_trait::<SetBlocksTrait>().unwrap().sweep, SweepStrategy::TopDown);
    let stored = app.components.get_by_uuid(uuid).unwrap();
    assert_eq!(stored.get_trait::<SetBlocksTrait>().unwrap().sweep, SweepStrategy::TopDown);
    assert_eq!(*replaced.lock().unwrap(), Some((uuid, uuid)));
}

#[tokio::test]
async fn edit_of_a_missing_trait_is_refused() {
    let uuid = Uuid::new_v4();
    let defs = crypt().with_component("hall", &door(uuid), CodecRegistry::global()).unwrap();
    let (app, _host) = enabled(test_config(), &defs).await;

    let result = edit::publish_edit(&app, uuid, &EditCommand::SetUses(2));
    assert!(result.is_err());
    let stored = app.components.get_by_uuid(uuid).unwrap();
    assert_eq!(stored.get_trait::<SetBlocksTrait>().unwrap().sweep, SweepStrategy::BottomUp);
}

#[tokio::test]
async fn edit_session_outlines_until_the_player_stops_editing() {
    let uuid = Uuid::new_v4();
    let defs = crypt().with_component("hall", &door(uuid), CodecRegistry::global()).unwrap();
    let (app, host) = enabled(test_config(), &defs).await;
    let player = host.join_at_spawn();
    host.set_editing(player, true);
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![player]).await;
    let hall = instance.room(&IdKey::room("hall")).unwrap();

    let sink = Arc::new(RecordingSink::default());
    let session = EditSession::start(&app, player, hall.clone(), uuid, sink.clone(), Duration::from_millis(10)).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    {
        let drawn = sink.drawn.lock().unwrap();
        assert!(!drawn.is_empty());
        assert_eq!(drawn[0], vec![hall.origin() + IVec3::ONE]);
    }

    host.set_editing(player, false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!session.is_active());
}

#[tokio::test]
async fn state_change_cancels_edit_sessions() {
    let uuid = Uuid::new_v4();
    let defs = crypt().with_component("hall", &door(uuid), CodecRegistry::global()).unwrap();
    let (app, host) = enabled(test_config(), &defs).await;
    let player = host.join_at_spawn();
    host.set_editing(player, true);
    let instance = start(&app, "crypt", InstanceOption::NewNonCached, vec![player]).await;
    let hall = instance.room(&IdKey::room("hall")).unwrap();

    let sink = Arc::new(RecordingSink::default());
    let session = EditSession::start(&app, player, hall, uuid, sink, Duration::from_millis(10)).unwrap();
    assert!(session.is_active());

    app.set_state(ServiceState::Reloading);
    assert!(!session.is_active());
}

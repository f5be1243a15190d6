//! Definition files on disk and their partial-success loading.

mod common;

use glam::{IVec3, Vec3};
use instancer::codec::CodecRegistry;
use instancer::component::traits::SendCommandTrait;
use instancer::component::Component;
use instancer::identifier::IdKey;
use instancer::loader::{DefinitionSet, LoadStatus, MobDef, COMPONENTS_FILE, FORMATS_FILE};
use tempfile::TempDir;
use uuid::Uuid;

use common::{crypt, setup};

fn greeter() -> Component {
    Component::send_command(SendCommandTrait::new("say welcome"), Uuid::new_v4()).expect("command has its trait")
}

#[tokio::test]
async fn definitions_survive_a_trip_through_disk() {
    let dir = TempDir::new().unwrap();
    let defs = crypt()
        .with_mob(MobDef::boss("lich"))
        .with_component("hall", &greeter(), CodecRegistry::global())
        .unwrap();
    defs.write_dir(dir.path()).await.unwrap();

    let read = DefinitionSet::read_dir(dir.path()).await.unwrap();
    assert_eq!(read, defs);

    let (app, _host) = setup();
    let report = app.enable(&read).await.unwrap();
    assert_eq!(report.status, LoadStatus::Success);
    assert_eq!((report.formats, report.mobs, report.components), (1, 1, 1));
    assert!(app.mobs.contains(&IdKey::mob("lich")));
    assert_eq!(app.components.components_in(&IdKey::room("hall")).len(), 1);
}

#[tokio::test]
async fn missing_files_count_as_empty() {
    let dir = TempDir::new().unwrap();
    let read = DefinitionSet::read_dir(dir.path()).await.unwrap();
    assert!(read.formats.is_empty());
    assert!(read.mobs.is_empty());
    assert!(read.components.is_empty());
}

#[tokio::test]
async fn unparseable_file_names_its_path() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(FORMATS_FILE), "{ not json").unwrap();
    let err = DefinitionSet::read_dir(dir.path()).await.unwrap_err();
    assert!(err.to_string().contains(FORMATS_FILE));
}

#[tokio::test]
async fn broken_components_are_skipped_and_reported() {
    let dir = TempDir::new().unwrap();
    crypt().write_dir(dir.path()).await.unwrap();
    let good = Uuid::new_v4();
    let components = serde_json::json!({
        "hall": [
            {
                "kind": "send-command",
                "uuid": good,
                "traits": [{ "tag": "send-command", "data": { "command": "say hi" } }]
            },
            {
                "kind": "door",
                "uuid": Uuid::new_v4(),
                "traits": [{ "tag": "set-blocks", "data": { "open": 7 } }]
            },
            {
                "kind": "send-command",
                "uuid": good,
                "traits": [{ "tag": "send-command", "data": { "command": "say twice" } }]
            }
        ],
        "nowhere": []
    });
    std::fs::write(dir.path().join(COMPONENTS_FILE), components.to_string()).unwrap();

    let read = DefinitionSet::read_dir(dir.path()).await.unwrap();
    let (app, _host) = setup();
    let report = app.enable(&read).await.unwrap();

    assert_eq!(report.status, LoadStatus::PartialSuccess);
    assert_eq!(report.components, 1);
    assert_eq!(report.skipped.len(), 3);
    assert!(app.components.get_by_uuid(good).is_some());
}

#[tokio::test]
async fn rooms_shared_between_formats_abort_the_enable() {
    let defs = crypt().with_format(
        instancer::loader::FormatDef::new("tomb", Vec3::ZERO).with_room(instancer::loader::RoomDef::new(
            "hall",
            IVec3::ZERO,
            IVec3::ZERO,
            IVec3::ONE,
        )),
    );
    let (app, _host) = setup();
    assert!(app.enable(&defs).await.is_err());
    assert!(!app.state().is_safe());
}

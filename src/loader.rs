//! Definition loading.
//!
//! A [`DefinitionSet`] is the serialized form of everything the service
//! loads: formats, mob templates and per-room components. It is read from
//! `formats.json`, `mobs.json` and `components.json` in one directory, or
//! built in code. Turning a set into live values goes through
//! [`DefinitionLoader::load`], which skips malformed components and reports
//! the load as a partial success instead of failing.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use glam::{IVec3, Vec3};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::codec::{CodecRegistry, ComponentRecord};
use crate::component::Component;
use crate::dungeon::{Format, KeyDropMode, RoomFormat};
use crate::errors::{DungeonError, Result};
use crate::geometry::Region;
use crate::host::BlockType;
use crate::identifier::IdKey;
use crate::mob::{BossMob, DungeonMob, SimpleMob};

pub const FORMATS_FILE: &str = "formats.json";
pub const MOBS_FILE: &str = "mobs.json";
pub const COMPONENTS_FILE: &str = "components.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDef {
    pub name: String,
    #[serde(default)]
    pub origin: IVec3,
    /// Inclusive block corners, relative to the instance anchor.
    pub min: IVec3,
    pub max: IVec3,
    #[serde(default = "default_key_drop")]
    pub key_drop_mode: KeyDropMode,
    #[serde(default = "default_key_item")]
    pub key_item: BlockType,
}

fn default_key_drop() -> KeyDropMode {
    KeyDropMode::RoomMobsClear
}

fn default_key_item() -> BlockType {
    BlockType::new("tripwire_hook")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDef {
    pub name: String,
    #[serde(default)]
    pub spawn: Vec3,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub rooms: Vec<RoomDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobDef {
    pub name: String,
    #[serde(default)]
    pub marked: bool,
    #[serde(default)]
    pub boss: bool,
    #[serde(default)]
    pub custom: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    Success,
    PartialSuccess,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub status: LoadStatus,
    pub formats: usize,
    pub mobs: usize,
    pub components: usize,
    /// One line per skipped definition.
    pub skipped: Vec<String>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} format(s), {} mob(s), {} component(s), {} skipped",
            self.status,
            self.formats,
            self.mobs,
            self.components,
            self.skipped.len()
        )
    }
}

/// Live values produced by a load.
pub struct Definitions {
    pub formats: Vec<Arc<Format>>,
    pub mobs: Vec<Arc<dyn DungeonMob>>,
    pub components: Vec<(IdKey, Vec<Arc<Component>>)>,
}

pub trait DefinitionLoader: Send + Sync {
    fn load(&self, codecs: &CodecRegistry) -> Result<(Definitions, LoadReport)>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSet {
    #[serde(default)]
    pub formats: Vec<FormatDef>,
    #[serde(default)]
    pub mobs: Vec<MobDef>,
    /// Room name to component records, in invocation order.
    #[serde(default)]
    pub components: BTreeMap<String, Vec<ComponentRecord>>,
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the three definition files from `dir`. A missing file counts as empty.
    pub async fn read_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            formats: read_json(&dir.join(FORMATS_FILE)).await?.unwrap_or_default(),
            mobs: read_json(&dir.join(MOBS_FILE)).await?.unwrap_or_default(),
            components: read_json(&dir.join(COMPONENTS_FILE)).await?.unwrap_or_default(),
        })
    }

    pub async fn write_dir(&self, dir: impl AsRef<Path>) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        write_json(&dir.join(FORMATS_FILE), &self.formats).await?;
        write_json(&dir.join(MOBS_FILE), &self.mobs).await?;
        write_json(&dir.join(COMPONENTS_FILE), &self.components).await?;
        Ok(())
    }

    pub fn with_format(mut self, format: FormatDef) -> Self {
        self.formats.push(format);
        self
    }

    pub fn with_mob(mut self, mob: MobDef) -> Self {
        self.mobs.push(mob);
        self
    }

    /// Adds an already-built component to `room`, encoding it with `codecs`.
    pub fn with_component(mut self, room: &str, component: &Component, codecs: &CodecRegistry) -> Result<Self> {
        let record = codecs.encode_component(component)?;
        self.components.entry(room.to_string()).or_default().push(record);
        Ok(self)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&content)
        .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
    Ok(Some(value))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))
}

impl FormatDef {
    pub fn new(name: impl Into<String>, spawn: Vec3) -> Self {
        Self {
            name: name.into(),
            spawn,
            template: None,
            rooms: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_room(mut self, room: RoomDef) -> Self {
        self.rooms.push(room);
        self
    }

    fn build(&self) -> Format {
        let parent = IdKey::dungeon(&self.name);
        let rooms = self
            .rooms
            .iter()
            .map(|r| {
                RoomFormat::new(
                    IdKey::room(&r.name),
                    parent.clone(),
                    r.origin,
                    Region::from_blocks(r.min, r.max),
                )
                .with_key_drop(r.key_drop_mode, r.key_item.clone())
            })
            .collect();
        Format::new(parent, self.spawn, self.template.clone(), rooms)
    }
}

impl RoomDef {
    pub fn new(name: impl Into<String>, origin: IVec3, min: IVec3, max: IVec3) -> Self {
        Self {
            name: name.into(),
            origin,
            min,
            max,
            key_drop_mode: default_key_drop(),
            key_item: default_key_item(),
        }
    }

    pub fn with_key_drop(mut self, mode: KeyDropMode) -> Self {
        self.key_drop_mode = mode;
        self
    }
}

impl MobDef {
    pub fn new(name: impl Into<String>, marked: bool) -> Self {
        Self {
            name: name.into(),
            marked,
            boss: false,
            custom: Default::default(),
        }
    }

    pub fn boss(name: impl Into<String>) -> Self {
        Self {
            boss: true,
            ..Self::new(name, true)
        }
    }

    fn build(&self) -> Arc<dyn DungeonMob> {
        let identifier = IdKey::mob(&self.name);
        if self.boss {
            let mut boss = BossMob::new(identifier);
            boss.custom = self.custom.clone();
            Arc::new(boss)
        } else {
            let mut mob = SimpleMob::new(identifier, self.marked);
            mob.custom = self.custom.clone();
            Arc::new(mob)
        }
    }
}

impl DefinitionLoader for DefinitionSet {
    fn load(&self, codecs: &CodecRegistry) -> Result<(Definitions, LoadReport)> {
        let mut skipped = Vec::new();

        let mut room_ids = HashSet::new();
        let mut formats = Vec::with_capacity(self.formats.len());
        for def in &self.formats {
            for room in &def.rooms {
                if !room_ids.insert(room.name.clone()) {
                    return Err(DungeonError::codec(
                        "format",
                        format!("room {} is declared by more than one format", room.name),
                    ));
                }
            }
            formats.push(Arc::new(def.build()));
        }

        let mobs: Vec<Arc<dyn DungeonMob>> = self.mobs.iter().map(MobDef::build).collect();

        let mut components = Vec::with_capacity(self.components.len());
        let mut component_count = 0;
        let mut seen_uuids = HashSet::new();
        for (room, records) in &self.components {
            if !room_ids.contains(room) {
                warn!("components for unknown room {} skipped", room);
                skipped.push(format!("room {}: no format declares it", room));
                continue;
            }
            let mut list = Vec::with_capacity(records.len());
            for record in records {
                if !seen_uuids.insert(record.uuid) {
                    warn!("duplicate component {} in {} skipped", record.uuid, room);
                    skipped.push(format!("{} in {}: duplicate uuid", record.uuid, room));
                    continue;
                }
                match codecs.decode_component(record) {
                    Ok(component) => list.push(Arc::new(component)),
                    Err(e) => {
                        warn!("component {} in {} skipped: {}", record.uuid, room, e);
                        skipped.push(format!("{} in {}: {}", record.uuid, room, e));
                    }
                }
            }
            component_count += list.len();
            components.push((IdKey::room(room), list));
        }

        let report = LoadReport {
            status: if skipped.is_empty() {
                LoadStatus::Success
            } else {
                LoadStatus::PartialSuccess
            },
            formats: formats.len(),
            mobs: mobs.len(),
            components: component_count,
            skipped,
        };
        info!("Definitions loaded: {}", report);
        Ok((
            Definitions {
                formats,
                mobs,
                components,
            },
            report,
        ))
    }
}

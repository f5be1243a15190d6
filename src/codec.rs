//! Tag-addressed codecs for traits and components.
//!
//! The registry maps a trait tag to a codec and is iterated in registration
//! order. Built-in traits are registered once by [`CodecRegistry::builtin`];
//! embedders wanting extra traits build their own registry on top of it.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::component::traits::{LOCATION, LOCATION_AND_DIRECTION, SEND_COMMAND, SET_BLOCKS, SPAWNER};
use crate::component::triggers::{BLOCK_INTERACT, MOB_KILL, ROOM_ENTER, ROOM_LEAVE};
use crate::component::{
    BlockInteractTrigger, Component, ComponentKind, ComponentTrait, LocationAndDirectionTrait,
    LocationTrait, MobKillTrigger, RoomEnterTrigger, RoomLeaveTrigger, SendCommandTrait,
    SetBlocksTrait, SpawnerTrait,
};
use crate::errors::{DungeonError, Result};

/// Encodes and decodes one trait type, addressed by its tag.
pub trait Codec: Send + Sync {
    fn tag(&self) -> &'static str;

    fn encode(&self, value: &dyn ComponentTrait) -> Result<Value>;

    fn decode(&self, data: &Value) -> Result<Arc<dyn ComponentTrait>>;
}

/// Codec for any trait that is its own serde representation.
pub struct SerdeTraitCodec<T> {
    tag: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeTraitCodec<T> {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            _marker: PhantomData,
        }
    }
}

impl<T> Codec for SerdeTraitCodec<T>
where
    T: ComponentTrait + Serialize + DeserializeOwned,
{
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn encode(&self, value: &dyn ComponentTrait) -> Result<Value> {
        let typed = value
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| DungeonError::codec(self.tag, format!("value is a {}", value.tag())))?;
        serde_json::to_value(typed).map_err(|e| DungeonError::codec(self.tag, e))
    }

    fn decode(&self, data: &Value) -> Result<Arc<dyn ComponentTrait>> {
        let typed: T = serde_json::from_value(data.clone()).map_err(|e| DungeonError::codec(self.tag, e))?;
        Ok(Arc::new(typed))
    }
}

/// Serialized trait: tag plus codec-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitRecord {
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

/// Serialized component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub kind: String,
    pub uuid: Uuid,
    #[serde(default)]
    pub traits: Vec<TraitRecord>,
}

pub struct CodecRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Registry holding every built-in trait codec.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let builtins: Vec<Box<dyn Codec>> = vec![
            Box::new(SerdeTraitCodec::<LocationTrait>::new(LOCATION)),
            Box::new(SerdeTraitCodec::<LocationAndDirectionTrait>::new(LOCATION_AND_DIRECTION)),
            Box::new(SerdeTraitCodec::<SpawnerTrait>::new(SPAWNER)),
            Box::new(SerdeTraitCodec::<SetBlocksTrait>::new(SET_BLOCKS)),
            Box::new(SerdeTraitCodec::<SendCommandTrait>::new(SEND_COMMAND)),
            Box::new(SerdeTraitCodec::<RoomEnterTrigger>::new(ROOM_ENTER)),
            Box::new(SerdeTraitCodec::<RoomLeaveTrigger>::new(ROOM_LEAVE)),
            Box::new(SerdeTraitCodec::<MobKillTrigger>::new(MOB_KILL)),
            Box::new(SerdeTraitCodec::<BlockInteractTrigger>::new(BLOCK_INTERACT)),
        ];
        registry.codecs.extend(builtins);
        registry
    }

    /// Process-wide registry of built-in codecs.
    pub fn global() -> &'static CodecRegistry {
        static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CodecRegistry::builtin)
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) -> Result<()> {
        if self.get(codec.tag()).is_some() {
            return Err(DungeonError::codec(codec.tag(), "tag already registered"));
        }
        self.codecs.push(codec);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&dyn Codec> {
        self.codecs.iter().find(|c| c.tag() == tag).map(|c| c.as_ref())
    }

    /// Tags in registration order.
    pub fn tags(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|c| c.tag()).collect()
    }

    pub fn encode_trait(&self, value: &dyn ComponentTrait) -> Result<TraitRecord> {
        let codec = self
            .get(value.tag())
            .ok_or_else(|| DungeonError::codec(value.tag(), "no codec registered"))?;
        Ok(TraitRecord {
            tag: value.tag().to_string(),
            data: codec.encode(value)?,
        })
    }

    pub fn decode_trait(&self, record: &TraitRecord) -> Result<Arc<dyn ComponentTrait>> {
        let codec = self
            .get(&record.tag)
            .ok_or_else(|| DungeonError::codec(record.tag.clone(), "no codec registered"))?;
        codec.decode(&record.data)
    }

    pub fn encode_component(&self, component: &Component) -> Result<ComponentRecord> {
        Ok(ComponentRecord {
            kind: component.kind().tag().to_string(),
            uuid: component.uuid(),
            traits: component
                .traits()
                .iter()
                .map(|t| self.encode_trait(t.as_ref()))
                .collect::<Result<_>>()?,
        })
    }

    /// Decodes a component, enforcing the same invariants as direct construction.
    pub fn decode_component(&self, record: &ComponentRecord) -> Result<Component> {
        let kind = ComponentKind::from_tag(&record.kind)
            .ok_or_else(|| DungeonError::codec(record.kind.clone(), "unknown component kind"))?;
        let traits = record
            .traits
            .iter()
            .map(|t| self.decode_trait(t))
            .collect::<Result<Vec<_>>>()?;
        Component::new(kind, record.uuid, traits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SweepStrategy;
    use crate::host::BlockType;
    use glam::IVec3;
    use serde_json::json;

    #[test]
    fn builtin_tags_are_unique_and_ordered() {
        let registry = CodecRegistry::builtin();
        let tags = registry.tags();
        assert_eq!(tags.first(), Some(&LOCATION));
        let mut deduped = tags.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), tags.len());
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut registry = CodecRegistry::builtin();
        let err = registry
            .register(Box::new(SerdeTraitCodec::<LocationTrait>::new(LOCATION)))
            .unwrap_err();
        assert!(matches!(err, DungeonError::Codec { .. }));
    }

    #[test]
    fn door_decodes_from_json() {
        let record: ComponentRecord = serde_json::from_value(json!({
            "kind": "door",
            "uuid": "7d9f3a2e-0b51-4c39-9d6e-1f2a3b4c5d6e",
            "traits": [{
                "tag": "set-blocks",
                "data": {
                    "open": "ice",
                    "close": "air",
                    "sweep": "BOTTOM_UP",
                    "blocks": [[1, 1, 1]]
                }
            }]
        }))
        .unwrap();
        let door = CodecRegistry::global().decode_component(&record).unwrap();
        let blocks = door.get_trait::<SetBlocksTrait>().unwrap();
        assert_eq!(blocks.open, BlockType::new("ice"));
        assert_eq!(blocks.sweep, SweepStrategy::BottomUp);
        assert_eq!(blocks.blocks, vec![IVec3::ONE]);
    }

    #[test]
    fn unknown_tag_and_kind_fail() {
        let registry = CodecRegistry::global();
        let bad_tag = TraitRecord {
            tag: "teleporter".into(),
            data: Value::Null,
        };
        assert!(registry.decode_trait(&bad_tag).is_err());
        let bad_kind = ComponentRecord {
            kind: "portal".into(),
            uuid: Uuid::new_v4(),
            traits: vec![],
        };
        assert!(registry.decode_component(&bad_kind).is_err());
    }

    #[test]
    fn decoding_enforces_required_traits() {
        let record = ComponentRecord {
            kind: "spawner".into(),
            uuid: Uuid::new_v4(),
            traits: vec![],
        };
        assert!(matches!(
            CodecRegistry::global().decode_component(&record),
            Err(DungeonError::MissingTrait { .. })
        ));
    }
}

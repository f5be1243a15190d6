//! Components and the traits they bundle.
//!
//! A [`Component`] is an immutable, UUID-identified bundle of traits with at
//! most one trait per concrete type. Editing never mutates a component: an
//! edit builds a new value with one trait swapped and the same UUID, which the
//! caller republishes (see [`crate::edit`]).
//!
//! Traits are trait objects so that new behaviour can be registered through
//! the codec registry without touching this module. Functional traits do work
//! when invoked; event triggers additionally subscribe to bus events.

pub mod context;
pub mod traits;
pub mod triggers;

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AppContext;
use crate::edit::QuestionElement;
use crate::errors::{DungeonError, Result};
use crate::host::BlockType;
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane};

pub use context::InvocationContext;
pub use traits::{
    LocationAndDirectionTrait, LocationTrait, QuantityRange, SendCommandTrait, SetBlocksTrait,
    SpawnerTrait, SweepStrategy,
};
pub use triggers::{
    BlockInteractTrigger, EventTrigger, MobKillTrigger, RoomEnterTrigger, RoomLeaveTrigger,
    TriggerRule,
};

/// One typed fragment of component behaviour or configuration.
pub trait ComponentTrait: Any + Send + Sync + fmt::Debug {
    /// Codec tag; unique per concrete type.
    fn tag(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_functional(&self) -> Option<&dyn FunctionalTrait> {
        None
    }

    fn as_trigger(&self) -> Option<&dyn EventTrigger> {
        None
    }

    fn question(&self) -> QuestionElement {
        QuestionElement::label(self.tag())
    }
}

/// A trait that does something when its component is invoked.
pub trait FunctionalTrait: Send + Sync {
    fn invoke(
        &self,
        app: &Arc<AppContext>,
        ctx: &InvocationContext,
        lane: &OnLane<Components>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Spawner,
    Door,
    SendCommand,
    OnRoomEnter,
    OnRoomLeave,
    OnDungeonMobKill,
    OnBlockInteract,
    Custom,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 8] = [
        ComponentKind::Spawner,
        ComponentKind::Door,
        ComponentKind::SendCommand,
        ComponentKind::OnRoomEnter,
        ComponentKind::OnRoomLeave,
        ComponentKind::OnDungeonMobKill,
        ComponentKind::OnBlockInteract,
        ComponentKind::Custom,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ComponentKind::Spawner => "spawner",
            ComponentKind::Door => "door",
            ComponentKind::SendCommand => "send-command",
            ComponentKind::OnRoomEnter => "on-room-enter",
            ComponentKind::OnRoomLeave => "on-room-leave",
            ComponentKind::OnDungeonMobKill => "on-dungeon-mob-kill",
            ComponentKind::OnBlockInteract => "on-block-interact",
            ComponentKind::Custom => "custom",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn title(&self) -> &'static str {
        match self {
            ComponentKind::Spawner => "Spawner Component",
            ComponentKind::Door => "Door Component",
            ComponentKind::SendCommand => "Send Command Component",
            ComponentKind::OnRoomEnter => "Room Enter Trigger",
            ComponentKind::OnRoomLeave => "Room Leave Trigger",
            ComponentKind::OnDungeonMobKill => "Dungeon Mob Kill Trigger",
            ComponentKind::OnBlockInteract => "Block Interact Trigger",
            ComponentKind::Custom => "Custom Component",
        }
    }

    /// Trait tags a component of this kind must carry.
    pub fn required_traits(&self) -> &'static [&'static str] {
        match self {
            ComponentKind::Spawner => &[traits::LOCATION_AND_DIRECTION, traits::SPAWNER],
            ComponentKind::Door => &[traits::SET_BLOCKS],
            ComponentKind::SendCommand => &[traits::SEND_COMMAND],
            ComponentKind::OnRoomEnter => &[triggers::ROOM_ENTER],
            ComponentKind::OnRoomLeave => &[triggers::ROOM_LEAVE],
            ComponentKind::OnDungeonMobKill => &[triggers::MOB_KILL],
            ComponentKind::OnBlockInteract => &[triggers::BLOCK_INTERACT, traits::LOCATION],
            ComponentKind::Custom => &[],
        }
    }

    /// Runs when a room holding this component is built.
    pub fn initialize(
        &self,
        app: &Arc<AppContext>,
        component: &Arc<Component>,
        ctx: &InvocationContext,
        lane: &OnLane<Components>,
    ) -> Result<()> {
        match self {
            ComponentKind::Door => {
                ctx.room.set_door_open(lane, component.uuid(), false);
                let blocks = component.get_trait::<SetBlocksTrait>()?;
                blocks.apply_now(app, ctx, blocks.close.clone(), lane)
            }
            _ => Ok(()),
        }
    }

    /// Runs when a room holding this component is torn down.
    pub fn shutdown(
        &self,
        app: &Arc<AppContext>,
        component: &Arc<Component>,
        ctx: &InvocationContext,
        lane: &OnLane<Components>,
    ) -> Result<()> {
        match self {
            ComponentKind::Door => {
                let blocks = component.get_trait::<SetBlocksTrait>()?;
                blocks.apply_now(app, ctx, BlockType::air(), lane)
            }
            _ => Ok(()),
        }
    }

    pub fn has_lifecycle(&self) -> bool {
        matches!(self, ComponentKind::Door)
    }
}

#[derive(Clone)]
pub struct Component {
    kind: ComponentKind,
    uuid: Uuid,
    traits: Vec<Arc<dyn ComponentTrait>>,
}

impl Component {
    /// Builds a component, failing on a repeated trait type or a missing required trait.
    pub fn new(
        kind: ComponentKind,
        uuid: Uuid,
        traits: Vec<Arc<dyn ComponentTrait>>,
    ) -> Result<Self> {
        let mut seen: Vec<TypeId> = Vec::with_capacity(traits.len());
        for t in &traits {
            let id = t.as_any().type_id();
            if seen.contains(&id) {
                return Err(DungeonError::DuplicateTrait {
                    component: format!("{}/{}", kind.tag(), uuid),
                    tag: t.tag(),
                });
            }
            seen.push(id);
        }
        for required in kind.required_traits() {
            if !traits.iter().any(|t| t.tag() == *required) {
                return Err(DungeonError::MissingTrait {
                    component: format!("{}/{}", kind.tag(), uuid),
                    tag: required,
                });
            }
        }
        Ok(Self { kind, uuid, traits })
    }

    pub fn door(blocks: SetBlocksTrait, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::Door, uuid, vec![Arc::new(blocks)])
    }

    pub fn spawner(location: LocationAndDirectionTrait, spawner: SpawnerTrait, uuid: Uuid) -> Result<Self> {
        Self::new(
            ComponentKind::Spawner,
            uuid,
            vec![Arc::new(location), Arc::new(spawner)],
        )
    }

    pub fn send_command(command: SendCommandTrait, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::SendCommand, uuid, vec![Arc::new(command)])
    }

    pub fn on_room_enter(trigger: RoomEnterTrigger, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::OnRoomEnter, uuid, vec![Arc::new(trigger)])
    }

    pub fn on_room_leave(trigger: RoomLeaveTrigger, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::OnRoomLeave, uuid, vec![Arc::new(trigger)])
    }

    pub fn on_mob_kill(trigger: MobKillTrigger, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::OnDungeonMobKill, uuid, vec![Arc::new(trigger)])
    }

    pub fn on_block_interact(
        trigger: BlockInteractTrigger,
        location: LocationTrait,
        uuid: Uuid,
    ) -> Result<Self> {
        Self::new(
            ComponentKind::OnBlockInteract,
            uuid,
            vec![Arc::new(trigger), Arc::new(location)],
        )
    }

    pub fn custom(traits: Vec<Arc<dyn ComponentTrait>>, uuid: Uuid) -> Result<Self> {
        Self::new(ComponentKind::Custom, uuid, traits)
    }

    pub fn identifier(&self) -> IdKey {
        IdKey::component(self.kind.tag())
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn traits(&self) -> &[Arc<dyn ComponentTrait>] {
        &self.traits
    }

    /// The unique trait of concrete type `T`.
    pub fn get_trait<T: ComponentTrait>(&self) -> Result<&T> {
        self.traits
            .iter()
            .find_map(|t| t.as_any().downcast_ref::<T>())
            .ok_or_else(|| {
                DungeonError::NotFound(format!(
                    "{} on component {}",
                    type_name::<T>(),
                    self.uuid
                ))
            })
    }

    pub fn has_trait<T: ComponentTrait>(&self) -> bool {
        self.traits.iter().any(|t| t.as_any().is::<T>())
    }

    pub fn has_trait_tag(&self, tag: &str) -> bool {
        self.traits.iter().any(|t| t.tag() == tag)
    }

    pub fn trait_by_tag(&self, tag: &str) -> Option<&Arc<dyn ComponentTrait>> {
        self.traits.iter().find(|t| t.tag() == tag)
    }

    /// Functional traits in declaration order.
    pub fn functional_traits(&self) -> impl Iterator<Item = &dyn FunctionalTrait> {
        self.traits.iter().filter_map(|t| t.as_functional())
    }

    pub fn triggers(&self) -> impl Iterator<Item = (&'static str, &dyn EventTrigger)> {
        self.traits
            .iter()
            .filter_map(|t| t.as_trigger().map(|trigger| (t.tag(), trigger)))
    }

    /// Copy of this component with the same-typed trait replaced by `replacement`.
    pub fn with_trait(&self, replacement: Arc<dyn ComponentTrait>) -> Result<Component> {
        let id = replacement.as_any().type_id();
        let position = self
            .traits
            .iter()
            .position(|t| t.as_any().type_id() == id)
            .ok_or_else(|| DungeonError::MissingTrait {
                component: format!("{}/{}", self.kind.tag(), self.uuid),
                tag: replacement.tag(),
            })?;
        let mut traits = self.traits.clone();
        traits[position] = replacement;
        Component::new(self.kind, self.uuid, traits)
    }

    pub fn question(&self) -> QuestionElement {
        QuestionElement::list(
            self.kind.title(),
            self.traits.iter().map(|t| t.question()).collect(),
        )
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind)
            .field("uuid", &self.uuid)
            .field("traits", &self.traits.iter().map(|t| t.tag()).collect::<Vec<_>>())
            .finish()
    }
}

//! Event trigger traits.
//!
//! A trigger pairs an event kind with a [`TriggerRule`]: a use ceiling and the
//! UUIDs of the components to invoke. The subscription, use accounting and
//! stale checks live in [`crate::trigger::TriggerHub`]; a trigger only knows
//! how to turn an event into an invocation context.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traits::LocationTrait;
use super::{Component, ComponentTrait, FunctionalTrait, InvocationContext};
use crate::context::AppContext;
use crate::edit::{EditAction, EditCommand, EditField, QuestionElement};
use crate::errors::Result;
use crate::events::{DungeonEvent, EventKind};
use crate::host::BlockType;
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane};

pub const ROOM_ENTER: &str = "on-room-enter";
pub const ROOM_LEAVE: &str = "on-room-leave";
pub const MOB_KILL: &str = "on-dungeon-mob-kill";
pub const BLOCK_INTERACT: &str = "on-block-interact";

/// Use ceiling plus fan-out targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Successful firings allowed per instance lifetime; negative means unlimited.
    #[serde(default = "default_uses")]
    pub uses: i32,
    #[serde(default)]
    pub targets: BTreeSet<Uuid>,
}

fn default_uses() -> i32 {
    -1
}

impl Default for TriggerRule {
    fn default() -> Self {
        Self {
            uses: default_uses(),
            targets: BTreeSet::new(),
        }
    }
}

impl TriggerRule {
    pub fn new(uses: i32, targets: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            uses,
            targets: targets.into_iter().collect(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.uses < 0
    }

    fn question(&self) -> Vec<QuestionElement> {
        let uses = if self.is_unlimited() {
            "Uses: unlimited".to_string()
        } else {
            format!("Uses: {}", self.uses)
        };
        let targets = self
            .targets
            .iter()
            .map(|t| {
                QuestionElement::clickable(
                    format!("- {}", t),
                    EditAction::Apply(EditCommand::RemoveTarget(*t)),
                )
            })
            .chain(std::iter::once(QuestionElement::clickable(
                "+ add target",
                EditAction::Ask(EditField::Target),
            )))
            .collect();
        vec![
            QuestionElement::clickable(uses, EditAction::Ask(EditField::Uses)),
            QuestionElement::list("Targets", targets),
        ]
    }
}

pub trait EventTrigger: Send + Sync {
    fn event_kind(&self) -> EventKind;

    fn rule(&self) -> &TriggerRule;

    /// Copy of this trigger with a different rule, for edits.
    fn with_rule(&self, rule: TriggerRule) -> Arc<dyn ComponentTrait>;

    /// Context for `event`, or `None` when the event is not for this trigger.
    fn resolve(
        &self,
        app: &Arc<AppContext>,
        owner: &Component,
        event: &DungeonEvent,
    ) -> Option<InvocationContext>;
}

macro_rules! trigger_trait_impls {
    ($ty:ty, $tag:expr, $title:expr) => {
        impl ComponentTrait for $ty {
            fn tag(&self) -> &'static str {
                $tag
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_functional(&self) -> Option<&dyn FunctionalTrait> {
                Some(self)
            }

            fn as_trigger(&self) -> Option<&dyn EventTrigger> {
                Some(self)
            }

            fn question(&self) -> QuestionElement {
                let mut children = self.extra_questions();
                children.extend(self.rule.question());
                QuestionElement::list($title, children)
            }
        }

        impl FunctionalTrait for $ty {
            fn invoke(
                &self,
                app: &Arc<AppContext>,
                ctx: &InvocationContext,
                lane: &OnLane<Components>,
            ) -> Result<()> {
                crate::trigger::fan_out(app, &self.rule, ctx, lane).map(|_| ())
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomEnterTrigger {
    #[serde(flatten)]
    pub rule: TriggerRule,
}

impl RoomEnterTrigger {
    pub fn new(rule: TriggerRule) -> Self {
        Self { rule }
    }

    fn extra_questions(&self) -> Vec<QuestionElement> {
        Vec::new()
    }
}

impl EventTrigger for RoomEnterTrigger {
    fn event_kind(&self) -> EventKind {
        EventKind::RoomEnter
    }

    fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    fn with_rule(&self, rule: TriggerRule) -> Arc<dyn ComponentTrait> {
        Arc::new(Self { rule })
    }

    fn resolve(&self, _app: &Arc<AppContext>, _owner: &Component, event: &DungeonEvent) -> Option<InvocationContext> {
        match event {
            DungeonEvent::RoomEnter { player, room } => {
                Some(InvocationContext::for_player(room.clone(), Some(*player)))
            }
            _ => None,
        }
    }
}

trigger_trait_impls!(RoomEnterTrigger, ROOM_ENTER, "On Room Enter");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomLeaveTrigger {
    #[serde(flatten)]
    pub rule: TriggerRule,
}

impl RoomLeaveTrigger {
    pub fn new(rule: TriggerRule) -> Self {
        Self { rule }
    }

    fn extra_questions(&self) -> Vec<QuestionElement> {
        Vec::new()
    }
}

impl EventTrigger for RoomLeaveTrigger {
    fn event_kind(&self) -> EventKind {
        EventKind::RoomLeave
    }

    fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    fn with_rule(&self, rule: TriggerRule) -> Arc<dyn ComponentTrait> {
        Arc::new(Self { rule })
    }

    fn resolve(&self, _app: &Arc<AppContext>, _owner: &Component, event: &DungeonEvent) -> Option<InvocationContext> {
        match event {
            DungeonEvent::RoomLeave { player, room } => {
                Some(InvocationContext::for_player(room.clone(), Some(*player)))
            }
            _ => None,
        }
    }
}

trigger_trait_impls!(RoomLeaveTrigger, ROOM_LEAVE, "On Room Leave");

/// Fires when a tracked mob of the given template dies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobKillTrigger {
    pub mob: IdKey,
    #[serde(flatten)]
    pub rule: TriggerRule,
}

impl MobKillTrigger {
    pub fn new(mob: IdKey, rule: TriggerRule) -> Self {
        Self { mob, rule }
    }

    fn extra_questions(&self) -> Vec<QuestionElement> {
        vec![QuestionElement::clickable(
            format!("Mob: {}", self.mob),
            EditAction::Ask(EditField::Mob),
        )]
    }
}

impl EventTrigger for MobKillTrigger {
    fn event_kind(&self) -> EventKind {
        EventKind::MobKill
    }

    fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    fn with_rule(&self, rule: TriggerRule) -> Arc<dyn ComponentTrait> {
        Arc::new(Self {
            mob: self.mob.clone(),
            rule,
        })
    }

    fn resolve(&self, _app: &Arc<AppContext>, _owner: &Component, event: &DungeonEvent) -> Option<InvocationContext> {
        match event {
            DungeonEvent::MobKill { room, mob, method, .. } if *mob == self.mob => {
                let killer = method.as_ref().and_then(|m| m.player());
                Some(InvocationContext::for_player(room.clone(), killer))
            }
            _ => None,
        }
    }
}

trigger_trait_impls!(MobKillTrigger, MOB_KILL, "On Dungeon Mob Kill");

/// Fires when a player interacts with a matching block.
///
/// When the owning component carries a [`LocationTrait`], only the block at
/// that room-relative location counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockInteractTrigger {
    #[serde(default)]
    pub block: Option<BlockType>,
    #[serde(flatten)]
    pub rule: TriggerRule,
}

impl BlockInteractTrigger {
    pub fn new(block: Option<BlockType>, rule: TriggerRule) -> Self {
        Self { block, rule }
    }

    fn extra_questions(&self) -> Vec<QuestionElement> {
        let filter = match &self.block {
            Some(b) => format!("Block: {}", b),
            None => "Block: any".to_string(),
        };
        vec![QuestionElement::clickable(filter, EditAction::Ask(EditField::FilterBlock))]
    }
}

impl EventTrigger for BlockInteractTrigger {
    fn event_kind(&self) -> EventKind {
        EventKind::BlockInteract
    }

    fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    fn with_rule(&self, rule: TriggerRule) -> Arc<dyn ComponentTrait> {
        Arc::new(Self {
            block: self.block.clone(),
            rule,
        })
    }

    fn resolve(&self, app: &Arc<AppContext>, owner: &Component, event: &DungeonEvent) -> Option<InvocationContext> {
        let DungeonEvent::BlockInteract {
            player,
            block,
            world,
            at,
        } = event
        else {
            return None;
        };
        if self.block.as_ref().is_some_and(|wanted| wanted != block) {
            return None;
        }
        let instance = app.manager.current_dungeon(app, *player)?;
        let room = instance.room_at_block(world, *at)?;
        if let Ok(location) = owner.get_trait::<LocationTrait>() {
            if room.world_block(location.vector) != *at {
                return None;
            }
        }
        Some(InvocationContext::for_player(room, Some(*player)))
    }
}

trigger_trait_impls!(BlockInteractTrigger, BLOCK_INTERACT, "On Block Interact");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_defaults_to_unlimited() {
        let rule: TriggerRule = serde_json::from_str(r#"{"targets": []}"#).unwrap();
        assert!(rule.is_unlimited());
        assert!(rule.targets.is_empty());
    }

    #[test]
    fn flattened_rule_reads_alongside_trigger_fields() {
        let target = Uuid::new_v4();
        let json = format!(r#"{{"mob": {{"category": "mob", "key": "boss"}}, "uses": 1, "targets": ["{}"]}}"#, target);
        let trigger: MobKillTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(trigger.mob, IdKey::mob("boss"));
        assert_eq!(trigger.rule.uses, 1);
        assert!(trigger.rule.targets.contains(&target));
    }

    #[test]
    fn with_rule_keeps_trigger_specific_fields() {
        let trigger = MobKillTrigger::new(IdKey::mob("boss"), TriggerRule::default());
        let edited = trigger.with_rule(TriggerRule::new(3, []));
        let edited = edited.as_any().downcast_ref::<MobKillTrigger>().unwrap();
        assert_eq!(edited.mob, IdKey::mob("boss"));
        assert_eq!(edited.rule.uses, 3);
    }
}

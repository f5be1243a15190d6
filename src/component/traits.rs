//! Concrete non-trigger traits.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{IVec3, Vec3};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{ComponentTrait, FunctionalTrait, InvocationContext};
use crate::context::AppContext;
use crate::edit::{EditAction, EditCommand, EditField, QuestionElement};
use crate::errors::{DungeonError, Result};
use crate::events::DungeonEvent;
use crate::host::BlockType;
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane};
use crate::logutil::escape_log;

pub const LOCATION: &str = "location";
pub const LOCATION_AND_DIRECTION: &str = "location-and-direction";
pub const SPAWNER: &str = "spawner";
pub const SET_BLOCKS: &str = "set-blocks";
pub const SEND_COMMAND: &str = "send-command";

fn fmt_vec(v: Vec3) -> String {
    format!("({:.1}, {:.1}, {:.1})", v.x, v.y, v.z)
}

/// A room-relative point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationTrait {
    pub vector: Vec3,
}

impl LocationTrait {
    pub fn new(vector: Vec3) -> Self {
        Self { vector }
    }
}

impl ComponentTrait for LocationTrait {
    fn tag(&self) -> &'static str {
        LOCATION
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn question(&self) -> QuestionElement {
        QuestionElement::clickable(
            format!("Location: {}", fmt_vec(self.vector)),
            EditAction::Ask(EditField::Location),
        )
    }
}

/// A room-relative point with a facing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAndDirectionTrait {
    pub vector: Vec3,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl LocationAndDirectionTrait {
    pub fn new(vector: Vec3, yaw: f32, pitch: f32) -> Self {
        Self { vector, yaw, pitch }
    }
}

impl ComponentTrait for LocationAndDirectionTrait {
    fn tag(&self) -> &'static str {
        LOCATION_AND_DIRECTION
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn question(&self) -> QuestionElement {
        QuestionElement::list(
            "Location",
            vec![
                QuestionElement::clickable(
                    format!("Position: {}", fmt_vec(self.vector)),
                    EditAction::Ask(EditField::Location),
                ),
                QuestionElement::label(format!("Facing: yaw {:.0}, pitch {:.0}", self.yaw, self.pitch)),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawQuantity")]
pub struct QuantityRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Deserialize)]
struct RawQuantity {
    min: u32,
    max: u32,
}

impl From<RawQuantity> for QuantityRange {
    fn from(raw: RawQuantity) -> Self {
        Self::new(raw.min, raw.max)
    }
}

impl QuantityRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn exactly(n: u32) -> Self {
        Self::new(n, n)
    }

    pub fn roll(&self, rng: &mut impl Rng) -> u32 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Spawns a random number of tracked mobs around the component's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnerTrait {
    pub mob: IdKey,
    pub quantity: QuantityRange,
    #[serde(default)]
    pub radius: f32,
}

impl SpawnerTrait {
    const MIN_RADIUS: f32 = 0.1;
    const MAX_RADIUS: f32 = 50.0;

    pub fn new(mob: IdKey, quantity: QuantityRange, radius: f32) -> Self {
        Self {
            mob,
            quantity,
            radius,
        }
    }

    fn scatter(&self, rng: &mut impl Rng) -> Vec3 {
        if !(Self::MIN_RADIUS..=Self::MAX_RADIUS).contains(&self.radius) {
            return Vec3::ZERO;
        }
        let angle = rng.gen::<f32>() * std::f32::consts::TAU;
        let distance = self.radius * rng.gen::<f32>().sqrt();
        Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance)
    }
}

impl ComponentTrait for SpawnerTrait {
    fn tag(&self) -> &'static str {
        SPAWNER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_functional(&self) -> Option<&dyn FunctionalTrait> {
        Some(self)
    }

    fn question(&self) -> QuestionElement {
        QuestionElement::list(
            "Spawner",
            vec![
                QuestionElement::clickable(format!("Mob: {}", self.mob), EditAction::Ask(EditField::Mob)),
                QuestionElement::clickable(
                    format!("Quantity: {}..{}", self.quantity.min, self.quantity.max),
                    EditAction::Ask(EditField::Quantity),
                ),
                QuestionElement::clickable(
                    format!("Radius: {:.1}", self.radius),
                    EditAction::Ask(EditField::Radius),
                ),
            ],
        )
    }
}

impl FunctionalTrait for SpawnerTrait {
    fn invoke(
        &self,
        app: &Arc<AppContext>,
        ctx: &InvocationContext,
        _lane: &OnLane<Components>,
    ) -> Result<()> {
        let component = ctx
            .component
            .as_ref()
            .ok_or_else(|| DungeonError::Internal("spawner invoked without a component".into()))?;
        let location = component.get_trait::<LocationAndDirectionTrait>()?;
        let template = app.mobs.get_or_err(&self.mob)?;
        let mut rng = rand::thread_rng();
        let count = self.quantity.roll(&mut rng);
        ctx.room.mark_mobs_spawned();
        for _ in 0..count {
            if !ctx.is_live() {
                debug!("spawner in {} stopped: context no longer live", ctx.room.identifier());
                break;
            }
            let mut at = ctx.room.world_pos(location.vector + self.scatter(&mut rng));
            at.yaw = location.yaw;
            at.pitch = location.pitch;
            let event = DungeonEvent::MobSpawn {
                room: ctx.room.clone(),
                mob: self.mob.clone(),
                at: at.clone(),
            };
            if app.bus.publish(&event).cancelled {
                debug!("spawn of {} in {} cancelled", self.mob, ctx.room.identifier());
                continue;
            }
            ctx.room.spawn_tracked(app, template.clone_mob(), at)?;
        }
        Ok(())
    }
}

/// Order in which a block swap sweeps through its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepStrategy {
    TopDown,
    BottomUp,
    #[serde(rename = "NEGATIVE_2_POSITIVE")]
    NegativeToPositive,
    #[serde(rename = "POSITIVE_2_NEGATIVE")]
    PositiveToNegative,
}

impl SweepStrategy {
    pub const ALL: [SweepStrategy; 4] = [
        SweepStrategy::TopDown,
        SweepStrategy::BottomUp,
        SweepStrategy::NegativeToPositive,
        SweepStrategy::PositiveToNegative,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SweepStrategy::TopDown => "Top down",
            SweepStrategy::BottomUp => "Bottom up",
            SweepStrategy::NegativeToPositive => "Negative to positive",
            SweepStrategy::PositiveToNegative => "Positive to negative",
        }
    }
}

/// Swaps a set of room-relative blocks between an open and a closed state.
///
/// The open/closed flag is not stored here: one trait value can back many
/// live rooms at once, so each [`RoomInstance`](crate::dungeon::RoomInstance)
/// keeps its own flag per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetBlocksTrait {
    pub open: BlockType,
    pub close: BlockType,
    pub sweep: SweepStrategy,
    pub blocks: Vec<IVec3>,
}

impl SetBlocksTrait {
    pub fn new(open: BlockType, close: BlockType, sweep: SweepStrategy, blocks: Vec<IVec3>) -> Self {
        Self {
            open,
            close,
            sweep,
            blocks,
        }
    }

    pub fn with_sweep(&self, sweep: SweepStrategy) -> Self {
        Self {
            sweep,
            ..self.clone()
        }
    }

    /// True when the blocks spread further along X than along Z.
    pub fn is_along_x_axis(&self) -> bool {
        let min = self.blocks.iter().min_by_key(|b| b.x - b.y - b.z);
        let max = self.blocks.iter().max_by_key(|b| b.x + b.y + b.z);
        match (min, max) {
            (Some(min), Some(max)) => (max.x - min.x).abs() > (max.z - min.z).abs(),
            _ => false,
        }
    }

    /// Room-relative blocks grouped into sweep layers, in sweep order.
    pub fn layers(&self) -> Vec<Vec<IVec3>> {
        let along_x = self.is_along_x_axis();
        let mut grouped: BTreeMap<i32, Vec<IVec3>> = BTreeMap::new();
        for block in &self.blocks {
            let key = match self.sweep {
                SweepStrategy::TopDown | SweepStrategy::BottomUp => block.y,
                _ if along_x => block.x,
                _ => block.z,
            };
            grouped.entry(key).or_default().push(*block);
        }
        match self.sweep {
            SweepStrategy::BottomUp | SweepStrategy::NegativeToPositive => {
                grouped.into_values().collect()
            }
            SweepStrategy::TopDown | SweepStrategy::PositiveToNegative => {
                grouped.into_values().rev().collect()
            }
        }
    }

    /// Sweeps every block to `block`, one layer per stagger step on the tick lane.
    fn sweep_to(&self, app: &Arc<AppContext>, ctx: &InvocationContext, block: BlockType) -> Result<()> {
        let origin = ctx.room.origin();
        let world = ctx.room.world().to_string();
        let stagger = app.config.timing.door_layer_stagger();
        for (step, layer) in self.layers().into_iter().enumerate() {
            let positions: Vec<IVec3> = layer.into_iter().map(|b| b + origin).collect();
            let job_app = app.clone();
            let world = world.clone();
            let block = block.clone();
            let live = ctx.clone();
            let delay = stagger * step as u32;
            app.lanes.tick.submit_after(delay, move |tick| {
                if !live.is_live() {
                    return;
                }
                if let Err(e) = job_app.terrain.set_blocks(tick, &world, &positions, &block) {
                    warn!("door sweep step {} failed: {}", step, e);
                }
            })?;
        }
        Ok(())
    }

    /// Sets every block to `block` at once, ignoring liveness. Used by teardown.
    pub fn apply_now(
        &self,
        app: &Arc<AppContext>,
        ctx: &InvocationContext,
        block: BlockType,
        _lane: &OnLane<Components>,
    ) -> Result<()> {
        let origin = ctx.room.origin();
        let world = ctx.room.world().to_string();
        let positions: Vec<IVec3> = self.blocks.iter().map(|b| *b + origin).collect();
        let app2 = app.clone();
        app.lanes.tick.submit(move |tick| {
            if let Err(e) = app2.terrain.set_blocks(tick, &world, &positions, &block) {
                warn!("failed to reset door blocks: {}", e);
            }
        })?;
        Ok(())
    }
}

impl ComponentTrait for SetBlocksTrait {
    fn tag(&self) -> &'static str {
        SET_BLOCKS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_functional(&self) -> Option<&dyn FunctionalTrait> {
        Some(self)
    }

    fn question(&self) -> QuestionElement {
        let sweeps = SweepStrategy::ALL
            .iter()
            .map(|s| {
                let marker = if *s == self.sweep { "> " } else { "" };
                QuestionElement::clickable(
                    format!("{}{}", marker, s.label()),
                    EditAction::Apply(EditCommand::SetSweep(*s)),
                )
            })
            .collect();
        QuestionElement::list(
            "Set Blocks",
            vec![
                QuestionElement::clickable(format!("Open: {}", self.open), EditAction::Ask(EditField::OpenBlock)),
                QuestionElement::clickable(format!("Close: {}", self.close), EditAction::Ask(EditField::CloseBlock)),
                QuestionElement::list("Change function", sweeps),
                QuestionElement::label(format!("{} blocks", self.blocks.len())),
            ],
        )
    }
}

impl FunctionalTrait for SetBlocksTrait {
    fn invoke(
        &self,
        app: &Arc<AppContext>,
        ctx: &InvocationContext,
        lane: &OnLane<Components>,
    ) -> Result<()> {
        let component = ctx
            .component
            .as_ref()
            .ok_or_else(|| DungeonError::Internal("set-blocks invoked without a component".into()))?;
        let was_open = ctx.room.door_open(lane, component.uuid());
        let next = if was_open { self.close.clone() } else { self.open.clone() };
        ctx.room.set_door_open(lane, component.uuid(), !was_open);
        if app.config.debug.component_logging {
            debug!(
                "door {} in {} -> {} ({})",
                component.uuid(),
                ctx.room.identifier(),
                if was_open { "closed" } else { "open" },
                next
            );
        }
        self.sweep_to(app, ctx, next)
    }
}

/// Dispatches a console command. `{player}` expands to the acting player's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCommandTrait {
    pub command: String,
}

impl SendCommandTrait {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn render(&self, ctx: &InvocationContext) -> String {
        let player = ctx.player.map(|p| p.to_string()).unwrap_or_default();
        self.command
            .replace("{player}", &player)
            .replace("{room}", &ctx.room.identifier().key)
    }
}

impl ComponentTrait for SendCommandTrait {
    fn tag(&self) -> &'static str {
        SEND_COMMAND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_functional(&self) -> Option<&dyn FunctionalTrait> {
        Some(self)
    }

    fn question(&self) -> QuestionElement {
        QuestionElement::clickable(
            format!("Command: /{}", self.command),
            EditAction::Ask(EditField::Command),
        )
    }
}

impl FunctionalTrait for SendCommandTrait {
    fn invoke(
        &self,
        app: &Arc<AppContext>,
        ctx: &InvocationContext,
        _lane: &OnLane<Components>,
    ) -> Result<()> {
        let command = self.render(ctx);
        let app2 = app.clone();
        app.lanes.tick.submit(move |tick| {
            if !app2.host.dispatch_command(tick, &command) {
                warn!("host refused command '{}'", escape_log(&command));
            }
        })?;
        Ok(())
    }
}

//! Component editing.
//!
//! Components are never edited in place. An [`EditCommand`] builds a new
//! [`Component`] with one trait swapped, and [`publish_edit`] swaps that value
//! into the component index, re-syncs trigger registrations and announces the
//! replacement.
//!
//! The question tree shown to editors is a plain [`QuestionElement`] value.
//! Clicking an element yields an [`EditAction`]: either a ready command or a
//! field to [`ask`] the player about.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use glam::{IVec3, Vec3};
use log::{debug, info};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::component::{
    BlockInteractTrigger, Component, ComponentTrait, LocationAndDirectionTrait, LocationTrait,
    MobKillTrigger, QuantityRange, SendCommandTrait, SetBlocksTrait, SpawnerTrait, SweepStrategy,
    TriggerRule,
};
use crate::context::AppContext;
use crate::dungeon::RoomInstance;
use crate::errors::{DungeonError, Result};
use crate::events::DungeonEvent;
use crate::host::{BlockType, PlayerId, WorldHost};
use crate::identifier::IdKey;
use crate::lanes::TaskHandle;
use crate::logutil::escape_log;

#[derive(Debug, Clone)]
pub enum QuestionElement {
    Label(String),
    List {
        title: String,
        children: Vec<QuestionElement>,
    },
    Clickable {
        text: String,
        action: EditAction,
    },
}

impl QuestionElement {
    pub fn label(text: impl Into<String>) -> Self {
        QuestionElement::Label(text.into())
    }

    pub fn list(title: impl Into<String>, children: Vec<QuestionElement>) -> Self {
        QuestionElement::List {
            title: title.into(),
            children,
        }
    }

    pub fn clickable(text: impl Into<String>, action: EditAction) -> Self {
        QuestionElement::Clickable {
            text: text.into(),
            action,
        }
    }

    /// Indented text rendering, two spaces per level. Clickables are bracketed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            QuestionElement::Label(text) => {
                let _ = writeln!(out, "{}{}", indent, text);
            }
            QuestionElement::Clickable { text, .. } => {
                let _ = writeln!(out, "{}[{}]", indent, text);
            }
            QuestionElement::List { title, children } => {
                let _ = writeln!(out, "{}{}", indent, title);
                for child in children {
                    child.render_into(out, depth + 1);
                }
            }
        }
    }

    /// Actions in render order.
    pub fn actions(&self) -> Vec<&EditAction> {
        match self {
            QuestionElement::Label(_) => Vec::new(),
            QuestionElement::Clickable { action, .. } => vec![action],
            QuestionElement::List { children, .. } => children.iter().flat_map(|c| c.actions()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EditAction {
    Apply(EditCommand),
    Ask(EditField),
}

/// A value the editor has to type in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditField {
    Location,
    Mob,
    Quantity,
    Radius,
    OpenBlock,
    CloseBlock,
    Command,
    Uses,
    Target,
    FilterBlock,
}

impl EditField {
    pub fn prompt(&self) -> &'static str {
        match self {
            EditField::Location => "Enter a room-relative position: x y z",
            EditField::Mob => "Enter a mob name",
            EditField::Quantity => "Enter a count or a range: min max",
            EditField::Radius => "Enter a spawn radius",
            EditField::OpenBlock => "Enter the open block",
            EditField::CloseBlock => "Enter the closed block",
            EditField::Command => "Enter a console command; {player} is replaced",
            EditField::Uses => "Enter how often this may fire, -1 for unlimited",
            EditField::Target => "Enter the uuid of a component to invoke",
            EditField::FilterBlock => "Enter a block to react to, or 'any'",
        }
    }

    /// Turns an answer into the command it stands for.
    pub fn parse(&self, answer: &str) -> Result<EditCommand> {
        let answer = answer.trim();
        let invalid = |msg: String| DungeonError::codec(format!("{:?}", self), msg);
        match self {
            EditField::Location => {
                let parts: Vec<f32> = answer
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| invalid(format!("{}", e)))?;
                match parts.as_slice() {
                    [x, y, z] => Ok(EditCommand::SetLocation(Vec3::new(*x, *y, *z))),
                    _ => Err(invalid(format!("expected three numbers, got '{}'", answer))),
                }
            }
            EditField::Mob if !answer.is_empty() => Ok(EditCommand::SetMob(IdKey::mob(answer))),
            EditField::Quantity => {
                let parts: Vec<u32> = answer
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| invalid(format!("{}", e)))?;
                match parts.as_slice() {
                    [n] => Ok(EditCommand::SetQuantity(QuantityRange::exactly(*n))),
                    [min, max] => Ok(EditCommand::SetQuantity(QuantityRange::new(*min, *max))),
                    _ => Err(invalid(format!("expected one or two counts, got '{}'", answer))),
                }
            }
            EditField::Radius => answer
                .parse()
                .map(EditCommand::SetRadius)
                .map_err(|e| invalid(format!("{}", e))),
            EditField::OpenBlock if !answer.is_empty() => Ok(EditCommand::SetOpenBlock(BlockType::new(answer))),
            EditField::CloseBlock if !answer.is_empty() => Ok(EditCommand::SetCloseBlock(BlockType::new(answer))),
            EditField::Command if !answer.is_empty() => Ok(EditCommand::SetCommand(
                answer.trim_start_matches('/').to_string(),
            )),
            EditField::Uses => answer
                .parse()
                .map(EditCommand::SetUses)
                .map_err(|e| invalid(format!("{}", e))),
            EditField::Target => answer
                .parse()
                .map(EditCommand::AddTarget)
                .map_err(|e| invalid(format!("{}", e))),
            EditField::FilterBlock if answer.eq_ignore_ascii_case("any") => Ok(EditCommand::SetFilterBlock(None)),
            EditField::FilterBlock if !answer.is_empty() => {
                Ok(EditCommand::SetFilterBlock(Some(BlockType::new(answer))))
            }
            _ => Err(invalid("empty answer".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EditCommand {
    SetSweep(SweepStrategy),
    SetOpenBlock(BlockType),
    SetCloseBlock(BlockType),
    SetLocation(Vec3),
    SetMob(IdKey),
    SetQuantity(QuantityRange),
    SetRadius(f32),
    SetCommand(String),
    SetUses(i32),
    AddTarget(Uuid),
    RemoveTarget(Uuid),
    SetFilterBlock(Option<BlockType>),
    /// Swap in an arbitrary trait of a type the component already holds.
    ReplaceTrait(Arc<dyn ComponentTrait>),
}

impl EditCommand {
    /// The edited copy of `component`. The original is left untouched.
    pub fn apply(&self, component: &Component) -> Result<Component> {
        match self {
            EditCommand::SetSweep(sweep) => {
                let blocks = component.get_trait::<SetBlocksTrait>()?;
                component.with_trait(Arc::new(blocks.with_sweep(*sweep)))
            }
            EditCommand::SetOpenBlock(block) => {
                let blocks = component.get_trait::<SetBlocksTrait>()?;
                component.with_trait(Arc::new(SetBlocksTrait {
                    open: block.clone(),
                    ..blocks.clone()
                }))
            }
            EditCommand::SetCloseBlock(block) => {
                let blocks = component.get_trait::<SetBlocksTrait>()?;
                component.with_trait(Arc::new(SetBlocksTrait {
                    close: block.clone(),
                    ..blocks.clone()
                }))
            }
            EditCommand::SetLocation(vector) => {
                if component.has_trait::<LocationTrait>() {
                    component.with_trait(Arc::new(LocationTrait::new(*vector)))
                } else {
                    let current = component.get_trait::<LocationAndDirectionTrait>()?;
                    component.with_trait(Arc::new(LocationAndDirectionTrait {
                        vector: *vector,
                        ..current.clone()
                    }))
                }
            }
            EditCommand::SetMob(mob) => {
                if let Ok(spawner) = component.get_trait::<SpawnerTrait>() {
                    component.with_trait(Arc::new(SpawnerTrait {
                        mob: mob.clone(),
                        ..spawner.clone()
                    }))
                } else {
                    let trigger = component.get_trait::<MobKillTrigger>()?;
                    component.with_trait(Arc::new(MobKillTrigger::new(mob.clone(), trigger.rule.clone())))
                }
            }
            EditCommand::SetQuantity(quantity) => {
                let spawner = component.get_trait::<SpawnerTrait>()?;
                component.with_trait(Arc::new(SpawnerTrait {
                    quantity: *quantity,
                    ..spawner.clone()
                }))
            }
            EditCommand::SetRadius(radius) => {
                let spawner = component.get_trait::<SpawnerTrait>()?;
                component.with_trait(Arc::new(SpawnerTrait {
                    radius: *radius,
                    ..spawner.clone()
                }))
            }
            EditCommand::SetCommand(command) => {
                component.get_trait::<SendCommandTrait>()?;
                component.with_trait(Arc::new(SendCommandTrait::new(command.clone())))
            }
            EditCommand::SetUses(uses) => edit_rule(component, |rule| rule.uses = *uses),
            EditCommand::AddTarget(target) => edit_rule(component, |rule| {
                rule.targets.insert(*target);
            }),
            EditCommand::RemoveTarget(target) => edit_rule(component, |rule| {
                rule.targets.remove(target);
            }),
            EditCommand::SetFilterBlock(block) => {
                let trigger = component.get_trait::<BlockInteractTrigger>()?;
                component.with_trait(Arc::new(BlockInteractTrigger::new(block.clone(), trigger.rule.clone())))
            }
            EditCommand::ReplaceTrait(replacement) => component.with_trait(replacement.clone()),
        }
    }
}

/// Applies `f` to the rule of the component's first trigger.
fn edit_rule(component: &Component, f: impl FnOnce(&mut TriggerRule)) -> Result<Component> {
    let (_, trigger) = component
        .triggers()
        .next()
        .ok_or_else(|| DungeonError::MissingTrait {
            component: format!("{}/{}", component.kind().tag(), component.uuid()),
            tag: "trigger",
        })?;
    let mut rule = trigger.rule().clone();
    f(&mut rule);
    component.with_trait(trigger.with_rule(rule))
}

/// Applies `command` to the component `uuid` and publishes the result.
pub fn publish_edit(app: &Arc<AppContext>, uuid: Uuid, command: &EditCommand) -> Result<Arc<Component>> {
    let current = app.components.get_by_uuid_or_err(uuid)?;
    let edited = Arc::new(command.apply(&current)?);
    let old = app.components.replace(edited.clone())?;
    if app.state().is_safe() {
        app.triggers.sync(app);
    }
    app.bus.publish(&DungeonEvent::ComponentReplaced {
        old,
        new: edited.clone(),
    });
    info!("component {} edited", uuid);
    Ok(edited)
}

/// Where questions are shown to a player.
pub trait Prompter: Send + Sync {
    fn show_question(&self, player: PlayerId, question: &str);
}

impl<T: WorldHost + ?Sized> Prompter for T {
    fn show_question(&self, player: PlayerId, question: &str) {
        self.show_caption(player, "Edit", question);
    }
}

/// Open questions, one per player. A newer question replaces an older one.
#[derive(Default)]
pub struct PromptBook {
    pending: Mutex<HashMap<PlayerId, Question>>,
    tickets: AtomicU64,
}

struct Question {
    ticket: u64,
    reply: oneshot::Sender<String>,
}

impl PromptBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, player: PlayerId) -> (u64, oneshot::Receiver<String>) {
        let (reply, rx) = oneshot::channel();
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player, Question { ticket, reply });
        (ticket, rx)
    }

    /// Drops the player's question only if it is still the one `ticket` opened.
    fn close(&self, player: PlayerId, ticket: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&player).is_some_and(|q| q.ticket == ticket) {
            pending.remove(&player);
        }
    }

    pub fn is_waiting(&self, player: PlayerId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&player)
    }

    /// Delivers an answer. False when nothing was asked.
    pub fn answer(&self, player: PlayerId, text: impl Into<String>) -> bool {
        let question = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player);
        match question {
            Some(q) => q.reply.send(text.into()).is_ok(),
            None => false,
        }
    }
}

/// Asks `player` for `field` and parses the answer into a command.
///
/// Fails with `PromptExpired` when no answer arrives within the configured
/// prompt timeout, and with `Cancelled` when a newer question replaced this one.
pub async fn ask(app: &Arc<AppContext>, player: PlayerId, field: EditField) -> Result<EditCommand> {
    ask_within(app, player, field, app.config.timing.prompt_timeout()).await
}

pub async fn ask_within(
    app: &Arc<AppContext>,
    player: PlayerId,
    field: EditField,
    timeout: Duration,
) -> Result<EditCommand> {
    let job_app = app.clone();
    let (ticket, rx) = app
        .lanes
        .prompts
        .call(move |_| {
            let opened = job_app.questions.open(player);
            job_app.host.show_question(player, field.prompt());
            opened
        })
        .await?;
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(answer)) => {
            debug!("{} answered {:?} with '{}'", player, field, escape_log(&answer));
            field.parse(&answer)
        }
        Ok(Err(_)) => Err(DungeonError::Cancelled(format!("question for {} replaced", player))),
        Err(_) => {
            let book_app = app.clone();
            let _ = app.lanes.prompts.submit(move |_| book_app.questions.close(player, ticket));
            debug!("question {:?} for {} expired", field, player);
            Err(DungeonError::PromptExpired(timeout))
        }
    }
}

/// Draws component outlines for an editing player.
pub trait OutlineSink: Send + Sync {
    fn draw_outline(&self, player: PlayerId, world: &str, blocks: &[IVec3]);
}

/// World blocks worth outlining for `component` in `room`.
pub fn outline_blocks(component: &Component, room: &RoomInstance) -> Vec<IVec3> {
    let mut blocks = Vec::new();
    if let Ok(set) = component.get_trait::<SetBlocksTrait>() {
        blocks.extend(set.blocks.iter().map(|b| *b + room.origin()));
    }
    if let Ok(location) = component.get_trait::<LocationTrait>() {
        blocks.push(room.world_block(location.vector));
    }
    if let Ok(location) = component.get_trait::<LocationAndDirectionTrait>() {
        blocks.push(room.world_block(location.vector));
    }
    blocks
}

/// A player editing one component; refreshes its outline on the render lane.
///
/// The refresh stops by itself once the player leaves edit mode, the room is
/// torn down or the component disappears, and is cancelled by any state change.
pub struct EditSession {
    player: PlayerId,
    component: Uuid,
    task: TaskHandle,
}

impl EditSession {
    pub fn start(
        app: &Arc<AppContext>,
        player: PlayerId,
        room: Arc<RoomInstance>,
        component: Uuid,
        sink: Arc<dyn OutlineSink>,
        refresh: Duration,
    ) -> Result<Self> {
        app.components.get_by_uuid_or_err(component)?;
        let weak: Weak<AppContext> = Arc::downgrade(app);
        let task = app.lanes.render.repeat(refresh, move |_lane, own| {
            let Some(app) = weak.upgrade() else {
                own.cancel();
                return;
            };
            if room.is_torn_down() || !app.host.is_editing(player) {
                own.cancel();
                return;
            }
            let Some(current) = app.components.get_by_uuid(component) else {
                own.cancel();
                return;
            };
            sink.draw_outline(player, room.world(), &outline_blocks(&current, &room));
        })?;
        Ok(Self {
            player,
            component,
            task,
        })
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn component(&self) -> Uuid {
        self.component
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_cancelled()
    }

    pub fn stop(&self) {
        self.task.cancel();
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.task.cancel();
    }
}

//! Trigger registration and fan-out.
//!
//! One bus listener exists per event kind, no matter how many trigger traits
//! use that kind. The listener only forwards the event to the components lane;
//! resolving, use accounting and stale checks all happen there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, warn};
use uuid::Uuid;

use crate::component::{InvocationContext, TriggerRule};
use crate::context::AppContext;
use crate::errors::Result;
use crate::events::{DungeonEvent, EventBus, EventKind, ListenerId, Verdict};
use crate::identifier::IdKey;
use crate::lanes::{Components, OnLane};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    room: IdKey,
    component: Uuid,
    tag: &'static str,
}

#[derive(Default)]
struct HubState {
    registrations: HashMap<EventKind, Vec<Registration>>,
    subscriptions: Vec<ListenerId>,
}

#[derive(Default)]
pub struct TriggerHub {
    state: Mutex<HubState>,
}

impl TriggerHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuilds registrations from the component index and subscribes one
    /// listener per event kind in use.
    pub fn sync(&self, app: &Arc<AppContext>) -> usize {
        self.clear(&app.bus);
        let mut registrations: HashMap<EventKind, Vec<Registration>> = HashMap::new();
        for (room, component) in app.components.all() {
            for (tag, trigger) in component.triggers() {
                registrations
                    .entry(trigger.event_kind())
                    .or_default()
                    .push(Registration {
                        room: room.clone(),
                        component: component.uuid(),
                        tag,
                    });
            }
        }
        let total = registrations.values().map(Vec::len).sum();
        let mut subscriptions = Vec::with_capacity(registrations.len());
        for kind in registrations.keys() {
            let weak: Weak<AppContext> = Arc::downgrade(app);
            let kind = *kind;
            subscriptions.push(app.bus.subscribe(kind, move |event| {
                if let Some(app) = weak.upgrade() {
                    forward(&app, kind, event);
                }
                Verdict::Continue
            }));
        }
        debug!(
            "synced {} trigger registration(s) over {} event kind(s)",
            total,
            subscriptions.len()
        );
        let mut state = self.lock();
        state.registrations = registrations;
        state.subscriptions = subscriptions;
        total
    }

    /// Drops every registration and bus subscription.
    pub fn clear(&self, bus: &EventBus) {
        let mut state = self.lock();
        for id in state.subscriptions.drain(..) {
            bus.unsubscribe(id);
        }
        state.registrations.clear();
    }

    pub fn registration_count(&self, kind: EventKind) -> usize {
        self.lock().registrations.get(&kind).map(Vec::len).unwrap_or(0)
    }

    fn registrations(&self, kind: EventKind) -> Vec<Registration> {
        self.lock().registrations.get(&kind).cloned().unwrap_or_default()
    }
}

fn forward(app: &Arc<AppContext>, kind: EventKind, event: &DungeonEvent) {
    let job_app = app.clone();
    let event = event.clone();
    if let Err(e) = app
        .lanes
        .components
        .submit(move |lane| {
            handle(&job_app, kind, &event, lane);
        })
    {
        debug!("{:?} not handled: {}", kind, e);
    }
}

/// Fires every registered trigger of `kind` that `event` resolves for.
pub fn handle(app: &Arc<AppContext>, kind: EventKind, event: &DungeonEvent, lane: &OnLane<Components>) -> usize {
    let mut fired = 0;
    for registration in app.triggers.registrations(kind) {
        match fire(app, &registration, event, lane) {
            Ok(true) => fired += 1,
            Ok(false) => {}
            Err(e) => warn!(
                "trigger {} on {} failed: {}",
                registration.tag, registration.component, e
            ),
        }
    }
    fired
}

fn fire(app: &Arc<AppContext>, registration: &Registration, event: &DungeonEvent, lane: &OnLane<Components>) -> Result<bool> {
    // the index may hold an edited copy since the last sync
    let Some(component) = app.components.get_by_uuid(registration.component) else {
        return Ok(false);
    };
    let Some(held) = component.trait_by_tag(registration.tag) else {
        return Ok(false);
    };
    let (Some(trigger), Some(functional)) = (held.as_trigger(), held.as_functional()) else {
        return Ok(false);
    };
    let Some(ctx) = trigger.resolve(app, &component, event) else {
        return Ok(false);
    };
    if ctx.room.identifier() != &registration.room {
        return Ok(false);
    }
    let still_present = app
        .components
        .components_in(&registration.room)
        .iter()
        .any(|c| c.uuid() == registration.component && c.has_trait_tag(registration.tag));
    if !still_present {
        debug!("stale trigger {} on {} ignored", registration.tag, registration.component);
        return Ok(false);
    }
    let instance = ctx.room.instance_or_err()?;
    let key = (registration.component, registration.tag);
    if !instance.consume_use(lane, key, trigger.rule().uses) {
        app.metrics.fan_out_suppressed();
        debug!(
            "trigger {} on {} used up in {}",
            registration.tag,
            registration.component,
            instance.uuid()
        );
        return Ok(false);
    }
    crate::engine::invoke_trait(app, functional, &ctx.with_component(component.clone()))?;
    Ok(true)
}

/// Invokes every target of `rule`. Unresolved targets are logged and skipped.
///
/// A target that lives in another room of the same instance is invoked there.
pub fn fan_out(app: &Arc<AppContext>, rule: &TriggerRule, ctx: &InvocationContext, lane: &OnLane<Components>) -> Result<usize> {
    let mut invoked = 0;
    for target in &rule.targets {
        if !ctx.is_live() {
            debug!("fan-out in {} stopped: context no longer live", ctx.room.identifier());
            break;
        }
        let Some(component) = app.components.get_by_uuid(*target) else {
            debug!("fan-out target {} does not exist, skipped", target);
            continue;
        };
        let room = match app.components.room_of_component(*target) {
            Some(home) if &home != ctx.room.identifier() => {
                match ctx.room.instance().and_then(|i| i.room(&home)) {
                    Some(room) => room,
                    None => {
                        debug!("fan-out target {} has no live room {}, skipped", target, home);
                        continue;
                    }
                }
            }
            _ => ctx.room.clone(),
        };
        if let Err(e) = crate::engine::invoke_on_lane(app, &component, ctx.in_room(room), lane) {
            warn!("fan-out target {} failed: {}", target, e);
            continue;
        }
        invoked += 1;
    }
    app.metrics.fan_out_fired();
    Ok(invoked)
}

//! Component invocation.
//!
//! Every component and trait side effect runs on the components lane.
//! [`invoke_component`] may be called from anywhere and redirects itself onto
//! the lane; [`invoke_trait`] refuses to run anywhere else.

use std::sync::Arc;

use log::{debug, warn};

use crate::component::{Component, FunctionalTrait, InvocationContext};
use crate::context::AppContext;
use crate::errors::{DungeonError, Result};
use crate::lanes::{Components, LaneKind, OnLane};

/// Invokes `component` in `ctx`, inline when already on the components lane.
pub fn invoke_component(app: &Arc<AppContext>, component: Arc<Component>, ctx: InvocationContext) -> Result<()> {
    if app.lanes.components.is_current() {
        let lane = app.lanes.components.proof()?;
        return invoke_on_lane(app, &component, ctx, &lane);
    }
    let job_app = app.clone();
    app.lanes.components.submit(move |lane| {
        if let Err(e) = invoke_on_lane(&job_app, &component, ctx, lane) {
            warn!("invocation of {} failed: {}", component.uuid(), e);
        }
    })?;
    Ok(())
}

/// Runs the component's functional traits in declaration order.
///
/// Stops early once the context is no longer live.
pub fn invoke_on_lane(
    app: &Arc<AppContext>,
    component: &Arc<Component>,
    ctx: InvocationContext,
    lane: &OnLane<Components>,
) -> Result<()> {
    let ctx = ctx.with_component(component.clone());
    if app.config.debug.component_logging {
        debug!(
            "invoking {} ({}) in {}",
            component.kind().tag(),
            component.uuid(),
            ctx.room.identifier()
        );
    }
    for functional in component.functional_traits() {
        if !ctx.is_live() {
            debug!("{} stopped: context no longer live", component.uuid());
            break;
        }
        functional.invoke(app, &ctx, lane)?;
    }
    Ok(())
}

/// Invokes a single trait. Fails with `LaneAffinity` off the components lane.
pub fn invoke_trait(app: &Arc<AppContext>, functional: &dyn FunctionalTrait, ctx: &InvocationContext) -> Result<()> {
    let lane = app
        .lanes
        .components
        .proof()
        .map_err(|_| DungeonError::LaneAffinity {
            expected: Components::NAME,
        })?;
    functional.invoke(app, ctx, &lane)
}

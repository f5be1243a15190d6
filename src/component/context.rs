use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::component::Component;
use crate::dungeon::RoomInstance;
use crate::host::PlayerId;

/// Everything an invocation acts on.
///
/// Copies made with [`with_component`](Self::with_component) or
/// [`with_player`](Self::with_player) share the liveness flag, so cancelling
/// any copy stops every loop still working on behalf of the original.
#[derive(Clone)]
pub struct InvocationContext {
    pub room: Arc<RoomInstance>,
    pub component: Option<Arc<Component>>,
    pub player: Option<PlayerId>,
    live: Arc<AtomicBool>,
}

impl InvocationContext {
    pub fn new(room: Arc<RoomInstance>) -> Self {
        Self {
            room,
            component: None,
            player: None,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn for_player(room: Arc<RoomInstance>, player: Option<PlayerId>) -> Self {
        Self {
            player,
            ..Self::new(room)
        }
    }

    pub fn with_component(&self, component: Arc<Component>) -> Self {
        Self {
            component: Some(component),
            ..self.clone()
        }
    }

    pub fn with_player(&self, player: PlayerId) -> Self {
        Self {
            player: Some(player),
            ..self.clone()
        }
    }

    /// Same player and liveness, another room of the same instance.
    pub fn in_room(&self, room: Arc<RoomInstance>) -> Self {
        Self {
            room,
            component: None,
            ..self.clone()
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.room.is_torn_down()
    }

    pub fn cancel(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("room", self.room.identifier())
            .field("component", &self.component.as_ref().map(|c| c.uuid()))
            .field("player", &self.player)
            .field("live", &self.live.load(Ordering::Relaxed))
            .finish()
    }
}

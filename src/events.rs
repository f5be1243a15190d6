//! In-process event bus.
//!
//! Listeners subscribe per [`EventKind`] and may cancel; the publisher sees
//! the combined verdict. Listeners are called outside the registry lock, in
//! subscription order, so a listener may itself subscribe or publish.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use glam::IVec3;

use crate::component::Component;
use crate::context::ServiceState;
use crate::dungeon::{Instance, RoomInstance};
use crate::geometry::WorldPos;
use crate::host::{BlockType, EntityHandle, KillMethod, PlayerId};
use crate::identifier::IdKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoomEnter,
    RoomLeave,
    MobKill,
    MobSpawn,
    BlockInteract,
    Player,
    Cache,
    KeyDrop,
    KeyCollected,
    ComponentReplaced,
    StateChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Join,
    Quit,
    Teleport,
}

#[derive(Clone)]
pub enum DungeonEvent {
    RoomEnter {
        player: PlayerId,
        room: Arc<RoomInstance>,
    },
    RoomLeave {
        player: PlayerId,
        room: Arc<RoomInstance>,
    },
    MobKill {
        room: Arc<RoomInstance>,
        mob: IdKey,
        victim: EntityHandle,
        method: Option<KillMethod>,
    },
    MobSpawn {
        room: Arc<RoomInstance>,
        mob: IdKey,
        at: WorldPos,
    },
    BlockInteract {
        player: PlayerId,
        block: BlockType,
        world: String,
        at: IVec3,
    },
    Player {
        player: PlayerId,
        action: PlayerAction,
    },
    Cache {
        instance: Arc<Instance>,
    },
    KeyDrop {
        room: Arc<RoomInstance>,
        at: WorldPos,
    },
    KeyCollected {
        instance: Arc<Instance>,
        player: Option<PlayerId>,
    },
    ComponentReplaced {
        old: Arc<Component>,
        new: Arc<Component>,
    },
    StateChanged {
        from: ServiceState,
        to: ServiceState,
    },
}

impl DungeonEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DungeonEvent::RoomEnter { .. } => EventKind::RoomEnter,
            DungeonEvent::RoomLeave { .. } => EventKind::RoomLeave,
            DungeonEvent::MobKill { .. } => EventKind::MobKill,
            DungeonEvent::MobSpawn { .. } => EventKind::MobSpawn,
            DungeonEvent::BlockInteract { .. } => EventKind::BlockInteract,
            DungeonEvent::Player { .. } => EventKind::Player,
            DungeonEvent::Cache { .. } => EventKind::Cache,
            DungeonEvent::KeyDrop { .. } => EventKind::KeyDrop,
            DungeonEvent::KeyCollected { .. } => EventKind::KeyCollected,
            DungeonEvent::ComponentReplaced { .. } => EventKind::ComponentReplaced,
            DungeonEvent::StateChanged { .. } => EventKind::StateChanged,
        }
    }

    /// Acting player, if the event has one.
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            DungeonEvent::RoomEnter { player, .. }
            | DungeonEvent::RoomLeave { player, .. }
            | DungeonEvent::BlockInteract { player, .. }
            | DungeonEvent::Player { player, .. } => Some(*player),
            DungeonEvent::MobKill { method, .. } => method.as_ref().and_then(KillMethod::player),
            DungeonEvent::KeyCollected { player, .. } => *player,
            _ => None,
        }
    }

    /// Room reference, if the event carries one.
    pub fn room(&self) -> Option<&Arc<RoomInstance>> {
        match self {
            DungeonEvent::RoomEnter { room, .. }
            | DungeonEvent::RoomLeave { room, .. }
            | DungeonEvent::MobKill { room, .. }
            | DungeonEvent::MobSpawn { room, .. }
            | DungeonEvent::KeyDrop { room, .. } => Some(room),
            _ => None,
        }
    }
}

impl fmt::Debug for DungeonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())?;
        if let Some(room) = self.room() {
            write!(f, "(room={})", room.identifier())?;
        }
        if let Some(player) = self.player() {
            write!(f, "(player={})", player)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&DungeonEvent) -> Verdict + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub cancelled: bool,
    pub listeners: usize,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&DungeonEvent) -> Verdict + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut map = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in map.values_mut() {
            let before = list.len();
            list.retain(|(lid, _)| *lid != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Calls every listener of the event's kind; any `Cancel` cancels the event.
    pub fn publish(&self, event: &DungeonEvent) -> Published {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        let mut cancelled = false;
        for listener in &snapshot {
            if listener(event) == Verdict::Cancel {
                cancelled = true;
            }
        }
        Published {
            cancelled,
            listeners: snapshot.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn state_event() -> DungeonEvent {
        DungeonEvent::StateChanged {
            from: ServiceState::Loading,
            to: ServiceState::Processing,
        }
    }

    #[test]
    fn cancellation_is_visible_to_publisher() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        bus.subscribe(EventKind::StateChanged, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            Verdict::Cancel
        });
        let c2 = calls.clone();
        bus.subscribe(EventKind::StateChanged, move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
            Verdict::Continue
        });
        let published = bus.publish(&state_event());
        assert!(published.cancelled);
        assert_eq!(published.listeners, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::StateChanged, |_| Verdict::Cancel);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(!bus.publish(&state_event()).cancelled);
        assert_eq!(bus.listener_count(EventKind::StateChanged), 0);
    }
}

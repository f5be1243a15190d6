//! Formats, live instances and the manager that places them.

pub mod format;
pub mod instance;
pub mod manager;
pub mod placement;
pub mod room;

pub use format::{Format, InstanceOption, KeyDropMode, RoomFormat};
pub use instance::{CacheState, Instance, InstanceStatus, RemovalReason};
pub use manager::DungeonManager;
pub use room::{DeathOutcome, RoomInstance};

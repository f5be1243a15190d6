use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the dungeon core.
#[derive(Debug, Error)]
pub enum DungeonError {
    /// Lookup miss against one of the stores.
    #[error("not found: {0}")]
    NotFound(String),

    /// Building an instance failed; the partial instance has already been rolled back.
    #[error("failed to instantiate {format}: {source}")]
    Instantiation {
        format: String,
        #[source]
        source: Box<DungeonError>,
    },

    /// Terrain erase failed. The instance is detached regardless.
    #[error("failed to erase instance {instance}: {reason}")]
    PhysicalRemoval { instance: String, reason: String },

    /// A component was built with two traits of the same concrete type.
    #[error("component {component} already holds a {tag} trait")]
    DuplicateTrait { component: String, tag: &'static str },

    /// A component kind was built without one of its required traits.
    #[error("component {component} is missing a {tag} trait")]
    MissingTrait { component: String, tag: &'static str },

    /// Work that needs a specific lane ran somewhere else.
    #[error("must run on the {expected} lane")]
    LaneAffinity { expected: &'static str },

    /// The lane no longer accepts work.
    #[error("{0} lane is closed")]
    LaneClosed(&'static str),

    /// Internal bookkeeping disagrees with the world (e.g. an untracked mob died).
    #[error("bookkeeping error: {0}")]
    Bookkeeping(String),

    #[error("terrain error: {0}")]
    Terrain(#[from] TerrainError),

    /// Encoding or decoding a tagged value failed.
    #[error("codec error for {tag}: {message}")]
    Codec { tag: String, message: String },

    /// The backing world could not be acquired.
    #[error("world unavailable: {0}")]
    WorldUnavailable(String),

    /// An interactive prompt got no answer in time.
    #[error("prompt expired after {0:?}")]
    PromptExpired(Duration),

    /// A cancellable notification was cancelled by a listener.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DungeonError {
    pub fn codec(tag: impl Into<String>, message: impl ToString) -> Self {
        DungeonError::Codec {
            tag: tag.into(),
            message: message.to_string(),
        }
    }

    /// Short caption suitable for showing to the player who triggered the failure.
    pub fn caption(&self) -> &'static str {
        match self {
            DungeonError::NotFound(_) => "That does not exist.",
            DungeonError::Instantiation { .. } => "The dungeon could not be built.",
            DungeonError::PromptExpired(_) => "You took too long to answer.",
            DungeonError::Cancelled(_) => "That was cancelled.",
            _ => "Something went wrong, see the server log.",
        }
    }
}

/// Errors returned by the terrain-mutation collaborator.
#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("template {0} is unknown")]
    UnknownTemplate(String),

    #[error("world {0} is not loaded")]
    WorldNotLoaded(String),

    #[error("region mutation rejected: {0}")]
    Rejected(String),
}

pub type Result<T, E = DungeonError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiation_wraps_source_message() {
        let err = DungeonError::Instantiation {
            format: "dungeon:crypt".into(),
            source: Box::new(DungeonError::Terrain(TerrainError::UnknownTemplate(
                "crypt.schem".into(),
            ))),
        };
        let text = err.to_string();
        assert!(text.contains("dungeon:crypt"));
        assert!(text.contains("crypt.schem"));
        assert_eq!(err.caption(), "The dungeon could not be built.");
    }
}

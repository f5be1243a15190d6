//! Category-tagged stable keys.
//!
//! An [`IdKey`] is the only reference that survives a reload: formats, rooms,
//! mob templates and component kinds are all addressed through one. Keys
//! order by category first, then lexically by key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DungeonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdCategory {
    Dungeon,
    Room,
    Mob,
    Component,
    Trait,
    Text,
}

impl IdCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdCategory::Dungeon => "dungeon",
            IdCategory::Room => "room",
            IdCategory::Mob => "mob",
            IdCategory::Component => "component",
            IdCategory::Trait => "trait",
            IdCategory::Text => "text",
        }
    }
}

impl FromStr for IdCategory {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dungeon" => Ok(IdCategory::Dungeon),
            "room" => Ok(IdCategory::Room),
            "mob" => Ok(IdCategory::Mob),
            "component" => Ok(IdCategory::Component),
            "trait" => Ok(IdCategory::Trait),
            "text" => Ok(IdCategory::Text),
            other => Err(DungeonError::NotFound(format!("identifier category '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdKey {
    pub category: IdCategory,
    pub key: String,
}

impl IdKey {
    pub fn new(category: IdCategory, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }

    pub fn dungeon(key: impl Into<String>) -> Self {
        Self::new(IdCategory::Dungeon, key)
    }

    pub fn room(key: impl Into<String>) -> Self {
        Self::new(IdCategory::Room, key)
    }

    pub fn mob(key: impl Into<String>) -> Self {
        Self::new(IdCategory::Mob, key)
    }

    pub fn component(key: impl Into<String>) -> Self {
        Self::new(IdCategory::Component, key)
    }

    pub fn trait_key(key: impl Into<String>) -> Self {
        Self::new(IdCategory::Trait, key)
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.as_str(), self.key)
    }
}

/// Parses `category:key`.
impl FromStr for IdKey {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, key) = s
            .split_once(':')
            .ok_or_else(|| DungeonError::NotFound(format!("identifier '{}' has no category", s)))?;
        if key.is_empty() {
            return Err(DungeonError::NotFound(format!("identifier '{}' has an empty key", s)));
        }
        Ok(IdKey::new(category.parse()?, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_category_then_key() {
        let mut keys = vec![
            IdKey::room("b"),
            IdKey::dungeon("z"),
            IdKey::room("a"),
            IdKey::mob("a"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["dungeon:z", "room:a", "room:b", "mob:a"]);
    }

    #[test]
    fn equality_uses_both_fields() {
        assert_ne!(IdKey::room("crypt"), IdKey::dungeon("crypt"));
        assert_eq!(IdKey::room("crypt"), "room:crypt".parse().unwrap());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("crypt".parse::<IdKey>().is_err());
        assert!("room:".parse::<IdKey>().is_err());
        assert!("planet:x".parse::<IdKey>().is_err());
    }
}

//! # Configuration Management Module
//!
//! Service configuration, loaded from TOML with defaults for every value.
//!
//! ## Configuration Structure
//!
//! - [`DungeonConfig`] - backing world, placement grid and cache size
//! - [`KeysConfig`] - key marker appearance and auto-pickup delay
//! - [`TimingConfig`] - maintenance intervals, grace periods and timeouts
//! - [`DebugConfig`] - debug switches
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use instancer::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("instancer.toml").await?;
//!     config.validate()?;
//!     println!("Backing world: {}", config.dungeon.world);
//!
//!     Config::create_default("instancer.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [dungeon]
//! world = "instancing"
//! grid_size = 1000
//! cache_size_per_dungeon = 1
//!
//! [keys]
//! glow = true
//! glow_color = "BLUE"
//! auto_pickup_secs = 15
//! ```
//!
//! Every section is optional; missing sections and fields take their defaults.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Cached instances per dungeon must stay below this.
pub const MAX_CACHE_SIZE: usize = 10;

/// Glow colours a key marker may use.
pub const GLOW_COLORS: [&str; 16] = [
    "BLACK",
    "DARK_BLUE",
    "DARK_GREEN",
    "DARK_AQUA",
    "DARK_RED",
    "DARK_PURPLE",
    "GOLD",
    "GRAY",
    "DARK_GRAY",
    "BLUE",
    "GREEN",
    "AQUA",
    "RED",
    "LIGHT_PURPLE",
    "YELLOW",
    "WHITE",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dungeon: DungeonConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonConfig {
    /// Backing world used as the placement canvas.
    pub world: String,
    /// Edge length of one placement cell.
    pub grid_size: i32,
    pub cache_size_per_dungeon: usize,
    /// Anchor height when the backing world reports no spawn.
    pub spawn_y: i32,
}

impl Default for DungeonConfig {
    fn default() -> Self {
        Self {
            world: "instancing".to_string(),
            grid_size: 1000,
            cache_size_per_dungeon: 1,
            spawn_y: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub glow: bool,
    pub glow_color: String,
    pub auto_pickup_secs: u64,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            glow: true,
            glow_color: "BLUE".to_string(),
            auto_pickup_secs: 15,
        }
    }
}

impl KeysConfig {
    pub fn auto_pickup(&self) -> Duration {
        Duration::from_secs(self.auto_pickup_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub idle_reap_interval_secs: u64,
    /// Time a disconnected player has to come back before losing their instance.
    pub quit_grace_secs: u64,
    pub entity_check_interval_ms: u64,
    pub room_tracking_interval_ms: u64,
    pub door_layer_stagger_ms: u64,
    pub prompt_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_reap_interval_secs: 20,
            quit_grace_secs: 5,
            entity_check_interval_ms: 2000,
            room_tracking_interval_ms: 50,
            door_layer_stagger_ms: 50,
            prompt_timeout_secs: 60,
        }
    }
}

impl TimingConfig {
    pub fn idle_reap_interval(&self) -> Duration {
        Duration::from_secs(self.idle_reap_interval_secs)
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_secs(self.quit_grace_secs)
    }

    pub fn entity_check_interval(&self) -> Duration {
        Duration::from_millis(self.entity_check_interval_ms)
    }

    pub fn room_tracking_interval(&self) -> Duration {
        Duration::from_millis(self.room_tracking_interval_ms)
    }

    pub fn door_layer_stagger(&self) -> Duration {
        Duration::from_millis(self.door_layer_stagger_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Log every component invocation at debug level.
    pub component_logging: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            component_logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dungeon.world.trim().is_empty() {
            bail!("dungeon.world must not be empty");
        }
        if self.dungeon.grid_size <= 0 {
            bail!("dungeon.grid_size must be positive, got {}", self.dungeon.grid_size);
        }
        if self.dungeon.cache_size_per_dungeon >= MAX_CACHE_SIZE {
            bail!(
                "dungeon.cache_size_per_dungeon must be below {}, got {}",
                MAX_CACHE_SIZE,
                self.dungeon.cache_size_per_dungeon
            );
        }
        if !GLOW_COLORS.contains(&self.keys.glow_color.as_str()) {
            bail!("keys.glow_color {} is not a known colour", self.keys.glow_color);
        }
        if self.timing.entity_check_interval_ms == 0 || self.timing.room_tracking_interval_ms == 0 {
            bail!("maintenance intervals must be non-zero");
        }
        if self.timing.idle_reap_interval_secs == 0 {
            bail!("timing.idle_reap_interval_secs must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dungeon.world, "instancing");
        assert_eq!(config.dungeon.grid_size, 1000);
        assert_eq!(config.keys.auto_pickup(), Duration::from_secs(15));
        assert_eq!(config.timing.door_layer_stagger(), Duration::from_millis(50));
        assert!(!config.debug.component_logging);
    }

    #[test]
    fn cache_size_must_stay_below_ten() {
        let mut config = Config::default();
        config.dungeon.cache_size_per_dungeon = 10;
        assert!(config.validate().is_err());
        config.dungeon.cache_size_per_dungeon = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_glow_color_is_rejected() {
        let mut config = Config::default();
        config.keys.glow_color = "MAUVE".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_takes_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dungeon]
            grid_size = 250

            [keys]
            glow = false
            "#,
        )
        .unwrap();
        assert_eq!(config.dungeon.grid_size, 250);
        assert_eq!(config.dungeon.world, "instancing");
        assert!(!config.keys.glow);
        assert_eq!(config.keys.glow_color, "BLUE");
        assert_eq!(config.timing.quit_grace_secs, 5);
    }

    #[tokio::test]
    async fn default_file_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instancer.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.dungeon.cache_size_per_dungeon, 1);
        assert_eq!(loaded.timing.prompt_timeout_secs, 60);
        assert!(loaded.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/instancer.toml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/instancer.toml"));
    }
}

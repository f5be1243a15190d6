//! # Instancer - Instanced Dungeon Orchestration
//!
//! Instancer places isolated copies of room-based dungeon templates into a shared
//! backing world, drives their behaviour through data-driven components, and
//! recycles finished instances for the next party.
//!
//! ## Features
//!
//! - **Spiral Placement**: Instances sit on a square grid enumerated outward from world spawn.
//! - **Cache Recycling**: Empty instances can be kept warm and rebuilt without a fresh paste.
//! - **Component Engine**: Composable traits (doors, spawners, commands, triggers) invoked by a single writer.
//! - **Trigger Fan-out**: Event-driven triggers with per-instance use ceilings and best-effort target resolution.
//! - **Key Economy**: Mob kills drop keys that feed a per-instance door key counter.
//! - **Lanes**: Dedicated sequential execution contexts with compile-time lane proofs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use instancer::config::Config;
//! use instancer::context::AppContext;
//! use instancer::host::memory::MemoryHost;
//! use instancer::loader::DefinitionSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("instancer.toml").await?;
//!     let host = Arc::new(MemoryHost::default());
//!     let app = AppContext::new(config, host.clone(), host)?;
//!
//!     let definitions = DefinitionSet::read_dir("definitions").await?;
//!     app.enable(&definitions).await?;
//!     // ... host events flow in through `instancer::listeners` ...
//!     app.disable().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`context`] - Application context and the service state machine
//! - [`lanes`] - Sequential execution lanes and lane proofs
//! - [`dungeon`] - Formats, instances, rooms and the dungeon manager
//! - [`component`] - Traits, components and the invocation context
//! - [`engine`] / [`trigger`] - Component invocation and event fan-out
//! - [`host`] - World host and terrain collaborators, plus an in-memory host
//! - [`config`] - Configuration management and validation
//! - [`codec`] / [`loader`] - Trait codecs and definition files
//! - [`edit`] - Component editing, prompts and edit sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Host listeners │ ← World events in, lane hops out
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Dungeon manager │ ← Placement, caching, removal (tick lane)
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Component engine│ ← Doors, spawners, triggers (components lane)
//! └─────────────────┘
//! ```

pub mod codec;
pub mod component;
pub mod config;
pub mod context;
pub mod dungeon;
pub mod edit;
pub mod engine;
pub mod errors;
pub mod events;
pub mod geometry;
pub mod host;
pub mod identifier;
pub mod lanes;
pub mod listeners;
pub mod loader;
pub mod logutil;
pub mod maintenance;
pub mod metrics;
pub mod mob;
pub mod storage;
pub mod trigger;

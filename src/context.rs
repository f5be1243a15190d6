//! Application context and service lifecycle.
//!
//! [`AppContext`] is built once at startup and handed to every subsystem as
//! `&Arc<AppContext>`. It owns the lanes, the loaded definitions, the host
//! collaborators and the service state machine.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context as _};
use log::{debug, info, warn};
use serde::Serialize;

use crate::codec::CodecRegistry;
use crate::config::Config;
use crate::dungeon::{DungeonManager, RemovalReason};
use crate::edit::PromptBook;
use crate::errors::Result;
use crate::events::{DungeonEvent, EventBus};
use crate::host::{TerrainEditor, WorldHost};
use crate::lanes::{Lanes, TaskHandle};
use crate::loader::{DefinitionLoader, LoadReport};
use crate::maintenance;
use crate::metrics::Metrics;
use crate::storage::{ComponentStorage, FormatStorage, MobStorage, Storage};
use crate::trigger::TriggerHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Undefined,
    Loading,
    Enabling,
    Reloading,
    Processing,
    Disabling,
    Disabled,
}

impl ServiceState {
    /// Only a processing service may recycle instances or fire triggers.
    pub fn is_safe(&self) -> bool {
        matches!(self, ServiceState::Processing)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ServiceState::Disabling | ServiceState::Disabled)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Undefined => "UNDEFINED",
            ServiceState::Loading => "LOADING",
            ServiceState::Enabling => "ENABLING",
            ServiceState::Reloading => "RELOADING",
            ServiceState::Processing => "PROCESSING",
            ServiceState::Disabling => "DISABLING",
            ServiceState::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}

pub struct AppContext {
    pub config: Config,
    state: Mutex<ServiceState>,
    pub lanes: Lanes,
    pub host: Arc<dyn WorldHost>,
    pub terrain: Arc<dyn TerrainEditor>,
    pub bus: EventBus,
    pub formats: FormatStorage,
    pub mobs: MobStorage,
    pub components: ComponentStorage,
    pub manager: DungeonManager,
    pub triggers: TriggerHub,
    pub questions: PromptBook,
    pub metrics: Metrics,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl AppContext {
    /// Builds the context and starts its lanes. Fails when a lane cannot start.
    pub fn new(config: Config, host: Arc<dyn WorldHost>, terrain: Arc<dyn TerrainEditor>) -> Result<Arc<Self>> {
        let lanes = Lanes::start()?;
        let manager = DungeonManager::new(
            config.dungeon.world.clone(),
            config.dungeon.grid_size,
            config.dungeon.spawn_y,
        );
        Ok(Arc::new(Self {
            config,
            state: Mutex::new(ServiceState::Undefined),
            lanes,
            host,
            terrain,
            bus: EventBus::new(),
            formats: Storage::new("format", false),
            mobs: Storage::new("mob", true),
            components: ComponentStorage::default(),
            manager,
            triggers: TriggerHub::new(),
            questions: PromptBook::new(),
            metrics: Metrics::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `to` and raises the state-changed signal: outstanding prompt
    /// and render tasks are cancelled and trigger listeners dropped. Entering
    /// PROCESSING subscribes the triggers again.
    pub fn set_state(self: &Arc<Self>, to: ServiceState) {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, to)
        };
        if from == to {
            return;
        }
        info!("Service state {} -> {}", from, to);
        let cancelled = self.lanes.cancel_listener_tasks();
        if cancelled > 0 {
            debug!("state change cancelled {} listener task(s)", cancelled);
        }
        self.triggers.clear(&self.bus);
        self.bus.publish(&DungeonEvent::StateChanged { from, to });
        if to.is_safe() {
            self.triggers.sync(self);
        }
    }

    fn load_definitions(&self, loader: &dyn DefinitionLoader) -> Result<LoadReport> {
        let (definitions, report) = loader.load(CodecRegistry::global())?;
        self.formats.load(
            definitions
                .formats
                .into_iter()
                .map(|format| (format.identifier().clone(), format)),
        );
        self.mobs.load(
            definitions
                .mobs
                .into_iter()
                .map(|mob| (mob.identifier().clone(), mob)),
        );
        self.components.load(definitions.components);
        debug!("definitions swapped in ({} skipped)", report.skipped.len());
        Ok(report)
    }

    async fn top_up_cache(self: &Arc<Self>) -> Result<usize> {
        let job_app = self.clone();
        let size = self.config.dungeon.cache_size_per_dungeon;
        self.lanes
            .tick
            .call(move |tick| job_app.manager.top_up_cache(&job_app, tick, size))
            .await
    }

    /// LOADING, backing world, definitions, maintenance, ENABLING, cache, PROCESSING.
    ///
    /// Failing to acquire the backing world aborts the enable.
    pub async fn enable(self: &Arc<Self>, loader: &dyn DefinitionLoader) -> anyhow::Result<LoadReport> {
        if self.state().is_safe() {
            return Err(anyhow!("service is already enabled"));
        }
        self.set_state(ServiceState::Loading);

        let job_app = self.clone();
        self.lanes
            .tick
            .call(move |tick| job_app.manager.acquire_world(&job_app, tick))
            .await?
            .context("Failed to acquire the backing world")?;

        let report = self
            .load_definitions(loader)
            .context("Failed to load definitions")?;

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.iter().all(TaskHandle::is_cancelled) {
                tasks.clear();
                tasks.extend(maintenance::start(self).context("Failed to start maintenance tasks")?);
            }
        }

        self.set_state(ServiceState::Enabling);
        let built = self.top_up_cache().await?;
        debug!("enable cached {} instance(s)", built);
        self.set_state(ServiceState::Processing);
        info!("Instancer enabled with {} dungeon format(s)", self.formats.len());
        Ok(report)
    }

    /// Tears down every instance, reloads the definitions and refills the cache.
    pub async fn reload(self: &Arc<Self>, loader: &dyn DefinitionLoader) -> anyhow::Result<LoadReport> {
        self.set_state(ServiceState::Reloading);
        let job_app = self.clone();
        self.lanes
            .tick
            .call(move |tick| job_app.manager.cleanup(&job_app, tick, RemovalReason::PluginReload))
            .await?;
        let report = self
            .load_definitions(loader)
            .context("Failed to reload definitions")?;
        self.top_up_cache().await?;
        self.set_state(ServiceState::Processing);
        info!("Instancer reloaded");
        Ok(report)
    }

    /// DISABLING, cleanup and world unload, DISABLED, then the lanes stop.
    pub async fn disable(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.state().is_disabled() {
            return Ok(());
        }
        self.set_state(ServiceState::Disabling);
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.cancel();
        }
        let job_app = self.clone();
        let unloaded = self
            .lanes
            .tick
            .call(move |tick| job_app.manager.shutdown(&job_app, tick))
            .await?;
        if let Err(e) = unloaded {
            warn!("Backing world not unloaded cleanly: {}", e);
        }
        self.set_state(ServiceState::Disabled);
        self.lanes.close_all();
        let lanes_app = self.clone();
        tokio::task::spawn_blocking(move || lanes_app.lanes.shutdown())
            .await
            .context("Lane shutdown panicked")?;
        info!("Instancer disabled");
        Ok(())
    }

    /// Number of maintenance tasks still scheduled.
    pub fn maintenance_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("state", &self.state())
            .field("world", &self.manager.world_name())
            .field("formats", &self.formats.len())
            .field("components", &self.components.len())
            .finish()
    }
}

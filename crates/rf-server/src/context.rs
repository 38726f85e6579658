//! Application context shared with every route handler through axum state.

use std::sync::Arc;

use rf_av::ToolRegistry;
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_jobs::{JobStore, LocalArtifactStore, MemoryJobStore, Orchestrator};

/// Immutable infrastructure behind `Arc`s. Cloned per request.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
    pub artifacts: Arc<LocalArtifactStore>,
    pub tools: Arc<ToolRegistry>,
    pub events: Arc<EventBus>,
}

impl AppContext {
    /// Wire an in-memory job store and the production collaborators.
    pub fn from_config(config: Config, tools: Arc<ToolRegistry>) -> rf_core::Result<Self> {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let events = Arc::new(EventBus::default());
        let orchestrator = Orchestrator::from_config(&config, tools.clone(), store.clone(), events.clone())?;
        Ok(Self::new(config, orchestrator, store, tools))
    }

    /// Build a context around an already constructed orchestrator.
    pub fn new(
        config: Config,
        orchestrator: Orchestrator,
        store: Arc<dyn JobStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let artifacts = Arc::new(LocalArtifactStore::new(config.server.output_dir.clone(), store));
        let events = orchestrator.events().clone();
        Self {
            config: Arc::new(config),
            orchestrator,
            artifacts,
            tools,
            events,
        }
    }
}

//! Application context shared by all request handlers via Axum state.

use std::sync::Arc;

use sc_av::{ScratchSpace, ToolRegistry};
use sc_core::config::Config;

use crate::conversion::{Coordinator, StageLimits};
use crate::downloads::DownloadRegistry;

/// Cheaply cloneable: every field is an `Arc`.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Runs conversion jobs.
    pub coordinator: Arc<Coordinator>,
    /// Outputs waiting to be downloaded.
    pub downloads: Arc<DownloadRegistry>,
}

impl AppContext {
    /// Assemble a context around an existing coordinator. The download
    /// registry shares the coordinator's scratch space.
    pub fn new(config: Config, tools: Arc<ToolRegistry>, coordinator: Arc<Coordinator>) -> Self {
        let downloads = Arc::new(DownloadRegistry::new(
            coordinator.scratch().clone(),
            config.downloads.ttl(),
        ));
        Self {
            config: Arc::new(config),
            tools,
            coordinator,
            downloads,
        }
    }

    /// The production context: scratch space at `config.scratch.dir`, tools
    /// discovered from `config.tools`.
    pub fn from_config(config: Config) -> sc_core::Result<Self> {
        let scratch = Arc::new(ScratchSpace::new(&config.scratch.dir)?);
        tracing::info!("Scratch space at {}", scratch.root().display());

        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let coordinator = Arc::new(Coordinator::with_tools(
            scratch,
            tools.clone(),
            StageLimits::from_config(&config.conversion),
        ));
        Ok(Self::new(config, tools, coordinator))
    }

    /// Per-file upload limit.
    pub fn max_upload_bytes(&self) -> u64 {
        self.config.server.max_upload_bytes
    }
}

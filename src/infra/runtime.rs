//! Wiring of settings into ready-to-use cache and pagination services.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::{
    CacheConfig, CacheEngine, EventQueue, Invalidator, MemoryStore, MetricsTracker,
    RecorderMetrics,
};
use crate::config::{self, Settings};
use crate::pagination::{PaginationConfig, Paginator};

use super::error::InfraError;
use super::telemetry;

/// Shared services for one process. Request state lives in
/// [`RequestContext`](crate::cache::RequestContext), created per request.
pub struct Runtime {
    pub engine: CacheEngine<MemoryStore>,
    pub invalidator: Invalidator<MemoryStore>,
    pub paginator: Paginator,
    pub settings: Settings,
}

impl Runtime {
    /// Load settings, install logging, and build the services.
    pub fn bootstrap(config_file: Option<&Path>) -> Result<Self, InfraError> {
        let settings = config::load(config_file)?;
        telemetry::init(&settings.logging)?;
        let runtime = Self::from_settings(settings);

        info!(
            cache_enabled = runtime.engine.config().enabled,
            memory_capacity = runtime.engine.config().memory_capacity,
            max_page_size = runtime.paginator.config().max_page_size,
            "scopecache runtime ready"
        );
        Ok(runtime)
    }

    /// Build the services without touching global logging state.
    pub fn from_settings(settings: Settings) -> Self {
        let cache_config = CacheConfig::from(&settings.cache);
        let store = Arc::new(MemoryStore::new(&cache_config));
        let queue = Arc::new(EventQueue::new());
        let metrics: Arc<dyn MetricsTracker> = Arc::new(RecorderMetrics);

        let invalidator = Invalidator::new(store.clone(), queue, &cache_config);
        let engine = CacheEngine::new(store, cache_config).with_metrics(metrics);
        let paginator = Paginator::new(PaginationConfig::from(&settings.pagination));

        Self {
            engine,
            invalidator,
            paginator,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        self.invalidator.queue()
    }
}

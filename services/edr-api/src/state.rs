//! Application state for the EDR API.

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use query_engine::{EngineConfig, QueryOrchestrator};
use storage::{PgCatalog, PgConnectionProvider};
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// Query pipeline over the catalogue and row storage.
    pub orchestrator: QueryOrchestrator,

    /// Renders `/metrics`; absent when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: QueryOrchestrator) -> Self {
        Self {
            orchestrator,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Connect to the catalogue database and build the query pipeline.
    pub async fn connect(database_url: &str, config: &EngineConfig) -> Result<Self> {
        let catalog = PgCatalog::connect(database_url, config.max_connections)
            .await
            .context("Failed to connect to catalogue database")?;

        let storage = PgConnectionProvider::new(catalog.pool().clone(), config.max_connections);
        let catalog = Arc::new(catalog);

        info!(
            default_srid = config.default_srid,
            position_buffer_m = config.position_buffer_m,
            "Query engine ready"
        );

        Ok(Self::new(QueryOrchestrator::with_config(
            catalog.clone(),
            catalog.clone(),
            Arc::new(storage),
            catalog,
            config,
        )))
    }
}

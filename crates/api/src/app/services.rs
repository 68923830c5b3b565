use std::sync::Arc;

use chrono::FixedOffset;
use tracing::info;

use tapor_core::{Clock, SystemClock};
use tapor_infra::store::{InMemoryStore, PostgresStore, Storage, StoreError};
use tapor_infra::{AppConfig, Catalog, Dashboard, EngineSettings, InvoiceEngine, StorageBackend};

/// Handles shared by every request. All three share one store and clock.
#[derive(Clone)]
pub struct AppServices {
    pub engine: InvoiceEngine<dyn Storage>,
    pub catalog: Catalog<dyn Storage>,
    pub dashboard: Dashboard<dyn Storage>,
    pub backend: &'static str,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        dashboard_offset: FixedOffset,
        backend: &'static str,
    ) -> Self {
        let engine = InvoiceEngine::new(store.clone(), clock.clone(), settings);
        let catalog = Catalog::new(store, clock);
        let dashboard = Dashboard::new(engine.clone(), dashboard_offset);
        Self {
            engine,
            catalog,
            dashboard,
            backend,
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(settings: EngineSettings, dashboard_offset: FixedOffset) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            settings,
            dashboard_offset,
            "in-memory",
        )
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    match &config.storage {
        StorageBackend::InMemory => {
            info!("using in-memory storage");
            Ok(AppServices::in_memory(config.engine, config.dashboard_offset))
        }
        StorageBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresStore::connect(database_url, *max_connections).await?;
            store.migrate().await?;
            info!(max_connections, "using PostgreSQL storage");
            Ok(AppServices::new(
                Arc::new(store),
                Arc::new(SystemClock),
                config.engine,
                config.dashboard_offset,
                "postgres",
            ))
        }
    }
}

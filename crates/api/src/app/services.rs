use std::sync::Arc;

use sqlx::PgPool;

use applyflow_infra::{
    BatchRunner, BatchStore, InMemoryBatchStore, InMemoryJobCatalog, JobCatalog,
    PostgresBatchStore, PostgresJobCatalog, RunnerConfig, StoreError,
};

use crate::config::{ApiConfig, Persistence};

/// The runner as wired into the API: storage is chosen at startup.
pub type Runner = BatchRunner<Arc<dyn BatchStore>, Arc<dyn JobCatalog>>;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("failed to connect to Postgres: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("failed to apply schema: {0}")]
    Migrate(#[from] StoreError),
}

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        runner: Arc<Runner>,
        catalog: Arc<InMemoryJobCatalog>,
    },
    Persistent {
        runner: Arc<Runner>,
    },
}

impl AppServices {
    /// In-memory wiring (dev/test). Jobs are seeded through [`Self::in_memory_catalog`].
    pub fn in_memory(config: RunnerConfig) -> Self {
        let catalog = InMemoryJobCatalog::arc();
        let store: Arc<dyn BatchStore> = InMemoryBatchStore::arc();
        let runner = BatchRunner::new(store, catalog.clone() as Arc<dyn JobCatalog>, config);
        AppServices::InMemory {
            runner: Arc::new(runner),
            catalog,
        }
    }

    /// Postgres wiring. Applies the bundled schema before returning.
    pub async fn persistent(database_url: &str, config: RunnerConfig) -> Result<Self, ServicesError> {
        let pool = PgPool::connect(database_url).await?;

        let store = PostgresBatchStore::new(pool.clone());
        store.migrate().await?;

        let store: Arc<dyn BatchStore> = Arc::new(store);
        let catalog: Arc<dyn JobCatalog> = Arc::new(PostgresJobCatalog::new(pool));
        Ok(AppServices::Persistent {
            runner: Arc::new(BatchRunner::new(store, catalog, config)),
        })
    }

    pub fn runner(&self) -> &Runner {
        match self {
            AppServices::InMemory { runner, .. } => runner,
            AppServices::Persistent { runner } => runner,
        }
    }

    pub fn in_memory_catalog(&self) -> Option<&Arc<InMemoryJobCatalog>> {
        match self {
            AppServices::InMemory { catalog, .. } => Some(catalog),
            AppServices::Persistent { .. } => None,
        }
    }
}

pub async fn build_services(config: &ApiConfig) -> Result<AppServices, ServicesError> {
    match &config.persistence {
        Persistence::InMemory => {
            tracing::info!("using in-memory batch store");
            Ok(AppServices::in_memory(config.runner.clone()))
        }
        Persistence::Postgres { database_url } => {
            tracing::info!("using Postgres batch store");
            AppServices::persistent(database_url, config.runner.clone()).await
        }
    }
}

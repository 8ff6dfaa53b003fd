//! Infrastructure layer: batch/task storage, the job catalog, and the runner
//! that coordinates them.

pub mod catalog;
pub mod config;
pub mod runner;
pub mod store;

pub use catalog::{CatalogError, InMemoryJobCatalog, JobCatalog, PostgresJobCatalog};
pub use config::RunnerConfig;
pub use runner::{BatchRunner, InvalidState, RunnerError, RunnerResult};
pub use store::{BatchStore, InMemoryBatchStore, PostgresBatchStore, StoreError, UpdateOutcome};

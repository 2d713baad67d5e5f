//! Incremental NBA game ingestion: a spine of known games, per-game fetch ->
//! transform -> idempotent load, and a durable error ledger driving retries
//! across runs.

pub mod config;
pub mod database_ops;
pub mod error;
pub mod fetch;
pub mod model;
pub mod orchestrator;
pub mod shutdown;
pub mod tracing;
pub mod transform;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use config::{IngestConfig, Overrides};
pub use error::{ErrorKind, FetchError, PersistenceError, StageError, ValidationFailure};
pub use orchestrator::{ExitStatus, Orchestrator, RunMode, RunPlan, RunSummary};

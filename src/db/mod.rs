//! Physical layout management on the relational backend
//!
//! The core never owns connections. It talks to the backend through the
//! [`Driver`] seam: autocommit [`Session`]s for background rotation and a
//! [`Transaction`] for the bootstrap pass.

use async_trait::async_trait;

use crate::errors::Result;

mod postgres;
mod rotator;
mod scheduler;
mod schema;


pub use postgres::PgDriver;
pub use rotator::{active_windows, partition_name, retained_windows, stale_partitions, RotationReport, Rotator, Window};
pub use scheduler::{Clock, Scheduler, SchedulerHandle, SchedulerStats};
pub use schema::{shard_table_ddl, BootstrapOutcome, SchemaBootstrapper};

/// Catalog table holding one settings record per bucket.
pub const SETTINGS_TABLE: &str = "cache_settings";

/// Advisory lock serialising bootstrap across instances sharing a database.
pub const SETTINGS_LOCK_ID: i64 = 1001;

/// Statements issued against the backend, either in autocommit mode or
/// inside a transaction.
#[async_trait]
pub trait Session: Send {
    /// Runs a statement that returns no rows (DDL, mostly).
    async fn execute(&mut self, statement: &str) -> Result<()>;

    /// Names of all child tables attached to `parent`.
    async fn child_tables(&mut self, parent: &str) -> Result<Vec<String>>;

    /// Takes the transaction scoped advisory lock `id`, waiting while another
    /// session holds it.
    async fn advisory_lock(&mut self, id: i64) -> Result<()>;

    /// All `(bucket, settings json)` pairs from the settings catalog.
    async fn load_settings(&mut self) -> Result<Vec<(String, String)>>;

    async fn store_settings(&mut self, bucket: &str, settings: &str) -> Result<()>;
}

/// A session whose effects are discarded unless committed. Dropping it
/// without committing rolls it back.
#[async_trait]
pub trait Transaction: Session {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn session(&self) -> Result<Box<dyn Session>>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

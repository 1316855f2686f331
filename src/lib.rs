//! Sharded, time-evicting document cache over PostgreSQL
//!
//! Buckets of cached documents live in `<bucket>_<shard>` tables. Buckets with
//! the `truncate` eviction policy range partition those tables on expiry time
//! and evict by dropping whole partitions as they age out.
//!
//! - [`router`] maps a key to its shard table.
//! - [`db::SchemaBootstrapper`] provisions or validates the layout at startup.
//! - [`db::Rotator`] creates and drops time partitions.
//! - [`db::Scheduler`] keeps rotating them in the background.

pub mod config;
pub mod db;
pub mod errors;
pub mod router;

pub use config::Configuration;
pub use errors::{Error, Result};
pub use router::Router;

//! SQLite backend for Stratum.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. One [`SqliteDatabase`] serves as the
//! installer's connection, and clones of it back the version tracker and the
//! advisory lock.

mod database;
mod lock;
mod schema;
mod tracker;

pub mod error;

pub use database::SqliteDatabase;
pub use error::{Error, Result};
pub use lock::SqliteSchemaLock;
pub use tracker::SqliteVersionTracker;

/// Default name of the version tracking table.
pub const DEFAULT_TRACKER_TABLE: &str = "stratum_schema_versions";

/// Default name of the advisory lock table.
pub const DEFAULT_LOCK_TABLE: &str = "stratum_schema_locks";

#[cfg(test)]
mod tests;

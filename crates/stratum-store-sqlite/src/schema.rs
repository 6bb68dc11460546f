//! DDL for Stratum's own bookkeeping tables.
//!
//! Table names are configurable, so the statements are built per name. Both
//! are idempotent thanks to `CREATE TABLE IF NOT EXISTS`.

use crate::database::quote;

/// One row per component: the highest version fully applied.
pub fn tracker_table(name: &str) -> String {
  format!(
    "CREATE TABLE IF NOT EXISTS {} (
    component   TEXT PRIMARY KEY,
    version     INTEGER NOT NULL,
    checksum    TEXT,               -- sha256 of the last file applied
    updated_at  TEXT NOT NULL       -- ISO 8601 UTC
);",
    quote(name)
  )
}

/// One row per held lock. Rows older than the stale threshold may be taken
/// over by another owner.
pub fn lock_table(name: &str) -> String {
  format!(
    "CREATE TABLE IF NOT EXISTS {} (
    component   TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    acquired_at TEXT NOT NULL       -- ISO 8601 UTC, fixed width
);",
    quote(name)
  )
}

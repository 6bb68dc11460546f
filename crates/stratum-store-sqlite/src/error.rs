//! Error type for `stratum-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// Versions are stored as SQLite `INTEGER`, which is signed.
  #[error("version {0} does not fit in an SQLite integer")]
  VersionOutOfRange(u64),

  #[error("negative version {version} stored for {component}")]
  NegativeVersion { component: String, version: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

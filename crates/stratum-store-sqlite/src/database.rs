//! [`SqliteDatabase`] — the SQLite implementation of [`Connection`].

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use stratum_core::{
  Dialect,
  store::{Connection, DriverError},
};

use crate::{Error, Result};

/// A connection to one SQLite database file.
///
/// Cloning is cheap: the inner connection is reference-counted, and all
/// clones share the same database thread.
#[derive(Clone)]
pub struct SqliteDatabase {
  conn: tokio_rusqlite::Connection,
}

impl SqliteDatabase {
  /// Open (or create) the database at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let db = Self { conn };
    db.init().await?;
    Ok(db)
  }

  /// Open an in-memory database, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let db = Self { conn };
    db.init().await?;
    Ok(db)
  }

  async fn init(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The underlying async connection, for queries outside the installer.
  pub fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  /// Run a batch of statements, returning the rows changed by the last one.
  async fn batch(&self, sql: String) -> std::result::Result<u64, DriverError> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(conn.changes())
      })
      .await
      .map_err(driver_error)
  }
}

impl Connection for SqliteDatabase {
  fn dialect(&self) -> Dialect { Dialect::Sqlite }

  fn quote_identifier(&self, name: &str) -> String { quote(name) }

  async fn execute<'a>(&'a self, sql: &'a str) -> std::result::Result<u64, DriverError> {
    self.batch(sql.to_owned()).await
  }

  async fn begin(&self) -> std::result::Result<(), DriverError> {
    self.batch("BEGIN".to_owned()).await.map(drop)
  }

  async fn commit(&self) -> std::result::Result<(), DriverError> {
    self.batch("COMMIT".to_owned()).await.map(drop)
  }

  async fn rollback(&self) -> std::result::Result<(), DriverError> {
    self.batch("ROLLBACK".to_owned()).await.map(drop)
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Reduce a driver error to its extended result code and message.
fn driver_error(error: tokio_rusqlite::Error) -> DriverError {
  match error {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, message)) => {
      DriverError::with_code(
        code.extended_code.to_string(),
        message.unwrap_or_else(|| code.to_string()),
      )
    }
    other => DriverError::new(other.to_string()),
  }
}

/// Double-quote an identifier, doubling embedded quotes.
pub(crate) fn quote(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

/// Fixed-width so stored timestamps compare correctly as text.
pub(crate) fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

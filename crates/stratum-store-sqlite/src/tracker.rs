//! [`SqliteVersionTracker`] — tracked versions in an SQLite table.

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use stratum_core::{
  ComponentId, Version,
  store::{InstalledVersion, VersionTracker},
};

use crate::{
  DEFAULT_TRACKER_TABLE, Error, Result, SqliteDatabase,
  database::{decode_dt, encode_dt, quote},
  schema,
};

/// Stores one row per component in a dedicated table, separate from the
/// components' own tables.
#[derive(Clone)]
pub struct SqliteVersionTracker {
  db:    SqliteDatabase,
  table: String,
}

impl SqliteVersionTracker {
  /// Use the default table, creating it if needed.
  pub async fn open(db: &SqliteDatabase) -> Result<Self> {
    Self::with_table(db, DEFAULT_TRACKER_TABLE).await
  }

  /// Use `table`, creating it if needed.
  pub async fn with_table(db: &SqliteDatabase, table: impl Into<String>) -> Result<Self> {
    let table = table.into();
    let ddl = schema::tracker_table(&table);
    db.connection()
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(Self {
      db: db.clone(),
      table,
    })
  }

  pub fn table(&self) -> &str { &self.table }
}

impl VersionTracker for SqliteVersionTracker {
  type Error = Error;

  async fn get<'a>(&'a self, component: &'a ComponentId) -> Result<Option<Version>> {
    let sql = format!("SELECT version FROM {} WHERE component = ?1", quote(&self.table));
    let key = component.as_str().to_owned();
    let raw: Option<i64> = self
      .db
      .connection()
      .call(move |conn| {
        let raw = conn
          .query_row(&sql, rusqlite::params![key], |r| r.get(0))
          .optional()?;
        Ok(raw)
      })
      .await?;
    raw.map(|v| decode_version(component.as_str(), v)).transpose()
  }

  async fn advance<'a>(
    &'a self,
    component: &'a ComponentId,
    version: Version,
    checksum: Option<&'a str>,
  ) -> Result<()> {
    let sql = format!(
      "INSERT INTO {} (component, version, checksum, updated_at)
       VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT(component) DO UPDATE SET
         version    = excluded.version,
         checksum   = excluded.checksum,
         updated_at = excluded.updated_at",
      quote(&self.table)
    );
    let key = component.as_str().to_owned();
    let raw = i64::try_from(version.0).map_err(|_| Error::VersionOutOfRange(version.0))?;
    let checksum = checksum.map(str::to_owned);
    let now = encode_dt(Utc::now());
    self
      .db
      .connection()
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![key, raw, checksum, now])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list(&self) -> Result<Vec<InstalledVersion>> {
    let sql = format!(
      "SELECT component, version, checksum, updated_at FROM {} ORDER BY component",
      quote(&self.table)
    );
    let rows = self
      .db
      .connection()
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, i64, Option<String>, String)> = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(component, version, checksum, updated_at)| {
        Ok(InstalledVersion {
          version: decode_version(&component, version)?,
          updated_at: decode_dt(&updated_at)?,
          component: ComponentId::new(component),
          checksum,
        })
      })
      .collect()
  }
}

fn decode_version(component: &str, raw: i64) -> Result<Version> {
  u64::try_from(raw)
    .map(Version)
    .map_err(|_| Error::NegativeVersion {
      component: component.to_owned(),
      version:   raw,
    })
}

//! [`SqliteSchemaLock`] — advisory per-component lock in an SQLite table.

use chrono::{TimeDelta, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use stratum_core::{ComponentId, store::SchemaLock};
use tracing::warn;

use crate::{
  DEFAULT_LOCK_TABLE, Error, Result, SqliteDatabase,
  database::{encode_dt, quote},
  schema,
};

/// A row per held lock. A holder that died without releasing is taken over
/// once its row is older than the stale threshold.
#[derive(Clone)]
pub struct SqliteSchemaLock {
  db:          SqliteDatabase,
  table:       String,
  stale_after: TimeDelta,
}

impl SqliteSchemaLock {
  /// Use the default table, creating it if needed.
  pub async fn open(db: &SqliteDatabase) -> Result<Self> {
    Self::with_table(db, DEFAULT_LOCK_TABLE).await
  }

  /// Use `table`, creating it if needed.
  pub async fn with_table(db: &SqliteDatabase, table: impl Into<String>) -> Result<Self> {
    let table = table.into();
    let ddl = schema::lock_table(&table);
    db.connection()
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(Self {
      db: db.clone(),
      table,
      stale_after: TimeDelta::minutes(10),
    })
  }

  /// Age after which a held lock is considered abandoned. The age counts
  /// from the holder's latest acquire; the installer re-acquires after each
  /// file, so only a single file running longer than this can lose the lock.
  pub fn with_stale_after(mut self, stale_after: TimeDelta) -> Self {
    self.stale_after = stale_after;
    self
  }

  pub fn table(&self) -> &str { &self.table }
}

impl SchemaLock for SqliteSchemaLock {
  type Error = Error;

  async fn try_acquire<'a>(&'a self, component: &'a ComponentId, owner: &'a str) -> Result<bool> {
    let table = quote(&self.table);
    let key = component.as_str().to_owned();
    let owner = owner.to_owned();
    let now = Utc::now();
    let acquired_at = encode_dt(now);
    let cutoff = now.checked_sub_signed(self.stale_after).map(encode_dt);

    let (acquired, stale_owner) = self
      .db
      .connection()
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let held: Option<(String, String)> = tx
          .query_row(
            &format!("SELECT owner, acquired_at FROM {table} WHERE component = ?1"),
            rusqlite::params![key],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let mut stale_owner = None;
        match held {
          Some((holder, _)) if holder == owner => {}
          Some((holder, since)) => {
            if !cutoff.as_ref().is_some_and(|cutoff| since < *cutoff) {
              return Ok((false, None));
            }
            stale_owner = Some(holder);
          }
          None => {}
        }

        tx.execute(
          &format!(
            "INSERT INTO {table} (component, owner, acquired_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(component) DO UPDATE SET
               owner       = excluded.owner,
               acquired_at = excluded.acquired_at"
          ),
          rusqlite::params![key, owner, acquired_at],
        )?;
        tx.commit()?;
        Ok((true, stale_owner))
      })
      .await?;

    if let Some(stale) = stale_owner {
      warn!(component = %component, %stale, "took over stale schema lock");
    }
    Ok(acquired)
  }

  async fn release<'a>(&'a self, component: &'a ComponentId, owner: &'a str) -> Result<()> {
    let sql = format!(
      "DELETE FROM {} WHERE component = ?1 AND owner = ?2",
      quote(&self.table)
    );
    let key = component.as_str().to_owned();
    let owner = owner.to_owned();
    self
      .db
      .connection()
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![key, owner])?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

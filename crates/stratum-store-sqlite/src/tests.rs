//! Integration tests for the SQLite backend against in-memory databases.

use std::{fs, path::Path};

use chrono::TimeDelta;
use stratum_core::{
  ComponentId, Dialect, InstallError, Installer, InstallerOptions, Version,
  locate::SchemaLocator,
  store::{Connection, SchemaLock, VersionTracker},
};

use crate::{SqliteDatabase, SqliteSchemaLock, SqliteVersionTracker};

async fn db() -> SqliteDatabase {
  SqliteDatabase::open_in_memory()
    .await
    .expect("in-memory database")
}

fn write(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, content).unwrap();
}

async fn columns(db: &SqliteDatabase, table: &str) -> Vec<String> {
  let sql = format!("PRAGMA table_info({table})");
  db.connection()
    .call(move |conn| {
      let mut stmt = conn.prepare(&sql)?;
      let names = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(names)
    })
    .await
    .unwrap()
}

async fn table_exists(db: &SqliteDatabase, table: &str) -> bool {
  let table = table.to_owned();
  db.connection()
    .call(move |conn| {
      let n: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![table],
        |r| r.get(0),
      )?;
      Ok(n > 0)
    })
    .await
    .unwrap()
}

async fn installer(
  root: &Path,
  db: &SqliteDatabase,
) -> Installer<SqliteDatabase, SqliteVersionTracker> {
  let tracker = SqliteVersionTracker::open(db).await.unwrap();
  Installer::new(SchemaLocator::new(root), db.clone(), tracker).with_options(InstallerOptions {
    cache_versions: false,
    ..InstallerOptions::default()
  })
}

fn widgets_tree(root: &Path) {
  write(root, "widgets/generic/install.sql", "create table widgets(id int, name text);");
  write(root, "widgets/generic/1.sql", "alter table widgets add column price int;");
}

// ─── Connection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_reports_changes_and_errors() {
  let db = db().await;
  assert_eq!(db.dialect(), Dialect::Sqlite);

  db.execute("create table t (id int)").await.unwrap();
  let rows = db.execute("insert into t values (1), (2)").await.unwrap();
  assert_eq!(rows, 2);

  let err = db.execute("create table t (id int)").await.unwrap_err();
  assert!(err.code.is_some());
  assert!(err.message.contains("already exists"), "{err}");
}

#[tokio::test]
async fn rollback_discards_statements() {
  let db = db().await;
  db.execute("create table t (id int)").await.unwrap();
  db.begin().await.unwrap();
  db.execute("insert into t values (1)").await.unwrap();
  db.rollback().await.unwrap();

  let count: i64 = db
    .connection()
    .call(|conn| Ok(conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(count, 0);
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tracker_round_trip() {
  let db = db().await;
  let tracker = SqliteVersionTracker::open(&db).await.unwrap();
  let widgets = ComponentId::new("widgets");

  assert_eq!(tracker.get(&widgets).await.unwrap(), None);

  tracker.advance(&widgets, Version::BASELINE, None).await.unwrap();
  assert_eq!(tracker.get(&widgets).await.unwrap(), Some(Version::BASELINE));

  tracker.advance(&widgets, Version(3), Some("abc")).await.unwrap();
  tracker.advance(&"gadgets".into(), Version(1), None).await.unwrap();

  let rows = tracker.list().await.unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].component.as_str(), "gadgets");
  assert_eq!(rows[1].version, Version(3));
  assert_eq!(rows[1].checksum.as_deref(), Some("abc"));
}

#[tokio::test]
async fn tracker_rejects_unrepresentable_versions() {
  let db = db().await;
  let tracker = SqliteVersionTracker::open(&db).await.unwrap();
  let err = tracker
    .advance(&"big".into(), Version(u64::MAX), None)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::VersionOutOfRange(_)));
}

#[tokio::test]
async fn tracker_table_is_configurable() {
  let db = db().await;
  let tracker = SqliteVersionTracker::with_table(&db, "jos_schemas").await.unwrap();
  tracker.advance(&"a".into(), Version(1), None).await.unwrap();
  assert_eq!(tracker.table(), "jos_schemas");
  assert!(table_exists(&db, "jos_schemas").await);
  assert!(!table_exists(&db, crate::DEFAULT_TRACKER_TABLE).await);
}

// ─── Lock ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lock_excludes_other_owners() {
  let db = db().await;
  let lock = SqliteSchemaLock::open(&db).await.unwrap();
  let widgets = ComponentId::new("widgets");

  assert!(lock.try_acquire(&widgets, "one").await.unwrap());
  assert!(lock.try_acquire(&widgets, "one").await.unwrap());
  assert!(!lock.try_acquire(&widgets, "two").await.unwrap());
  assert!(lock.try_acquire(&"other".into(), "two").await.unwrap());

  // Releasing someone else's lock is a no-op.
  lock.release(&widgets, "two").await.unwrap();
  assert!(!lock.try_acquire(&widgets, "two").await.unwrap());

  lock.release(&widgets, "one").await.unwrap();
  assert!(lock.try_acquire(&widgets, "two").await.unwrap());
}

#[tokio::test]
async fn stale_lock_is_taken_over() {
  let db = db().await;
  let lock = SqliteSchemaLock::open(&db)
    .await
    .unwrap()
    .with_stale_after(TimeDelta::zero());
  let widgets = ComponentId::new("widgets");

  assert!(lock.try_acquire(&widgets, "crashed").await.unwrap());
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  assert!(lock.try_acquire(&widgets, "fresh").await.unwrap());

  let lock = lock.with_stale_after(TimeDelta::minutes(10));
  assert!(!lock.try_acquire(&widgets, "crashed").await.unwrap());
}

#[tokio::test]
async fn reacquiring_refreshes_lock_age() {
  let db = db().await;
  let lock = SqliteSchemaLock::open(&db)
    .await
    .unwrap()
    .with_stale_after(TimeDelta::milliseconds(400));
  let widgets = ComponentId::new("widgets");

  assert!(lock.try_acquire(&widgets, "long-run").await.unwrap());
  tokio::time::sleep(std::time::Duration::from_millis(250)).await;
  assert!(lock.try_acquire(&widgets, "long-run").await.unwrap());
  tokio::time::sleep(std::time::Duration::from_millis(250)).await;

  // Older than the threshold since the first acquire, but not since the last.
  assert!(!lock.try_acquire(&widgets, "other").await.unwrap());
}

// ─── Installer on SQLite ─────────────────────────────────────────────────────

#[tokio::test]
async fn installs_baseline_and_update() {
  let tmp = tempfile::tempdir().unwrap();
  widgets_tree(tmp.path());
  let db = db().await;
  let installer = installer(tmp.path(), &db).await;

  let report = installer.update_schema(&"widgets".into()).await.unwrap();
  assert!(report.baseline_applied);
  assert_eq!(report.version, Some(Version(1)));
  assert_eq!(columns(&db, "widgets").await, vec!["id", "name", "price"]);
  assert_eq!(
    installer.tracker().get(&"widgets".into()).await.unwrap(),
    Some(Version(1))
  );

  let again = installer.update_schema(&"widgets".into()).await.unwrap();
  assert!(again.is_noop());
  assert_eq!(again.applied_count(), 0);
}

#[tokio::test]
async fn duplicate_column_is_benign() {
  let tmp = tempfile::tempdir().unwrap();
  widgets_tree(tmp.path());
  let db = db().await;
  // Someone already added the column by hand.
  db.execute("create table widgets(id int, name text, price int)").await.unwrap();
  let installer = installer(tmp.path(), &db).await;

  let report = installer.update_schema(&"widgets".into()).await.unwrap();
  assert_eq!(report.applied, 0);
  assert_eq!(report.benign, 2);
  assert_eq!(report.version, Some(Version(1)));
}

#[tokio::test]
async fn fatal_error_halts_at_last_complete_file() {
  let tmp = tempfile::tempdir().unwrap();
  widgets_tree(tmp.path());
  write(
    tmp.path(),
    "widgets/generic/2.sql",
    "create table parts (id int);\ninsert into missing values (1);\ncreate table later (id int);",
  );
  let db = db().await;
  let installer = installer(tmp.path(), &db).await;

  let err = installer.update_schema(&"widgets".into()).await.unwrap_err();
  assert_eq!(err.halted_at(), Some(Version(1)));
  let InstallError::Execution { failure, .. } = &err else {
    panic!("expected execution failure, got {err}");
  };
  assert!(failure.error.message.contains("no such table"));
  assert_eq!(failure.statement.line, 2);
  assert!(table_exists(&db, "parts").await);
  assert!(!table_exists(&db, "later").await);
  assert_eq!(
    installer.tracker().get(&"widgets".into()).await.unwrap(),
    Some(Version(1))
  );
}

#[tokio::test]
async fn transactional_file_rolls_back() {
  let tmp = tempfile::tempdir().unwrap();
  widgets_tree(tmp.path());
  write(
    tmp.path(),
    "widgets/generic/2.sql",
    "create table parts (id int);\ninsert into missing values (1);",
  );
  let db = db().await;
  let tracker = SqliteVersionTracker::open(&db).await.unwrap();
  let installer = Installer::new(SchemaLocator::new(tmp.path()), db.clone(), tracker)
    .with_options(InstallerOptions {
      transactional: true,
      ..InstallerOptions::default()
    });

  installer.update_schema(&"widgets".into()).await.unwrap_err();
  assert!(!table_exists(&db, "parts").await);
  assert_eq!(columns(&db, "widgets").await, vec!["id", "name", "price"]);
}

#[tokio::test]
async fn failed_commit_leaves_connection_usable() {
  let tmp = tempfile::tempdir().unwrap();
  write(
    tmp.path(),
    "orders/generic/install.sql",
    "create table parent (id integer primary key);
     create table child (
       id        int,
       parent_id int references parent(id) deferrable initially deferred
     );",
  );
  write(tmp.path(), "orders/generic/1.sql", "insert into child values (1, 99);");
  let db = db().await;
  let tracker = SqliteVersionTracker::open(&db).await.unwrap();
  let installer = Installer::new(SchemaLocator::new(tmp.path()), db.clone(), tracker)
    .with_options(InstallerOptions {
      transactional: true,
      ..InstallerOptions::default()
    });

  // The orphan row is only rejected when the transaction commits.
  let err = installer.update_schema(&"orders".into()).await.unwrap_err();
  assert_eq!(err.halted_at(), Some(Version::BASELINE));
  assert!(err.to_string().contains("COMMIT"), "{err}");

  let autocommit = db
    .connection()
    .call(|conn| Ok(conn.is_autocommit()))
    .await
    .unwrap();
  assert!(autocommit);

  write(
    tmp.path(),
    "orders/generic/1.sql",
    "insert into parent values (99);\ninsert into child values (1, 99);",
  );
  let report = installer.update_schema(&"orders".into()).await.unwrap();
  assert_eq!(report.version, Some(Version(1)));
}

#[tokio::test]
async fn sqlite_directory_and_triggers() {
  let tmp = tempfile::tempdir().unwrap();
  write(tmp.path(), "audit/generic/install.sql", "create table never (id int);");
  write(
    tmp.path(),
    "audit/sqlite/install.sql",
    "create table items (id int, touched int default 0);
     create trigger items_touch after insert on items
     begin
       update items set touched = 1 where id = new.id;
     end;
     insert into items (id) values (7);",
  );
  let db = db().await;
  let installer = installer(tmp.path(), &db).await;

  let report = installer.update_schema(&"audit".into()).await.unwrap();
  assert_eq!(report.dialect, Some(Dialect::Sqlite));
  assert_eq!(report.applied, 3);
  assert!(!table_exists(&db, "never").await);

  let touched: i64 = db
    .connection()
    .call(|conn| Ok(conn.query_row("SELECT touched FROM items WHERE id = 7", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(touched, 1);
}

#[tokio::test]
async fn locked_installer_releases_after_run() {
  let tmp = tempfile::tempdir().unwrap();
  widgets_tree(tmp.path());
  let db = db().await;
  let lock = SqliteSchemaLock::open(&db).await.unwrap();
  let installer = installer(tmp.path(), &db).await.with_lock(lock.clone());

  installer.update_schema(&"widgets".into()).await.unwrap();
  // Released: a new owner gets it immediately.
  assert!(lock.try_acquire(&"widgets".into(), "someone").await.unwrap());
}

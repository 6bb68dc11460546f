//! Collaborator traits consumed by the installer.
//!
//! Backends (e.g. `stratum-store-sqlite`) implement these. The installer only
//! ever talks to a database through them, one awaited call at a time.

use std::{convert::Infallible, fmt, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::{
  dialect::Dialect,
  schema::{ComponentId, Version},
};

// ─── Driver errors ───────────────────────────────────────────────────────────

/// A database error reduced to what classification needs: the driver's
/// error code (SQLSTATE, vendor number, extended result code) and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
  pub code:    Option<String>,
  pub message: String,
}

impl DriverError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      code:    None,
      message: message.into(),
    }
  }

  pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      code:    Some(code.into()),
      message: message.into(),
    }
  }
}

impl fmt::Display for DriverError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.code {
      Some(code) => write!(f, "[{code}] {}", self.message),
      None => f.write_str(&self.message),
    }
  }
}

impl std::error::Error for DriverError {}

// ─── Connection ──────────────────────────────────────────────────────────────

/// The active database connection.
pub trait Connection: Send + Sync {
  /// Dialect of the connected engine; selects schema directories, lexical
  /// rules and error classification.
  fn dialect(&self) -> Dialect;

  /// Quote `name` as an identifier for this engine.
  fn quote_identifier(&self, name: &str) -> String;

  /// Execute one statement, returning the number of rows it changed.
  fn execute<'a>(
    &'a self,
    sql: &'a str,
  ) -> impl Future<Output = Result<u64, DriverError>> + Send + 'a;

  fn begin(&self) -> impl Future<Output = Result<(), DriverError>> + Send + '_ {
    async { Ok(()) }
  }

  fn commit(&self) -> impl Future<Output = Result<(), DriverError>> + Send + '_ {
    async { Ok(()) }
  }

  fn rollback(&self) -> impl Future<Output = Result<(), DriverError>> + Send + '_ {
    async { Ok(()) }
  }
}

// ─── Version tracker ─────────────────────────────────────────────────────────

/// One tracked row: the highest version fully applied for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
  pub component:  ComponentId,
  pub version:    Version,
  /// Checksum of the last file applied. Informational only.
  pub checksum:   Option<String>,
  pub updated_at: DateTime<Utc>,
}

/// Persistent record of applied versions, stored outside the components'
/// own tables.
pub trait VersionTracker: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Tracked version for `component`; `None` means the baseline is not
  /// installed.
  fn get<'a>(
    &'a self,
    component: &'a ComponentId,
  ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a;

  /// Set the tracked version unconditionally, creating the row if absent.
  fn advance<'a>(
    &'a self,
    component: &'a ComponentId,
    version: Version,
    checksum: Option<&'a str>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// All tracked rows, ordered by component.
  fn list(
    &self,
  ) -> impl Future<Output = Result<Vec<InstalledVersion>, Self::Error>> + Send + '_;
}

// ─── Advisory lock ───────────────────────────────────────────────────────────

/// Advisory lock keyed by component, held for a whole `update_schema` run.
pub trait SchemaLock: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Try to take the lock for `owner`. Returns `false` if someone else
  /// holds it. Re-acquiring a lock already held by `owner` succeeds and
  /// renews it; the installer does so after every file.
  fn try_acquire<'a>(
    &'a self,
    component: &'a ComponentId,
    owner: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Release the lock if `owner` holds it.
  fn release<'a>(
    &'a self,
    component: &'a ComponentId,
    owner: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// No locking: concurrent runs rely on benign-failure classification alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLock;

impl SchemaLock for NoLock {
  type Error = Infallible;

  async fn try_acquire<'a>(
    &'a self,
    _component: &'a ComponentId,
    _owner: &'a str,
  ) -> Result<bool, Infallible> {
    Ok(true)
  }

  async fn release<'a>(
    &'a self,
    _component: &'a ComponentId,
    _owner: &'a str,
  ) -> Result<(), Infallible> {
    Ok(())
  }
}

/// `None` behaves like [`NoLock`], so locking can be switched at runtime.
impl<L: SchemaLock> SchemaLock for Option<L> {
  type Error = L::Error;

  async fn try_acquire<'a>(
    &'a self,
    component: &'a ComponentId,
    owner: &'a str,
  ) -> Result<bool, L::Error> {
    match self {
      Some(lock) => lock.try_acquire(component, owner).await,
      None => Ok(true),
    }
  }

  async fn release<'a>(
    &'a self,
    component: &'a ComponentId,
    owner: &'a str,
  ) -> Result<(), L::Error> {
    match self {
      Some(lock) => lock.release(component, owner).await,
      None => Ok(()),
    }
  }
}

//! Error types for `stratum-core`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
  dialect::Dialect,
  execute::FatalFailure,
  schema::{ComponentId, Version},
};

// ─── Locating ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LocateError {
  /// Neither a dialect-specific nor the generic directory exists. Callers
  /// treat this as "nothing to install".
  #[error("no schema source for {component} ({dialect})")]
  NotFound { component: ComponentId, dialect: Dialect },

  #[error("malformed schema file name {}: {reason}", .path.display())]
  MalformedName { path: PathBuf, reason: String },

  #[error("invalid component identifier: {0:?}")]
  InvalidComponent(String),

  #[error("cannot read {}: {source}", .path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },
}

// ─── Splitting ───────────────────────────────────────────────────────────────

/// The construct left open at end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unterminated {
  SingleQuote,
  DoubleQuote,
  Backtick,
  Bracket,
  BlockComment,
  DollarQuote,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unterminated {kind:?} at {}:{line} (byte {offset})", .file.display())]
pub struct ParseError {
  pub file:   Arc<std::path::Path>,
  pub offset: usize,
  pub line:   usize,
  pub kind:   Unterminated,
}

// ─── Installing ──────────────────────────────────────────────────────────────

/// Aggregated error returned by [`Installer::update_schema`](crate::Installer::update_schema).
///
/// `halted_at` is the last version the tracker holds for the component after
/// the run; `None` means the baseline is still not installed.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("{component}: schema source unusable ({}): {source}", halt(.halted_at))]
  Source {
    component: ComponentId,
    halted_at: Option<Version>,
    #[source]
    source:    LocateError,
  },

  #[error("{component}: cannot split schema file ({}): {source}", halt(.halted_at))]
  Parse {
    component: ComponentId,
    halted_at: Option<Version>,
    #[source]
    source:    ParseError,
  },

  #[error("{component}: {failure} ({})", halt(.halted_at))]
  Execution {
    component: ComponentId,
    halted_at: Option<Version>,
    #[source]
    failure:   FatalFailure,
  },

  #[error("{component}: version tracker error: {source}")]
  Tracker {
    component: ComponentId,
    #[source]
    source:    Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("{component}: schema lock error: {source}")]
  Lock {
    component: ComponentId,
    #[source]
    source:    Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("{component}: schema lock still held after {waited:?}")]
  LockTimeout { component: ComponentId, waited: Duration },

  /// Another owner took the lock over between two files.
  #[error("{component}: schema lock taken over by another owner ({})", halt(.halted_at))]
  LockLost {
    component: ComponentId,
    halted_at: Option<Version>,
  },
}

impl InstallError {
  pub fn component(&self) -> &ComponentId {
    match self {
      Self::Source { component, .. }
      | Self::Parse { component, .. }
      | Self::Execution { component, .. }
      | Self::Tracker { component, .. }
      | Self::Lock { component, .. }
      | Self::LockTimeout { component, .. }
      | Self::LockLost { component, .. } => component,
    }
  }

  /// Version the component was left at, when the run got far enough to know.
  pub fn halted_at(&self) -> Option<Version> {
    match self {
      Self::Source { halted_at, .. }
      | Self::Parse { halted_at, .. }
      | Self::Execution { halted_at, .. }
      | Self::LockLost { halted_at, .. } => *halted_at,
      _ => None,
    }
  }
}

fn halt(version: &Option<Version>) -> String {
  match version {
    Some(v) => format!("halted at version {v}"),
    None => "baseline not installed".to_owned(),
  }
}

pub type Result<T, E = InstallError> = std::result::Result<T, E>;

//! Schema sources and the statements split out of them.
//!
//! [`SchemaEntry`] is what the locator finds on disk; [`SchemaFile`] is an
//! entry whose content has been read. Both are rebuilt on every installer
//! invocation because schema files may change between deployments.

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{dialect::Dialect, error::LocateError};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Identifier of a component; also the name of its schema directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ComponentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ComponentId {
  fn from(id: &str) -> Self { Self::new(id) }
}

impl From<String> for ComponentId {
  fn from(id: String) -> Self { Self(id) }
}

/// A migration version. Version 0 marks an installed baseline.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
  pub const BASELINE: Self = Self(0);

  /// The version that must follow this one, or `None` on overflow.
  pub fn next(self) -> Option<Self> { self.0.checked_add(1).map(Self) }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

// ─── Schema files ────────────────────────────────────────────────────────────

/// Whether a file creates the component from scratch or evolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum SchemaKind {
  Baseline,
  Update(Version),
}

impl SchemaKind {
  /// Update version, `None` for the baseline.
  pub fn version(self) -> Option<Version> {
    match self {
      Self::Baseline => None,
      Self::Update(v) => Some(v),
    }
  }

  /// The version recorded once a file of this kind has been applied.
  pub fn tracked_version(self) -> Version { self.version().unwrap_or(Version::BASELINE) }
}

/// A schema file found by the locator, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
  pub component: ComponentId,
  /// Dialect of the directory the file came from (`Generic` for the fallback).
  pub dialect:   Dialect,
  pub kind:      SchemaKind,
  pub path:      PathBuf,
}

impl SchemaEntry {
  /// Read the file's content.
  pub async fn load(&self) -> Result<SchemaFile, LocateError> {
    let content = tokio::fs::read_to_string(&self.path)
      .await
      .map_err(|source| LocateError::Io {
        path: self.path.clone(),
        source,
      })?;
    Ok(SchemaFile::new(
      self.component.clone(),
      self.dialect,
      self.kind,
      self.path.clone(),
      content,
    ))
  }
}

/// A schema file with its content; immutable once read.
#[derive(Debug, Clone)]
pub struct SchemaFile {
  pub component: ComponentId,
  pub dialect:   Dialect,
  pub kind:      SchemaKind,
  pub path:      Arc<Path>,
  pub content:   String,
  /// Lowercase hex SHA-256 of `content`.
  pub checksum:  String,
}

impl SchemaFile {
  pub fn new(
    component: ComponentId,
    dialect: Dialect,
    kind: SchemaKind,
    path: impl Into<PathBuf>,
    content: String,
  ) -> Self {
    let checksum = hex::encode(Sha256::digest(content.as_bytes()));
    Self {
      component,
      dialect,
      kind,
      path: Arc::from(path.into()),
      content,
      checksum,
    }
  }
}

// ─── Statements ──────────────────────────────────────────────────────────────

/// One executable statement with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
  /// Statement text, comments stripped and without the terminator.
  pub text:          String,
  pub origin_file:   Arc<Path>,
  /// Byte offset of the statement's first significant character.
  pub origin_offset: usize,
  /// 1-based line of `origin_offset`.
  pub line:          usize,
  /// Set by a `@can-fail` marker comment; any execution error is benign.
  pub can_fail:      bool,
}

impl fmt::Display for Statement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: {}", self.origin_file.display(), self.line, self.text)
  }
}

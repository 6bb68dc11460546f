//! Schema file locator.
//!
//! Layout under the schema root:
//!
//! ```text
//! <root>/<component>/<dialect-dir>/install.sql      baseline
//! <root>/<component>/<dialect-dir>/1-initial.sql    update, version 1
//! <root>/<component>/<dialect-dir>/002_prices.sql   update, version 2
//! <root>/<component>/generic/...                    fallback for all dialects
//! ```
//!
//! The first existing directory in [`resolution_order`] wins; files are never
//! merged across directories.

use std::{
  collections::BTreeMap,
  io::ErrorKind,
  path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
  dialect::Dialect,
  error::LocateError,
  schema::{ComponentId, SchemaEntry, SchemaKind, Version},
};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocatorOptions {
  /// Directory shared by all dialects.
  pub generic_dir:   String,
  /// File stem of the baseline file.
  pub baseline_name: String,
  /// Extension of schema files; other files are ignored.
  pub extension:     String,
}

impl Default for LocatorOptions {
  fn default() -> Self {
    Self {
      generic_dir:   "generic".to_owned(),
      baseline_name: "install".to_owned(),
      extension:     "sql".to_owned(),
    }
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// A file that was found but left out of the update sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocateWarning {
  pub path:   PathBuf,
  pub reason: String,
}

impl LocateWarning {
  pub fn into_error(self) -> LocateError {
    LocateError::MalformedName {
      path:   self.path,
      reason: self.reason,
    }
  }
}

/// The schema files of one component for one dialect.
#[derive(Debug, Clone)]
pub struct SchemaSet {
  pub component: ComponentId,
  /// Dialect of the directory that was used.
  pub dialect:   Dialect,
  pub directory: PathBuf,
  pub baseline:  Option<SchemaEntry>,
  /// Strictly increasing by version.
  pub updates:   Vec<SchemaEntry>,
  pub warnings:  Vec<LocateWarning>,
}

// ─── Pure helpers ────────────────────────────────────────────────────────────

/// Directories to try for `dialect`, most specific first, paired with the
/// dialect the files in each are written for.
pub fn resolution_order(dialect: Dialect, generic_dir: &str) -> Vec<(&str, Dialect)> {
  dialect
    .directory_names()
    .iter()
    .map(|name| (*name, dialect))
    .chain(std::iter::once((generic_dir, Dialect::Generic)))
    .collect()
}

/// Classify a file name. `Ok(None)` means the file is not a schema file.
pub fn classify_file_name(
  file_name: &str,
  options: &LocatorOptions,
) -> Result<Option<SchemaKind>, String> {
  let Some((stem, ext)) = file_name.rsplit_once('.') else {
    return Ok(None);
  };
  if !ext.eq_ignore_ascii_case(&options.extension) || stem.is_empty() {
    return Ok(None);
  }
  if stem == options.baseline_name {
    return Ok(Some(SchemaKind::Baseline));
  }
  parse_version_token(stem).map(|v| Some(SchemaKind::Update(v)))
}

/// The first run of ASCII digits in `stem`, as a version.
pub fn parse_version_token(stem: &str) -> Result<Version, String> {
  let start = stem
    .find(|c: char| c.is_ascii_digit())
    .ok_or_else(|| "no version number in file name".to_owned())?;
  let digits = &stem[start..];
  let len = digits
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(digits.len());
  let version: u64 = digits[..len]
    .parse()
    .map_err(|_| format!("version number {:?} out of range", &digits[..len]))?;
  if version == 0 {
    return Err("version 0 is reserved for the baseline".to_owned());
  }
  Ok(Version(version))
}

fn validate_component(component: &ComponentId) -> Result<(), LocateError> {
  let id = component.as_str();
  let bad = id.is_empty()
    || id == "."
    || id == ".."
    || id.contains(['/', '\\'])
    || Path::new(id).is_absolute();
  if bad {
    return Err(LocateError::InvalidComponent(id.to_owned()));
  }
  Ok(())
}

// ─── Locator ─────────────────────────────────────────────────────────────────

/// Finds schema files on the filesystem. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct SchemaLocator {
  root:    PathBuf,
  options: LocatorOptions,
}

impl SchemaLocator {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root:    root.into(),
      options: LocatorOptions::default(),
    }
  }

  pub fn with_options(mut self, options: LocatorOptions) -> Self {
    self.options = options;
    self
  }

  pub fn root(&self) -> &Path { &self.root }

  pub fn options(&self) -> &LocatorOptions { &self.options }

  /// Resolve the schema files of `component` for `dialect`.
  pub async fn locate(
    &self,
    component: &ComponentId,
    dialect: Dialect,
  ) -> Result<SchemaSet, LocateError> {
    validate_component(component)?;
    let base = self.root.join(component.as_str());

    for (name, source_dialect) in resolution_order(dialect, &self.options.generic_dir) {
      let dir = base.join(name);
      match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => {
          debug!(directory = %dir.display(), "resolved schema directory");
          return self.scan(component, source_dialect, dir).await;
        }
        Ok(_) => continue,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(source) => return Err(LocateError::Io { path: dir, source }),
      }
    }

    Err(LocateError::NotFound {
      component: component.clone(),
      dialect,
    })
  }

  /// Component directories present under the root, sorted.
  pub async fn components(&self) -> Result<Vec<ComponentId>, LocateError> {
    let io = |source: std::io::Error| LocateError::Io {
      path: self.root.clone(),
      source,
    };
    let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io)?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
      let name = entry.file_name();
      if entry.file_type().await.map_err(io)?.is_dir()
        && let Some(name) = name.to_str()
        && !name.starts_with('.')
      {
        out.push(ComponentId::new(name));
      }
    }
    out.sort();
    Ok(out)
  }

  async fn scan(
    &self,
    component: &ComponentId,
    dialect: Dialect,
    dir: PathBuf,
  ) -> Result<SchemaSet, LocateError> {
    let io = |source: std::io::Error| LocateError::Io {
      path: dir.clone(),
      source,
    };

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut warnings = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(io)?;
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
      if !entry.file_type().await.map_err(io)?.is_file() {
        continue;
      }
      let path = entry.path();
      match entry.file_name().into_string() {
        Ok(name) => files.push((name, path)),
        Err(_) => warnings.push(LocateWarning {
          path,
          reason: "file name is not valid UTF-8".to_owned(),
        }),
      }
    }
    // Lexical order decides which of two same-version files wins.
    files.sort();

    let mut baseline = None;
    let mut updates: BTreeMap<Version, SchemaEntry> = BTreeMap::new();
    for (name, path) in files {
      let kind = match classify_file_name(&name, &self.options) {
        Ok(Some(kind)) => kind,
        Ok(None) => continue,
        Err(reason) => {
          warnings.push(LocateWarning { path, reason });
          continue;
        }
      };
      let entry = SchemaEntry {
        component: component.clone(),
        dialect,
        kind,
        path,
      };
      match kind {
        SchemaKind::Baseline => baseline = Some(entry),
        SchemaKind::Update(version) => {
          if let Some(first) = updates.get(&version) {
            warnings.push(LocateWarning {
              reason: format!(
                "duplicate version {version}; {} is used",
                first.path.display()
              ),
              path:   entry.path,
            });
          } else {
            updates.insert(version, entry);
          }
        }
      }
    }

    for w in &warnings {
      warn!(component = %component, path = %w.path.display(), reason = %w.reason, "skipping schema file");
    }

    Ok(SchemaSet {
      component: component.clone(),
      dialect,
      directory: dir,
      baseline,
      updates: updates.into_values().collect(),
      warnings,
    })
  }
}

//! `stratum.toml` settings, overlaid with `STRATUM_*` environment variables.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::Deserialize;
use stratum_core::{
  Dialect, InstallerOptions,
  classify::{BenignRules, BenignTable},
  locate::LocatorOptions,
};
use stratum_store_sqlite::{DEFAULT_LOCK_TABLE, DEFAULT_TRACKER_TABLE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
  /// SQLite database file.
  pub database:          PathBuf,
  /// Directory holding one subdirectory per component.
  pub schema_root:       PathBuf,
  /// Substituted for `#__` in statements.
  pub table_prefix:      String,
  pub tracker_table:     String,
  pub lock_table:        String,
  pub generic_dir:       String,
  pub baseline_name:     String,
  pub use_lock:          bool,
  pub lock_timeout_secs: u64,
  pub lock_stale_secs:   u64,
  pub transactional:     bool,
  pub cache_versions:    bool,
  pub benign_errors:     BenignConfig,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      database:          PathBuf::from("stratum.db"),
      schema_root:       PathBuf::from("schema"),
      table_prefix:      String::new(),
      tracker_table:     DEFAULT_TRACKER_TABLE.to_owned(),
      lock_table:        DEFAULT_LOCK_TABLE.to_owned(),
      generic_dir:       "generic".to_owned(),
      baseline_name:     "install".to_owned(),
      use_lock:          true,
      lock_timeout_secs: 30,
      lock_stale_secs:   600,
      transactional:     false,
      cache_versions:    true,
      benign_errors:     BenignConfig::default(),
    }
  }
}

/// Extra benign-error rules, keyed by dialect name.
///
/// ```toml
/// [benign_errors.rules.mysql]
/// codes = ["1091"]
/// patterns = ["can't drop"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BenignConfig {
  /// Start from an empty table instead of the built-in rules.
  pub replace_defaults: bool,
  pub rules:            HashMap<Dialect, BenignRules>,
}

impl CliConfig {
  pub fn installer_options(&self) -> InstallerOptions {
    InstallerOptions {
      table_prefix: self.table_prefix.clone(),
      cache_versions: self.cache_versions,
      transactional: self.transactional,
      lock_timeout: Duration::from_secs(self.lock_timeout_secs),
      ..InstallerOptions::default()
    }
  }

  pub fn locator_options(&self) -> LocatorOptions {
    LocatorOptions {
      generic_dir: self.generic_dir.clone(),
      baseline_name: self.baseline_name.clone(),
      ..LocatorOptions::default()
    }
  }

  pub fn benign_table(&self) -> BenignTable {
    let mut table = if self.benign_errors.replace_defaults {
      BenignTable::empty()
    } else {
      BenignTable::builtin()
    };
    for (dialect, rules) in &self.benign_errors.rules {
      table.extend(*dialect, rules.clone());
    }
    table
  }
}

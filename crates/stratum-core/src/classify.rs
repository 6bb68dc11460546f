//! Benign-failure classification.
//!
//! An execution error is benign when it says the statement's intended effect
//! is already present (table, column, index or other object exists). The
//! rules are data, per dialect, so drivers with unlisted codes or messages can
//! be covered from configuration without code changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{dialect::Dialect, store::DriverError};

/// Codes and message fragments that mark an error as benign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenignRules {
  /// Exact driver error codes (SQLSTATE, vendor number, ...).
  #[serde(default)]
  pub codes:    Vec<String>,
  /// Case-insensitive substrings of the driver message.
  #[serde(default)]
  pub patterns: Vec<String>,
}

impl BenignRules {
  pub fn new<C, P>(codes: C, patterns: P) -> Self
  where
    C: IntoIterator,
    C::Item: Into<String>,
    P: IntoIterator,
    P::Item: Into<String>,
  {
    Self {
      codes:    codes.into_iter().map(Into::into).collect(),
      patterns: patterns.into_iter().map(Into::into).collect(),
    }
  }

  pub fn matches(&self, error: &DriverError) -> bool {
    if let Some(code) = &error.code
      && self.codes.iter().any(|c| c == code)
    {
      return true;
    }
    let message = error.message.to_lowercase();
    self
      .patterns
      .iter()
      .any(|p| message.contains(&p.to_lowercase()))
  }

  pub fn extend(&mut self, other: BenignRules) {
    self.codes.extend(other.codes);
    self.patterns.extend(other.patterns);
  }

  pub fn is_empty(&self) -> bool { self.codes.is_empty() && self.patterns.is_empty() }
}

/// Benign rules for every dialect. The `Generic` entry applies to all
/// dialects in addition to their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenignTable {
  rules: HashMap<Dialect, BenignRules>,
}

impl Default for BenignTable {
  fn default() -> Self { Self::builtin() }
}

impl BenignTable {
  /// A table with no rules; every error is fatal.
  pub fn empty() -> Self {
    Self {
      rules: HashMap::new(),
    }
  }

  /// The built-in rules for the known drivers.
  pub fn builtin() -> Self {
    let mut rules = HashMap::new();
    rules.insert(
      Dialect::Generic,
      BenignRules::new(Vec::<String>::new(), ["already exists", "duplicate column"]),
    );
    rules.insert(
      Dialect::MySql,
      BenignRules::new(
        // ER_TABLE_EXISTS_ERROR, ER_DUP_FIELDNAME, ER_DUP_KEYNAME,
        // ER_SP_ALREADY_EXISTS, ER_TRG_ALREADY_EXISTS, ER_FK_DUP_NAME
        ["1050", "1060", "1061", "1304", "1359", "1826"],
        ["duplicate key name", "duplicate column name"],
      ),
    );
    rules.insert(
      Dialect::PostgreSql,
      BenignRules::new(
        // duplicate_table, duplicate_column, duplicate_object,
        // duplicate_schema, duplicate_function
        ["42P07", "42701", "42710", "42P06", "42723"],
        Vec::<String>::new(),
      ),
    );
    rules.insert(
      Dialect::Sqlite,
      BenignRules::new(Vec::<String>::new(), ["duplicate column name"]),
    );
    rules.insert(
      Dialect::SqlServer,
      BenignRules::new(
        ["2714", "2705", "1913", "1779"],
        [
          "there is already an object named",
          "column names in each table must be unique",
        ],
      ),
    );
    Self { rules }
  }

  /// Replace the rules for `dialect`.
  pub fn set(&mut self, dialect: Dialect, rules: BenignRules) {
    self.rules.insert(dialect, rules);
  }

  /// Add to the rules for `dialect`.
  pub fn extend(&mut self, dialect: Dialect, rules: BenignRules) {
    self.rules.entry(dialect).or_default().extend(rules);
  }

  pub fn is_benign(&self, dialect: Dialect, error: &DriverError) -> bool {
    let own = self.rules.get(&dialect).is_some_and(|r| r.matches(error));
    own
      || (dialect != Dialect::Generic
        && self
          .rules
          .get(&Dialect::Generic)
          .is_some_and(|r| r.matches(error)))
  }
}

//! SQL dialects and their driver-name aliases.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The SQL variant spoken by the target database.
///
/// Parsing is case-insensitive and accepts the driver-family names hosts
/// commonly report (`mysqli`, `pdomysql`, `pgsql`, `sqlazure`, ...).
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Dialect {
  #[serde(alias = "mysqli", alias = "pdomysql", alias = "mariadb")]
  #[strum(to_string = "mysql", serialize = "mysqli", serialize = "pdomysql", serialize = "mariadb")]
  MySql,
  #[serde(alias = "postgres", alias = "pgsql")]
  #[strum(to_string = "postgresql", serialize = "postgres", serialize = "pgsql")]
  PostgreSql,
  #[serde(alias = "sqlite3")]
  #[strum(to_string = "sqlite", serialize = "sqlite3")]
  Sqlite,
  #[serde(alias = "sqlsrv", alias = "sqlazure", alias = "mssql")]
  #[strum(to_string = "sqlserver", serialize = "sqlsrv", serialize = "sqlazure", serialize = "mssql")]
  SqlServer,
  #[strum(to_string = "generic")]
  Generic,
}

impl Dialect {
  /// Directory names searched for dialect-specific schema files, in order.
  pub fn directory_names(self) -> &'static [&'static str] {
    match self {
      Self::MySql => &["mysql", "mysqli"],
      Self::PostgreSql => &["postgresql", "postgres"],
      Self::Sqlite => &["sqlite"],
      Self::SqlServer => &["sqlsrv", "sqlserver", "sqlazure"],
      Self::Generic => &[],
    }
  }

  /// Whether DDL statements take part in transactions on this dialect.
  pub fn transactional_ddl(self) -> bool {
    matches!(self, Self::PostgreSql | Self::Sqlite)
  }
}

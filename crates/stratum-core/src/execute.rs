//! Statement executor: runs one statement and classifies the outcome.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  classify::BenignTable,
  dialect::Dialect,
  schema::Statement,
  store::{Connection, DriverError},
};

/// A statement whose error halts the run.
#[derive(Debug, Clone, Error)]
#[error("statement at {}:{} failed: {error}\n  {}", .statement.origin_file.display(), .statement.line, .statement.text)]
pub struct FatalFailure {
  pub statement: Statement,
  #[source]
  pub error:     DriverError,
}

impl FatalFailure {
  pub fn file(&self) -> &Path { &self.statement.origin_file }
}

/// Result of applying one statement.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
  Success { rows: u64 },
  /// The statement's effect is already present.
  BenignFailure { reason: DriverError },
  FatalFailure(FatalFailure),
}

impl ExecutionOutcome {
  pub fn is_fatal(&self) -> bool { matches!(self, Self::FatalFailure(_)) }
}

/// Classify a driver result for `statement`.
pub fn classify(
  table: &BenignTable,
  dialect: Dialect,
  statement: &Statement,
  result: Result<u64, DriverError>,
) -> ExecutionOutcome {
  match result {
    Ok(rows) => ExecutionOutcome::Success { rows },
    Err(reason) if statement.can_fail || table.is_benign(dialect, &reason) => {
      ExecutionOutcome::BenignFailure { reason }
    }
    Err(error) => ExecutionOutcome::FatalFailure(FatalFailure {
      statement: statement.clone(),
      error,
    }),
  }
}

/// Runs statements against a connection, one at a time.
#[derive(Debug, Clone)]
pub struct StatementExecutor<C> {
  conn:   C,
  benign: BenignTable,
}

impl<C: Connection> StatementExecutor<C> {
  pub fn new(conn: C) -> Self {
    Self {
      conn,
      benign: BenignTable::builtin(),
    }
  }

  pub fn with_benign_table(mut self, benign: BenignTable) -> Self {
    self.benign = benign;
    self
  }

  pub fn connection(&self) -> &C { &self.conn }

  pub fn dialect(&self) -> Dialect { self.conn.dialect() }

  pub async fn execute(&self, statement: &Statement) -> ExecutionOutcome {
    let result = self.conn.execute(&statement.text).await;
    let outcome = classify(&self.benign, self.conn.dialect(), statement, result);
    match &outcome {
      ExecutionOutcome::Success { rows } => {
        debug!(line = statement.line, rows, "statement applied");
      }
      ExecutionOutcome::BenignFailure { reason } => {
        debug!(line = statement.line, %reason, "statement effect already present");
      }
      ExecutionOutcome::FatalFailure(failure) => {
        error!(
          file = %statement.origin_file.display(),
          line = statement.line,
          error = %failure.error,
          "statement failed"
        );
      }
    }
    outcome
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  fn statement(text: &str, can_fail: bool) -> Statement {
    Statement {
      text: text.to_owned(),
      origin_file: Arc::from(Path::new("1.sql")),
      origin_offset: 0,
      line: 1,
      can_fail,
    }
  }

  #[test]
  fn classifies_results() {
    let table = BenignTable::builtin();
    let st = statement("create table t (id int)", false);

    assert!(matches!(
      classify(&table, Dialect::Sqlite, &st, Ok(0)),
      ExecutionOutcome::Success { rows: 0 }
    ));
    assert!(matches!(
      classify(&table, Dialect::Sqlite, &st, Err(DriverError::new("table t already exists"))),
      ExecutionOutcome::BenignFailure { .. }
    ));
    let fatal = classify(&table, Dialect::Sqlite, &st, Err(DriverError::new("disk I/O error")));
    assert!(fatal.is_fatal());
  }

  #[test]
  fn can_fail_statements_are_never_fatal() {
    let table = BenignTable::empty();
    let st = statement("drop index idx", true);
    let outcome = classify(&table, Dialect::MySql, &st, Err(DriverError::new("no such index")));
    assert!(matches!(outcome, ExecutionOutcome::BenignFailure { .. }));
  }

  #[test]
  fn fatal_failure_carries_provenance() {
    let st = statement("alter table t add x int", false);
    let ExecutionOutcome::FatalFailure(failure) = classify(
      &BenignTable::builtin(),
      Dialect::Generic,
      &st,
      Err(DriverError::with_code("42501", "permission denied")),
    ) else {
      panic!("expected fatal failure");
    };
    assert_eq!(failure.file(), Path::new("1.sql"));
    let message = failure.to_string();
    assert!(message.contains("1.sql:1"));
    assert!(message.contains("[42501] permission denied"));
    assert!(message.contains("alter table t add x int"));
  }
}

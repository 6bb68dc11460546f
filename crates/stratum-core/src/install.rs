//! [`Installer`] — creates and evolves a component's schema.
//!
//! One invocation walks this state machine:
//!
//! ```text
//! Idle → BaselineCheck → BaselineApply? → UpdateSelect → UpdateApply(v)* → Done
//!                             └──────────────────────────────┴──────→ Halted(at)
//! ```
//!
//! The tracker is advanced once per file, after every statement in it was
//! applied or found already present. A fatal failure stops the run and leaves
//! the tracked version at the last complete file; the next call resumes there.

use std::{fmt, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  cache::VersionCache,
  classify::BenignTable,
  dialect::Dialect,
  error::{InstallError, LocateError, Result},
  execute::{ExecutionOutcome, FatalFailure, StatementExecutor},
  locate::{LocateWarning, SchemaLocator, SchemaSet},
  schema::{ComponentId, SchemaEntry, SchemaFile, Statement, Version},
  split::Splitter,
  store::{Connection, DriverError, NoLock, SchemaLock, VersionTracker},
};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InstallerOptions {
  /// Substituted for `#__` in statements.
  pub table_prefix:   String,
  /// Keep tracked versions in memory between calls.
  pub cache_versions: bool,
  /// Run each file in a transaction where the dialect has transactional DDL.
  pub transactional:  bool,
  pub lock_timeout:   Duration,
  pub lock_poll:      Duration,
}

impl Default for InstallerOptions {
  fn default() -> Self {
    Self {
      table_prefix:   String::new(),
      cache_versions: true,
      transactional:  false,
      lock_timeout:   Duration::from_secs(30),
      lock_poll:      Duration::from_millis(250),
    }
  }
}

// ─── Phases and reports ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "version", rename_all = "snake_case")]
pub enum Phase {
  Idle,
  BaselineCheck,
  BaselineApply,
  UpdateSelect,
  UpdateApply(Version),
  Done,
  Halted(Option<Version>),
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Idle => f.write_str("idle"),
      Self::BaselineCheck => f.write_str("baseline-check"),
      Self::BaselineApply => f.write_str("baseline-apply"),
      Self::UpdateSelect => f.write_str("update-select"),
      Self::UpdateApply(v) => write!(f, "update-apply({v})"),
      Self::Done => f.write_str("done"),
      Self::Halted(Some(v)) => write!(f, "halted({v})"),
      Self::Halted(None) => f.write_str("halted(uninstalled)"),
    }
  }
}

/// What one successful `update_schema` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
  pub component:        ComponentId,
  /// Dialect of the schema directory used; `None` if the component has no
  /// schema source.
  pub dialect:          Option<Dialect>,
  pub baseline_applied: bool,
  pub files_applied:    Vec<Version>,
  /// Statements that executed successfully.
  pub applied:          usize,
  /// Statements whose effect was already present.
  pub benign:           usize,
  /// Tracked version after the run.
  pub version:          Option<Version>,
  /// First missing version when later update files exist.
  pub held_back:        Option<Version>,
  pub warnings:         Vec<LocateWarning>,
}

impl UpdateReport {
  fn new(component: ComponentId) -> Self {
    Self {
      component,
      dialect: None,
      baseline_applied: false,
      files_applied: Vec::new(),
      applied: 0,
      benign: 0,
      version: None,
      held_back: None,
      warnings: Vec::new(),
    }
  }

  pub fn applied_count(&self) -> usize { self.applied }

  /// True if no file was applied.
  pub fn is_noop(&self) -> bool { !self.baseline_applied && self.files_applied.is_empty() }
}

/// What `update_schema` would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
  pub component: ComponentId,
  pub dialect:   Option<Dialect>,
  pub tracked:   Option<Version>,
  pub baseline:  bool,
  pub updates:   Vec<Version>,
  pub held_back: Option<Version>,
  pub warnings:  Vec<LocateWarning>,
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// Update files to apply after `tracked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
  pub pending:   &'a [SchemaEntry],
  /// The missing version that stops the sequence, if files remain past it.
  pub held_back: Option<Version>,
}

/// Select the contiguous run of updates starting at `tracked + 1`.
///
/// `updates` must be sorted by version without duplicates, as returned by the
/// locator. An absent `tracked` version counts as 0. Selection stops at the
/// first missing version; nothing past a gap is ever selected.
pub fn select_updates(tracked: Option<Version>, updates: &[SchemaEntry]) -> Selection<'_> {
  let floor = tracked.unwrap_or(Version::BASELINE);
  let start = updates.partition_point(|e| e.kind.tracked_version() <= floor);
  let rest = &updates[start..];

  let mut expected = floor.next();
  let mut len = 0;
  for entry in rest {
    if Some(entry.kind.tracked_version()) != expected {
      break;
    }
    len += 1;
    expected = expected.and_then(Version::next);
  }

  Selection {
    pending:   &rest[..len],
    held_back: if len < rest.len() { expected } else { None },
  }
}

fn enter(phase: &mut Phase, next: Phase) {
  debug!(from = %phase, to = %next, "installer phase");
  *phase = next;
}

// ─── Installer ───────────────────────────────────────────────────────────────

/// Drives schema installation and updates for components.
///
/// Owns its version cache; see [`Installer::invalidate`].
pub struct Installer<C, T, L = NoLock> {
  locator:  SchemaLocator,
  executor: StatementExecutor<C>,
  tracker:  T,
  lock:     L,
  cache:    VersionCache,
  options:  InstallerOptions,
}

impl<C, T> Installer<C, T, NoLock>
where
  C: Connection,
  T: VersionTracker,
{
  pub fn new(locator: SchemaLocator, conn: C, tracker: T) -> Self {
    Self {
      locator,
      executor: StatementExecutor::new(conn),
      tracker,
      lock: NoLock,
      cache: VersionCache::new(),
      options: InstallerOptions::default(),
    }
  }
}

impl<C, T, L> Installer<C, T, L>
where
  C: Connection,
  T: VersionTracker,
  L: SchemaLock,
{
  /// Hold `lock` for each component while it is updated.
  pub fn with_lock<M: SchemaLock>(self, lock: M) -> Installer<C, T, M> {
    Installer {
      locator: self.locator,
      executor: self.executor,
      tracker: self.tracker,
      lock,
      cache: self.cache,
      options: self.options,
    }
  }

  pub fn with_options(mut self, options: InstallerOptions) -> Self {
    self.options = options;
    self
  }

  pub fn with_benign_table(mut self, table: BenignTable) -> Self {
    self.executor = self.executor.with_benign_table(table);
    self
  }

  pub fn locator(&self) -> &SchemaLocator { &self.locator }

  pub fn connection(&self) -> &C { self.executor.connection() }

  pub fn tracker(&self) -> &T { &self.tracker }

  pub fn options(&self) -> &InstallerOptions { &self.options }

  /// Forget the cached version of `component`.
  pub fn invalidate(&self, component: &ComponentId) { self.cache.invalidate(component); }

  pub fn invalidate_all(&self) { self.cache.invalidate_all(); }

  /// Bring `component` up to date. Safe to call on every access.
  #[tracing::instrument(skip_all, fields(component = %component))]
  pub async fn update_schema(&self, component: &ComponentId) -> Result<UpdateReport> {
    let owner = Uuid::new_v4().to_string();
    self.acquire(component, &owner).await?;
    let result = self.run(component, &owner).await;
    if let Err(e) = self.lock.release(component, &owner).await {
      warn!(error = %e, "failed to release schema lock");
    }
    result
  }

  /// Update each component in turn. A failure does not stop the others.
  pub async fn update_all(
    &self,
    components: &[ComponentId],
  ) -> Vec<(ComponentId, Result<UpdateReport>)> {
    let mut results = Vec::with_capacity(components.len());
    for component in components {
      let result = self.update_schema(component).await;
      results.push((component.clone(), result));
    }
    results
  }

  /// Report what `update_schema` would apply.
  pub async fn plan(&self, component: &ComponentId) -> Result<Plan> {
    let tracked = self.tracked_version(component).await?;
    let mut plan = Plan {
      component: component.clone(),
      dialect: None,
      tracked,
      baseline: false,
      updates: Vec::new(),
      held_back: None,
      warnings: Vec::new(),
    };

    if let Some(set) = self.locate(component).await? {
      plan.dialect = Some(set.dialect);
      plan.baseline = tracked.is_none() && set.baseline.is_some();
      let from = if plan.baseline { Some(Version::BASELINE) } else { tracked };
      let selection = select_updates(from, &set.updates);
      plan.updates = selection
        .pending
        .iter()
        .map(|e| e.kind.tracked_version())
        .collect();
      plan.held_back = selection.held_back;
      plan.warnings = set.warnings;
    }
    Ok(plan)
  }

  async fn run(&self, component: &ComponentId, owner: &str) -> Result<UpdateReport> {
    let mut phase = Phase::Idle;
    let mut report = UpdateReport::new(component.clone());

    enter(&mut phase, Phase::BaselineCheck);
    let Some(set) = self.locate(component).await? else {
      debug!("no schema source; nothing to install");
      enter(&mut phase, Phase::Done);
      return Ok(report);
    };
    debug!(directory = %set.directory.display(), dialect = %set.dialect, "schema source located");
    report.dialect = Some(set.dialect);
    report.warnings.clone_from(&set.warnings);

    let mut tracked = self.tracked_version(component).await?;

    if tracked.is_none()
      && let Some(baseline) = &set.baseline
    {
      enter(&mut phase, Phase::BaselineApply);
      if let Err(e) = self.apply(component, baseline, None, &mut report).await {
        enter(&mut phase, Phase::Halted(None));
        return Err(e);
      }
      tracked = Some(Version::BASELINE);
      report.baseline_applied = true;
      if let Err(e) = self.renew(component, owner, tracked).await {
        enter(&mut phase, Phase::Halted(tracked));
        return Err(e);
      }
    }

    enter(&mut phase, Phase::UpdateSelect);
    let selection = select_updates(tracked, &set.updates);
    if let Some(missing) = selection.held_back {
      warn!(%missing, "update sequence has a gap; later files are held back");
      report.held_back = Some(missing);
    }

    for entry in selection.pending {
      let version = entry.kind.tracked_version();
      enter(&mut phase, Phase::UpdateApply(version));
      if let Err(e) = self.apply(component, entry, tracked, &mut report).await {
        enter(&mut phase, Phase::Halted(tracked));
        return Err(e);
      }
      tracked = Some(version);
      report.files_applied.push(version);
      if let Err(e) = self.renew(component, owner, tracked).await {
        enter(&mut phase, Phase::Halted(tracked));
        return Err(e);
      }
    }

    report.version = tracked;
    enter(&mut phase, Phase::Done);
    if report.is_noop() {
      debug!(version = ?tracked, "schema up to date");
    } else {
      info!(
        version = ?tracked,
        applied = report.applied,
        benign = report.benign,
        "schema updated"
      );
    }
    Ok(report)
  }

  /// `None` when the component has no schema source.
  async fn locate(&self, component: &ComponentId) -> Result<Option<SchemaSet>> {
    match self.locator.locate(component, self.executor.dialect()).await {
      Ok(set) => Ok(Some(set)),
      Err(LocateError::NotFound { .. }) => Ok(None),
      Err(source) => Err(InstallError::Source {
        component: component.clone(),
        halted_at: None,
        source,
      }),
    }
  }

  /// Apply one file and advance the tracker to its version. `halted_at` is
  /// the version the component stays at if the file fails.
  async fn apply(
    &self,
    component: &ComponentId,
    entry: &SchemaEntry,
    halted_at: Option<Version>,
    report: &mut UpdateReport,
  ) -> Result<()> {
    let file = entry
      .load()
      .await
      .map_err(|source| InstallError::Source {
        component: component.clone(),
        halted_at,
        source,
      })?;

    let dialect = self.executor.dialect();
    let splitter = Splitter::new(dialect).with_table_prefix(self.options.table_prefix.clone());
    // Split up front so a malformed file executes nothing.
    let statements = splitter
      .split(&file)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|source| InstallError::Parse {
        component: component.clone(),
        halted_at,
        source,
      })?;
    debug!(
      file = %file.path.display(),
      statements = statements.len(),
      "applying schema file"
    );

    let conn = self.executor.connection();
    let transactional = self.options.transactional && dialect.transactional_ddl();
    let control_failure = |sql: &str, error: DriverError| InstallError::Execution {
      component: component.clone(),
      halted_at,
      failure: FatalFailure {
        statement: control_statement(&file, sql),
        error,
      },
    };

    if transactional {
      conn.begin().await.map_err(|e| control_failure("BEGIN", e))?;
    }

    let (mut applied, mut benign) = (0, 0);
    for statement in &statements {
      match self.executor.execute(statement).await {
        ExecutionOutcome::Success { .. } => applied += 1,
        ExecutionOutcome::BenignFailure { .. } => benign += 1,
        ExecutionOutcome::FatalFailure(failure) => {
          if transactional && let Err(e) = conn.rollback().await {
            warn!(error = %e, "rollback failed");
          }
          return Err(InstallError::Execution {
            component: component.clone(),
            halted_at,
            failure,
          });
        }
      }
    }

    if transactional && let Err(error) = conn.commit().await {
      // A failed COMMIT can leave the transaction open on the connection.
      if let Err(e) = conn.rollback().await {
        warn!(error = %e, "rollback after failed commit failed");
      }
      return Err(control_failure("COMMIT", error));
    }

    let version = file.kind.tracked_version();
    self.advance(component, version, &file.checksum).await?;
    report.applied += applied;
    report.benign += benign;
    info!(
      file = %file.path.display(),
      %version,
      applied,
      benign,
      "schema file applied"
    );
    Ok(())
  }

  async fn tracked_version(&self, component: &ComponentId) -> Result<Option<Version>> {
    if self.options.cache_versions
      && let Some(version) = self.cache.get(component)
    {
      return Ok(Some(version));
    }
    let version = self
      .tracker
      .get(component)
      .await
      .map_err(|e| InstallError::Tracker {
        component: component.clone(),
        source:    Box::new(e),
      })?;
    if self.options.cache_versions
      && let Some(version) = version
    {
      self.cache.store(component, version);
    }
    Ok(version)
  }

  async fn advance(&self, component: &ComponentId, version: Version, checksum: &str) -> Result<()> {
    self
      .tracker
      .advance(component, version, Some(checksum))
      .await
      .map_err(|e| InstallError::Tracker {
        component: component.clone(),
        source:    Box::new(e),
      })?;
    if self.options.cache_versions {
      self.cache.store(component, version);
    }
    Ok(())
  }

  async fn acquire(&self, component: &ComponentId, owner: &str) -> Result<()> {
    let started = Instant::now();
    loop {
      let acquired = self
        .lock
        .try_acquire(component, owner)
        .await
        .map_err(|e| InstallError::Lock {
          component: component.clone(),
          source:    Box::new(e),
        })?;
      if acquired {
        return Ok(());
      }
      let waited = started.elapsed();
      if waited >= self.options.lock_timeout {
        return Err(InstallError::LockTimeout {
          component: component.clone(),
          waited,
        });
      }
      debug!("schema lock busy; waiting");
      tokio::time::sleep(self.options.lock_poll).await;
    }
  }

  /// Re-acquire the lock after each file so its age counts from the last
  /// file applied rather than from the start of the run.
  async fn renew(
    &self,
    component: &ComponentId,
    owner: &str,
    tracked: Option<Version>,
  ) -> Result<()> {
    let held = self
      .lock
      .try_acquire(component, owner)
      .await
      .map_err(|e| InstallError::Lock {
        component: component.clone(),
        source:    Box::new(e),
      })?;
    if held {
      return Ok(());
    }
    Err(InstallError::LockLost {
      component: component.clone(),
      halted_at: tracked,
    })
  }
}

/// Stand-in statement for transaction control, for error provenance.
fn control_statement(file: &SchemaFile, sql: &str) -> Statement {
  Statement {
    text:          sql.to_owned(),
    origin_file:   file.path.clone(),
    origin_offset: file.content.len(),
    line:          file.content.lines().count().max(1),
    can_fail:      false,
  }
}

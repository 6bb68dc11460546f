//! `stratum` — install and update component schemas in an SQLite database.
//!
//! Reads `stratum.toml` (or the path given with `--config`), overlaid with
//! `STRATUM_*` environment variables.
//!
//! ```
//! stratum update                 # every component under schema_root
//! stratum update widgets parts
//! stratum status --json
//! stratum plan widgets
//! stratum split schema/widgets/generic/3.sql --dialect mysql
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use serde::Serialize;
use stratum_core::{
  ComponentId, Dialect, Installer, Version,
  install::Plan,
  locate::SchemaLocator,
  split::Splitter,
  store::VersionTracker,
};
use stratum_store_sqlite::{SqliteDatabase, SqliteSchemaLock, SqliteVersionTracker};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

type SqliteInstaller = Installer<SqliteDatabase, SqliteVersionTracker, Option<SqliteSchemaLock>>;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stratum", version, about = "Incremental schema installer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "stratum.toml")]
  config: PathBuf,

  /// SQLite database file; overrides the config file.
  #[arg(long)]
  database: Option<PathBuf>,

  /// Schema root directory; overrides the config file.
  #[arg(long)]
  schema_root: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Bring components up to date.
  Update {
    /// Components to update; all directories under the schema root if empty.
    components: Vec<String>,
  },
  /// Show tracked and pending versions for every component.
  Status {
    #[arg(long)]
    json: bool,
  },
  /// Show what `update` would apply to one component.
  Plan {
    component: String,
    #[arg(long)]
    json:      bool,
  },
  /// Print the statements of a schema file.
  Split {
    file:    PathBuf,
    #[arg(long, default_value = "generic")]
    dialect: Dialect,
    /// Substituted for `#__`.
    #[arg(long)]
    prefix:  Option<String>,
  },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config.clone()).required(false))
    .add_source(::config::Environment::with_prefix("STRATUM"))
    .set_override_option("database", cli.database.map(|p| p.display().to_string()))?
    .set_override_option("schema_root", cli.schema_root.map(|p| p.display().to_string()))?
    .build()
    .context("failed to read config file")?;

  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  match cli.command {
    Command::Update { components } => update(&cfg, components).await,
    Command::Status { json } => status(&cfg, json).await,
    Command::Plan { component, json } => plan(&cfg, component, json).await,
    Command::Split {
      file,
      dialect,
      prefix,
    } => split(file, dialect, prefix.unwrap_or(cfg.table_prefix)).await,
  }
}

async fn build_installer(cfg: &CliConfig) -> anyhow::Result<SqliteInstaller> {
  let db = SqliteDatabase::open(&cfg.database)
    .await
    .with_context(|| format!("failed to open database at {:?}", cfg.database))?;

  let tracker = SqliteVersionTracker::with_table(&db, &cfg.tracker_table)
    .await
    .context("failed to prepare version table")?;

  let lock = if cfg.use_lock {
    let stale = i64::try_from(cfg.lock_stale_secs)
      .ok()
      .and_then(TimeDelta::try_seconds)
      .context("lock_stale_secs out of range")?;
    let lock = SqliteSchemaLock::with_table(&db, &cfg.lock_table)
      .await
      .context("failed to prepare lock table")?;
    Some(lock.with_stale_after(stale))
  } else {
    None
  };

  let locator = SchemaLocator::new(&cfg.schema_root).with_options(cfg.locator_options());
  Ok(
    Installer::new(locator, db, tracker)
      .with_lock(lock)
      .with_options(cfg.installer_options())
      .with_benign_table(cfg.benign_table()),
  )
}

async fn components(
  installer: &SqliteInstaller,
  names: Vec<String>,
) -> anyhow::Result<Vec<ComponentId>> {
  if !names.is_empty() {
    return Ok(names.into_iter().map(ComponentId::new).collect());
  }
  installer
    .locator()
    .components()
    .await
    .context("failed to list components")
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn update(cfg: &CliConfig, names: Vec<String>) -> anyhow::Result<()> {
  let installer = build_installer(cfg).await?;
  let components = components(&installer, names).await?;

  let mut failed = 0;
  for (component, result) in installer.update_all(&components).await {
    match result {
      Ok(report) if report.dialect.is_none() => println!("{component}: no schema source"),
      Ok(report) if report.is_noop() => {
        println!("{component}: up to date at {}", show(report.version));
      }
      Ok(report) => println!(
        "{component}: now at {} ({} applied, {} already present)",
        show(report.version),
        report.applied,
        report.benign
      ),
      Err(e) => {
        failed += 1;
        eprintln!("{e}");
      }
    }
  }

  if failed > 0 {
    bail!("{failed} of {} component(s) failed", components.len());
  }
  Ok(())
}

#[derive(Serialize)]
struct StatusRow {
  component:  ComponentId,
  tracked:    Option<Version>,
  pending:    Vec<Version>,
  baseline:   bool,
  held_back:  Option<Version>,
  checksum:   Option<String>,
  updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn status(cfg: &CliConfig, json: bool) -> anyhow::Result<()> {
  let installer = build_installer(cfg).await?;
  let tracked = installer
    .tracker()
    .list()
    .await
    .context("failed to read version table")?;

  let mut names = components(&installer, Vec::new()).await?;
  names.extend(tracked.iter().map(|row| row.component.clone()));
  names.sort();
  names.dedup();

  let mut rows = Vec::with_capacity(names.len());
  for component in names {
    let plan = installer.plan(&component).await?;
    let row = tracked.iter().find(|r| r.component == component);
    rows.push(StatusRow {
      tracked: plan.tracked,
      pending: plan.updates,
      baseline: plan.baseline,
      held_back: plan.held_back,
      checksum: row.and_then(|r| r.checksum.clone()),
      updated_at: row.map(|r| r.updated_at),
      component,
    });
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&rows)?);
    return Ok(());
  }
  for row in &rows {
    let pending = if row.baseline {
      "baseline".to_owned()
    } else if row.pending.is_empty() {
      "-".to_owned()
    } else {
      format!("{} update(s)", row.pending.len())
    };
    let gap = row
      .held_back
      .map(|v| format!(" (missing {v})"))
      .unwrap_or_default();
    println!("{:<24} {:>10} {pending}{gap}", row.component, show(row.tracked));
  }
  Ok(())
}

async fn plan(cfg: &CliConfig, component: String, json: bool) -> anyhow::Result<()> {
  let installer = build_installer(cfg).await?;
  let plan: Plan = installer.plan(&ComponentId::new(component)).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(());
  }
  let Some(dialect) = plan.dialect else {
    println!("{}: no schema source", plan.component);
    return Ok(());
  };
  println!("{} ({dialect}), tracked at {}", plan.component, show(plan.tracked));
  if plan.baseline {
    println!("  baseline");
  }
  for version in &plan.updates {
    println!("  update {version}");
  }
  if let Some(missing) = plan.held_back {
    println!("  held back: version {missing} is missing");
  }
  for warning in plan.warnings {
    println!("  skipped: {}", warning.into_error());
  }
  Ok(())
}

async fn split(file: PathBuf, dialect: Dialect, prefix: String) -> anyhow::Result<()> {
  let source = tokio::fs::read_to_string(&file)
    .await
    .with_context(|| format!("failed to read {file:?}"))?;
  let splitter = Splitter::new(dialect).with_table_prefix(prefix);
  for statement in splitter.split_str(Arc::from(file.as_path()), &source) {
    let statement = statement?;
    let marker = if statement.can_fail { " @can-fail" } else { "" };
    println!("-- line {}{marker}\n{};\n", statement.line, statement.text);
  }
  Ok(())
}

fn show(version: Option<Version>) -> String {
  version.map_or_else(|| "uninstalled".to_owned(), |v| v.to_string())
}

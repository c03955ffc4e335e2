//! `ladder`: operator CLI for the Ladder standings store.
//!
//! Reads `ladder.toml` (or the path given with `--config`), layered under
//! `LADDER_*` environment variables, and runs one maintenance command.
//!
//! # Usage
//!
//! ```text
//! ladder validate --detailed
//! ladder migrate --type all_refs --dry-run
//! ladder rollback --backup-id 7d4c…
//! LADDER_MIGRATION__WORKERS=8 ladder migrate
//! ```

use std::{
  io::{self, BufRead, Write},
  path::{Path, PathBuf},
  process::ExitCode,
  sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ladder_core::{
  inconsistency::Collection,
  migration::MigrationKind,
  store::LeagueStore,
  validate::{ConsistencyValidator, ValidationReport},
};
use ladder_engine::{
  backup::{BackupManager, RetentionPolicy, SnapshotKind},
  config::Settings,
  dataset::load_dataset,
  migration::MigrationEngine,
  notify::{Alert, AlertSeverity, Notifier, TracingNotifier},
  recalc::Recalculator,
  repair::{RepairEngine, RepairOptions},
  report::{Operations, Report},
};
use ladder_store_sqlite::SqliteStore;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
  name = "ladder",
  version,
  about = "Standings maintenance and relation migration"
)]
struct Cli {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", default_value = "ladder.toml")]
  config: PathBuf,

  /// Skip confirmation prompts for live repair and rollback.
  #[arg(short, long, global = true)]
  yes: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Migration lock, recent runs and collection sizes.
  Status,

  /// Run every consistency check.
  Validate {
    /// List affected record ids per finding.
    #[arg(long)]
    detailed: bool,
  },

  /// Rewrite legacy team references to club references.
  Migrate {
    /// match_refs, standing_refs or all_refs.
    #[arg(long = "type", value_name = "KIND", default_value = "all_refs")]
    kind: String,

    /// Validate and count without a lock, a snapshot or any write.
    #[arg(long)]
    dry_run: bool,
  },

  /// Restore a pre-migration snapshot.
  Rollback {
    #[arg(long)]
    backup_id: Uuid,
  },

  /// Fix what validation reports as fixable.
  Repair {
    #[arg(long)]
    dry_run: bool,

    /// Repair even when unfixable errors exceed the tolerance.
    #[arg(long)]
    force: bool,
  },

  /// Write the JSON health report.
  Report {
    #[arg(short, long, default_value = "ladder-report.json")]
    output: PathBuf,
  },

  /// Recompute and store the standings of one season.
  Recalculate {
    #[arg(long)]
    league: i64,

    #[arg(long)]
    season: i64,

    #[arg(long)]
    dry_run: bool,
  },

  /// Snapshot management.
  #[command(subcommand)]
  Backup(BackupCommand),
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
  /// Snapshot every collection.
  Create {
    #[arg(long, value_enum, default_value_t = BackupKind::Full)]
    kind: BackupKind,
  },
  /// List snapshots, newest first.
  List,
  /// Recompute a snapshot's checksum.
  Verify { id: Uuid },
  /// Apply the retention policy.
  Prune,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackupKind {
  Full,
  Incremental,
}

impl From<BackupKind> for SnapshotKind {
  fn from(kind: BackupKind) -> Self {
    match kind {
      BackupKind::Full => SnapshotKind::Full,
      BackupKind::Incremental => SnapshotKind::Incremental,
    }
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  match run(cli).await {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      eprintln!("error: {e:#}");
      ExitCode::FAILURE
    }
  }
}

/// Load settings from the optional file, then `LADDER_*` variables.
fn load_settings(path: &Path) -> Result<Settings> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("LADDER").separator("__"))
    .build()
    .context("failed to read configuration")?
    .try_deserialize()
    .context("failed to deserialise Settings")
}

/// Everything a command may need, opened once.
struct App {
  settings: Settings,
  store:    Arc<SqliteStore>,
  yes:      bool,
}

impl App {
  fn backups(&self) -> BackupManager<SqliteStore> {
    BackupManager::new(
      self.store.clone(),
      &self.settings.backup_dir,
      self.settings.backup.clone(),
    )
  }

  fn migrations(&self) -> MigrationEngine<SqliteStore> {
    MigrationEngine::new(
      self.store.clone(),
      self.backups(),
      self.settings.migration.clone(),
      self.settings.standings.tie_policy,
    )
  }

  async fn validate(&self) -> Result<ValidationReport> {
    let data = load_dataset(&*self.store).await.context("failed to load dataset")?;
    Ok(ConsistencyValidator::new(self.settings.standings.tie_policy).validate(&data))
  }
}

/// Returns whether the command succeeded in the exit-code sense.
async fn run(cli: Cli) -> Result<bool> {
  let settings = load_settings(&cli.config)?;
  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;
  let ctx = App { settings, store: Arc::new(store), yes: cli.yes };

  match cli.command {
    Command::Status => status(&ctx).await,
    Command::Validate { detailed } => validate(&ctx, detailed).await,
    Command::Migrate { kind, dry_run } => migrate(&ctx, &kind, dry_run).await,
    Command::Rollback { backup_id } => rollback(&ctx, backup_id).await,
    Command::Repair { dry_run, force } => repair(&ctx, dry_run, force).await,
    Command::Report { output } => report(&ctx, output).await,
    Command::Recalculate { league, season, dry_run } => {
      recalculate(&ctx, league, season, dry_run).await
    }
    Command::Backup(cmd) => backup(&ctx, cmd).await,
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn status(ctx: &App) -> Result<bool> {
  let status = ctx.migrations().status().await?;
  match &status.lock {
    Some(lock) => {
      println!("lock:      held by {} since {}", lock.owner, lock.acquired_at)
    }
    None => println!("lock:      free"),
  }
  for collection in Collection::ALL {
    let n = ctx.store.count(collection).await?;
    println!("{:<13}{n}", format!("{collection}:"));
  }
  println!("snapshots: {}", ctx.backups().list().await?.len());

  if status.recent.is_empty() {
    println!("no migrations recorded");
  }
  for r in &status.recent {
    println!(
      "{}  {:<13} {:<11} processed={} migrated={} errors={}",
      r.started_at.format("%Y-%m-%d %H:%M:%S"),
      r.kind.to_string(),
      r.status.to_string(),
      r.stats.processed,
      r.stats.migrated,
      r.stats.errors,
    );
  }
  Ok(true)
}

async fn validate(ctx: &App, detailed: bool) -> Result<bool> {
  let report = ctx.validate().await?;
  for check in &report.checks {
    let mark = match check.severity() {
      None => "ok  ",
      Some(ladder_core::inconsistency::Severity::Warning) => "warn",
      Some(ladder_core::inconsistency::Severity::Error) => "FAIL",
    };
    println!("[{mark}] {}", check.name);
    for issue in &check.issues {
      println!("       {}", issue.description);
      if detailed {
        let ids: Vec<String> = issue.records.iter().map(i64::to_string).collect();
        println!("       {} {}: {}", issue.entity, issue.kind, ids.join(", "));
      }
    }
  }
  println!("{} error(s), {} warning(s)", report.error_count(), report.warning_count());
  if report.has_errors() {
    TracingNotifier.notify(&Alert::new(
      AlertSeverity::Critical,
      "validation failed",
      format!(
        "{} error finding(s), {} row(s) affected",
        report.error_count(),
        report.error_weight()
      ),
    ));
  }
  Ok(!report.has_errors())
}

async fn migrate(ctx: &App, kind: &str, dry_run: bool) -> Result<bool> {
  let kind = MigrationKind::parse(kind)?;
  let engine = ctx.migrations();

  if dry_run {
    let plan = engine.plan(kind).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(plan.passes_pre_check);
  }

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received; stopping at the next batch boundary");
      on_signal.cancel();
    }
  });

  let outcome = engine.run(kind, cancel).await?;
  let stats = outcome.record.stats;
  println!(
    "{} {}: processed={} migrated={} skipped={} errors={}",
    outcome.record.id,
    outcome.state,
    stats.processed,
    stats.migrated,
    stats.skipped,
    stats.errors
  );
  if let Some(message) = &outcome.record.message {
    println!("{message}");
  }
  if outcome.rollback_recommended
    && let Some(backup) = outcome.record.backup_id
  {
    println!(
      "run `ladder rollback --backup-id {backup}` to restore the pre-migration state"
    );
  }
  Ok(outcome.committed())
}

async fn rollback(ctx: &App, backup_id: Uuid) -> Result<bool> {
  if !ctx.yes && !confirm(&format!("Restore snapshot {backup_id}?"))? {
    println!("aborted");
    return Ok(true);
  }
  let record = ctx.migrations().rollback(backup_id).await?;
  println!(
    "{} {}: restored {} record(s)",
    record.id, record.status, record.stats.processed
  );
  Ok(true)
}

async fn repair(ctx: &App, dry_run: bool, force: bool) -> Result<bool> {
  if !dry_run && !ctx.yes && !confirm("Apply repairs to the store?")? {
    println!("aborted");
    return Ok(true);
  }
  let engine = RepairEngine::new(
    ctx.store.clone(),
    ctx.settings.repair.clone(),
    ctx.settings.standings.tie_policy,
  );
  let report = engine.repair(RepairOptions { dry_run, force }).await?;
  for c in &report.categories {
    println!(
      "{:<16} targeted={:<5} fixed={:<5} skipped={}",
      format!("{:?}", c.category),
      c.targeted,
      c.fixed,
      c.skipped
    );
  }
  let verb = if dry_run { "would fix" } else { "fixed" };
  println!("{verb} {} row(s)", report.total_fixed());
  Ok(true)
}

async fn report(ctx: &App, output: PathBuf) -> Result<bool> {
  let validation = ctx.validate().await?;
  let ops = Operations::gather(&*ctx.store, &ctx.backups()).await?;
  let report = Report::build(&validation, Some(&ops));
  report
    .write(&output)
    .await
    .with_context(|| format!("failed to write report to {}", output.display()))?;
  let s = report.summary;
  println!(
    "{}: {} checks, {} passed, {} warnings, {} errors",
    output.display(),
    s.total_checks,
    s.passed,
    s.warnings,
    s.errors
  );
  Ok(!report.has_errors())
}

async fn recalculate(ctx: &App, league: i64, season: i64, dry_run: bool) -> Result<bool> {
  let recalc = Recalculator::new(ctx.store.clone(), ctx.settings.standings.tie_policy);
  let report = recalc.recalculate(league, season, dry_run).await?;
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(true)
}

async fn backup(ctx: &App, cmd: BackupCommand) -> Result<bool> {
  let backups = ctx.backups();
  match cmd {
    BackupCommand::Create { kind } => {
      let meta = backups.create_snapshot(&Collection::ALL, kind.into()).await?;
      println!("{} {} record(s) {}", meta.id, meta.record_count, meta.checksum);
    }
    BackupCommand::List => {
      for meta in backups.list().await? {
        println!(
          "{}  {}  {:<11} {:>7} record(s){}",
          meta.id,
          meta.timestamp.format("%Y-%m-%d %H:%M:%S"),
          format!("{:?}", meta.backup_type).to_lowercase(),
          meta.record_count,
          meta.parent.map(|p| format!("  parent {p}")).unwrap_or_default(),
        );
      }
    }
    BackupCommand::Verify { id } => {
      let meta = backups.verify(id).await?;
      println!("{} ok ({})", meta.id, meta.checksum);
    }
    BackupCommand::Prune => {
      let report = backups.retention(RetentionPolicy::from(&ctx.settings.backup)).await?;
      println!("kept {}, deleted {}", report.kept.len(), report.deleted.len());
    }
  }
  Ok(true)
}

/// Ask a yes/no question on stdin.
fn confirm(question: &str) -> Result<bool> {
  print!("{question} [y/N] ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

//! The relation-migration state machine.
//!
//! ```text
//! Idle → PreflightChecks → SnapshotCreated → PreValidating → Transforming
//!      → PostValidating → Committed
//! Idle → RollingBack → RolledBack
//! ```
//!
//! Every non-terminal state may move to `Failed`. Nothing is written before
//! preflight passes and the migration lock is held; the lock is released on
//! every exit path after that.

use std::{collections::HashMap, sync::Arc};

use ladder_core::{
  audit::{AuditAction, AuditEntry},
  calculator::TiePolicy,
  fixture::Match,
  inconsistency::{Collection, InconsistencyKind},
  league::ParticipantDirectory,
  migration::{LockInfo, MigrationKind, MigrationRecord, MigrationStats, MigrationStatus},
  standing::Standing,
  store::{LeagueStore, MatchQuery, StandingQuery, WriteOp},
  validate::{ConsistencyValidator, ValidationReport},
};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  Error, Result,
  audit::AuditLog,
  backup::{BackupManager, SnapshotKind},
  config::MigrationConfig,
  dataset::load_dataset,
  notify::{Alert, AlertSeverity, Notifier, TracingNotifier},
  transform::{RelationTransform, TeamToClub},
};

const ACTOR: &str = "migration";

// ─── States ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationState {
  Idle,
  PreflightChecks,
  SnapshotCreated,
  PreValidating,
  Transforming,
  PostValidating,
  Committed,
  Failed,
  RollingBack,
  RolledBack,
}

impl MigrationState {
  pub fn can_transition_to(self, next: MigrationState) -> bool {
    use MigrationState::*;
    matches!(
      (self, next),
      (Idle, PreflightChecks)
        | (Idle, RollingBack)
        | (PreflightChecks, SnapshotCreated)
        | (SnapshotCreated, PreValidating)
        | (PreValidating, Transforming)
        | (Transforming, PostValidating)
        | (PostValidating, Committed)
        | (RollingBack, RolledBack)
        | (
          PreflightChecks
            | SnapshotCreated
            | PreValidating
            | Transforming
            | PostValidating
            | RollingBack,
          Failed
        )
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Committed | Self::Failed | Self::RolledBack)
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// The end of a forward run that got past preflight.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
  pub record:               MigrationRecord,
  pub state:                MigrationState,
  pub pre_validation:       Option<ValidationReport>,
  pub post_validation:      Option<ValidationReport>,
  /// Post-validation found regressions; restoring `record.backup_id` is
  /// advised. The engine never rolls back on its own.
  pub rollback_recommended: bool,
}

impl MigrationOutcome {
  pub fn committed(&self) -> bool { self.state == MigrationState::Committed }
}

/// What a run would do, computed without writing anything.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
  pub kind:             MigrationKind,
  pub transform:        String,
  pub lock:             Option<LockInfo>,
  pub pre_validation:   ValidationReport,
  pub passes_pre_check: bool,
  pub planned:          MigrationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusReport {
  pub lock:   Option<LockInfo>,
  pub recent: Vec<MigrationRecord>,
}

// ─── Work items ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Item {
  Match(Match),
  Standing(Standing),
}

impl Item {
  fn partition_key(&self) -> i64 {
    match self {
      Item::Match(m) => m.home.partition_key(),
      Item::Standing(s) => s.participant.partition_key(),
    }
  }

  fn label(&self) -> (Collection, i64) {
    match self {
      Item::Match(m) => (Collection::Matches, m.id),
      Item::Standing(s) => (Collection::Standings, s.id),
    }
  }

  /// The rewrite for this item, `None` when already migrated.
  fn transform(
    &self,
    transform: &dyn RelationTransform,
    directory: &ParticipantDirectory,
  ) -> std::result::Result<Option<WriteOp>, crate::transform::TransformError> {
    Ok(match self {
      Item::Match(m) => {
        transform.transform_match(m, directory)?.map(WriteOp::UpdateMatch)
      }
      Item::Standing(s) => {
        transform.transform_standing(s, directory)?.map(WriteOp::UpdateStanding)
      }
    })
  }
}

#[derive(Debug, Default)]
struct WorkerReport {
  stats:     MigrationStats,
  cancelled: bool,
}

/// Process one partition in batches. Each batch is one atomic write; a
/// failed batch counts its changes as errors and the worker moves on.
async fn run_partition<S: LeagueStore>(
  worker: usize,
  store: Arc<S>,
  transform: Arc<dyn RelationTransform>,
  directory: Arc<ParticipantDirectory>,
  items: Vec<Item>,
  batch_size: usize,
  migration_id: Uuid,
  cancel: CancellationToken,
) -> WorkerReport {
  let mut report = WorkerReport::default();
  for (batch_no, batch) in items.chunks(batch_size.max(1)).enumerate() {
    if cancel.is_cancelled() {
      tracing::warn!(worker, batch = batch_no, "transform cancelled at batch boundary");
      report.cancelled = true;
      break;
    }

    let mut ops = Vec::with_capacity(batch.len() + 1);
    for item in batch {
      report.stats.processed += 1;
      match item.transform(transform.as_ref(), &directory) {
        Ok(Some(op)) => ops.push(op),
        Ok(None) => report.stats.skipped += 1,
        Err(e) => {
          let (entity, id) = item.label();
          tracing::warn!(worker, %entity, id, "record not migrated: {e}");
          report.stats.errors += 1;
        }
      }
    }
    if ops.is_empty() {
      continue;
    }

    let changed = ops.len() as u64;
    ops.push(WriteOp::AppendAudit(
      AuditEntry::new(
        ACTOR,
        AuditAction::Update,
        format!("worker {worker} batch {batch_no}: rewrote {changed} reference(s)"),
      )
      .in_migration(migration_id),
    ));
    match store.apply(ops).await {
      Ok(_) => {
        report.stats.migrated += changed;
        tracing::debug!(worker, batch = batch_no, changed, "batch committed");
      }
      Err(e) => {
        report.stats.errors += changed;
        tracing::warn!(worker, batch = batch_no, changed, "batch failed: {e}");
      }
    }
  }
  report
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// A forward or rollback run in progress.
struct Run {
  record:    MigrationRecord,
  state:     MigrationState,
  /// Whether anything about this run has been written yet.
  persisted: bool,
}

pub struct MigrationEngine<S> {
  store:      Arc<S>,
  backups:    BackupManager<S>,
  audit:      AuditLog<S>,
  notifier:   Arc<dyn Notifier>,
  transform:  Arc<dyn RelationTransform>,
  config:     MigrationConfig,
  tie_policy: TiePolicy,
}

impl<S: LeagueStore + 'static> MigrationEngine<S> {
  pub fn new(
    store: Arc<S>,
    backups: BackupManager<S>,
    config: MigrationConfig,
    tie_policy: TiePolicy,
  ) -> Self {
    Self {
      audit: AuditLog::new(store.clone()),
      store,
      backups,
      notifier: Arc::new(TracingNotifier),
      transform: Arc::new(TeamToClub),
      config,
      tie_policy,
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_transform(mut self, transform: Arc<dyn RelationTransform>) -> Self {
    self.transform = transform;
    self
  }

  /// Lock holder and the most recent runs.
  pub async fn status(&self) -> Result<MigrationStatusReport> {
    Ok(MigrationStatusReport {
      lock:   self.store.migration_lock().await.map_err(Error::store)?,
      recent: self.store.list_migration_records(10).await.map_err(Error::store)?,
    })
  }

  async fn advance(&self, run: &mut Run, next: MigrationState) -> Result<()> {
    if !run.state.can_transition_to(next) {
      return Err(Error::InvalidTransition {
        from: run.state.to_string(),
        to:   next.to_string(),
      });
    }
    tracing::info!(
      migration = %run.record.id,
      kind = %run.record.kind,
      from = %run.state,
      to = %next,
      "migration state changed"
    );
    if run.persisted {
      let message = format!("{} -> {next}", run.state);
      self
        .audit
        .append(
          AuditEntry::new(ACTOR, AuditAction::Transition, message)
            .in_migration(run.record.id),
        )
        .await?;
    }
    run.state = next;
    Ok(())
  }

  fn alert(&self, severity: AlertSeverity, title: &str, message: impl Into<String>) {
    self.notifier.notify(&Alert::new(severity, title, message));
  }

  // ── Preflight ─────────────────────────────────────────────────────────────

  /// Reference checks that need no lock. Returns the participant directory.
  async fn check_references(&self) -> Result<ParticipantDirectory> {
    let leagues = self.store.list_leagues().await.map_err(Error::store)?;
    if leagues.is_empty() {
      return Err(Error::Referential("no leagues exist".into()));
    }
    let participants = self.store.list_participants().await.map_err(Error::store)?;
    if participants.is_empty() {
      return Err(Error::Referential("no participants exist".into()));
    }
    let directory = ParticipantDirectory::new(participants);
    if !directory.has_legacy_mapping() {
      return Err(Error::Referential(
        "no participant carries a legacy team id; nothing to map from".into(),
      ));
    }
    Ok(directory)
  }

  async fn check_backup_dir(&self) -> Result<()> {
    tokio::fs::create_dir_all(self.backups.dir()).await?;
    let meta = tokio::fs::metadata(self.backups.dir()).await?;
    if meta.permissions().readonly() {
      return Err(Error::Input(format!(
        "backup directory {} is read-only",
        self.backups.dir().display()
      )));
    }
    Ok(())
  }

  fn validate(&self, data: &ladder_core::validate::Dataset) -> ValidationReport {
    ConsistencyValidator::new(self.tie_policy).validate(data)
  }

  async fn load_items(&self, kind: MigrationKind) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    if kind.collections().contains(&Collection::Matches) {
      let matches = self
        .store
        .find_matches(&MatchQuery::default())
        .await
        .map_err(Error::store)?;
      items.extend(matches.into_iter().map(Item::Match));
    }
    if kind.collections().contains(&Collection::Standings) {
      let standings = self
        .store
        .find_standings(&StandingQuery::default())
        .await
        .map_err(Error::store)?;
      items.extend(standings.into_iter().map(Item::Standing));
    }
    Ok(items)
  }

  // ── Dry run ───────────────────────────────────────────────────────────────

  /// Preflight, pre-validation and planned stats. Takes no lock, makes no
  /// snapshot, writes nothing.
  pub async fn plan(&self, kind: MigrationKind) -> Result<MigrationPlan> {
    forward_only(kind)?;
    let directory = self.check_references().await?;
    let lock = self.store.migration_lock().await.map_err(Error::store)?;

    let data = load_dataset(&*self.store).await?;
    let pre_validation = self.validate(&data);
    let passes_pre_check =
      pre_validation.error_weight() <= self.config.pre_validation_tolerance;

    let mut planned = MigrationStats::default();
    for item in self.load_items(kind).await? {
      planned.processed += 1;
      match item.transform(self.transform.as_ref(), &directory) {
        Ok(Some(_)) => planned.migrated += 1,
        Ok(None) => planned.skipped += 1,
        Err(_) => planned.errors += 1,
      }
    }

    Ok(MigrationPlan {
      kind,
      transform: self.transform.name().to_owned(),
      lock,
      pre_validation,
      passes_pre_check,
      planned,
    })
  }

  // ── Forward run ───────────────────────────────────────────────────────────

  /// Run a forward migration of `kind`.
  ///
  /// Preflight failures (including a held lock) return `Err` with nothing
  /// written. Once the lock is held, gate failures return `Ok` with a
  /// `Failed` outcome; unexpected errors mark the record failed and are
  /// returned.
  pub async fn run(
    &self,
    kind: MigrationKind,
    cancel: CancellationToken,
  ) -> Result<MigrationOutcome> {
    forward_only(kind)?;
    let mut run = Run {
      record:    MigrationRecord::start(kind),
      state:     MigrationState::Idle,
      persisted: false,
    };
    self.advance(&mut run, MigrationState::PreflightChecks).await?;

    let directory = self.check_references().await?;
    self.check_backup_dir().await?;
    let owner = run.record.id;
    if !self.store.acquire_migration_lock(owner).await.map_err(Error::store)? {
      let holder = self.store.migration_lock().await.map_err(Error::store)?;
      return Err(Error::Concurrency(match holder {
        Some(lock) => {
          format!("migration lock held by {} since {}", lock.owner, lock.acquired_at)
        }
        None => "migration lock is held".into(),
      }));
    }

    let result = self.run_locked(&mut run, directory, &cancel).await;
    let result = match result {
      Ok(outcome) => Ok(outcome),
      Err(e) => {
        self.fail(&mut run, e.to_string()).await;
        Err(e)
      }
    };

    match self.store.release_migration_lock(owner).await {
      Ok(true) => {}
      Ok(false) => tracing::warn!(migration = %owner, "migration lock was already gone"),
      Err(e) => {
        tracing::error!(migration = %owner, "could not release migration lock: {e}")
      }
    }
    result
  }

  async fn run_locked(
    &self,
    run: &mut Run,
    directory: ParticipantDirectory,
    cancel: &CancellationToken,
  ) -> Result<MigrationOutcome> {
    let kind = run.record.kind;
    self.save(run).await?;
    run.persisted = true;

    // Snapshot.
    let snapshot = self
      .backups
      .create_snapshot(kind.collections(), SnapshotKind::Full)
      .await?;
    run.record.backup_id = Some(snapshot.id);
    self.save(run).await?;
    self.advance(run, MigrationState::SnapshotCreated).await?;

    // Pre-validation.
    self.advance(run, MigrationState::PreValidating).await?;
    let pre = self.validate(&load_dataset(&*self.store).await?);
    let weight = pre.error_weight();
    if weight > self.config.pre_validation_tolerance {
      let message = format!(
        "pre-validation found {weight} row(s) with errors (tolerance {})",
        self.config.pre_validation_tolerance
      );
      return Ok(self.gate_failure(run, message, Some(pre), None, false).await?);
    }
    if weight > 0 {
      self.alert(
        AlertSeverity::Warning,
        "pre-validation found errors",
        format!("{weight} row(s) with errors, within tolerance; continuing"),
      );
    }

    // Transform.
    self.advance(run, MigrationState::Transforming).await?;
    let (stats, cancelled) = self.transform_all(run, directory, cancel).await?;
    run.record.stats = stats;
    self.save(run).await?;

    if cancelled {
      let message = format!(
        "cancelled after {} of the records ({} migrated)",
        stats.processed, stats.migrated
      );
      return Ok(self.gate_failure(run, message, Some(pre), None, false).await?);
    }
    if stats.error_rate() > self.config.max_error_rate {
      let message = format!(
        "error rate {:.3} exceeds {:.3} ({} of {} records failed)",
        stats.error_rate(),
        self.config.max_error_rate,
        stats.errors,
        stats.processed
      );
      return Ok(self.gate_failure(run, message, Some(pre), None, false).await?);
    }

    // Post-validation.
    self.advance(run, MigrationState::PostValidating).await?;
    let post = self.validate(&load_dataset(&*self.store).await?);
    let regressions = regressions(&pre, &post);
    if !regressions.is_empty() {
      let message = format!(
        "post-validation regressed: {}; rollback to snapshot {} recommended",
        regressions.join(", "),
        snapshot.id
      );
      return Ok(self.gate_failure(run, message, Some(pre), Some(post), true).await?);
    }

    // Commit.
    self.advance(run, MigrationState::Committed).await?;
    let message = format!(
      "{} processed, {} migrated, {} skipped, {} errors",
      stats.processed, stats.migrated, stats.skipped, stats.errors
    );
    run.record.finish(MigrationStatus::Committed, Some(message.clone()));
    self.save(run).await?;
    self.alert(AlertSeverity::Info, "migration committed", message);

    Ok(MigrationOutcome {
      record:               run.record.clone(),
      state:                run.state,
      pre_validation:       Some(pre),
      post_validation:      Some(post),
      rollback_recommended: false,
    })
  }

  async fn transform_all(
    &self,
    run: &Run,
    directory: ParticipantDirectory,
    cancel: &CancellationToken,
  ) -> Result<(MigrationStats, bool)> {
    let workers = self.config.workers.max(1);
    let mut partitions: Vec<Vec<Item>> = vec![Vec::new(); workers];
    for item in self.load_items(run.record.kind).await? {
      let slot = item.partition_key().rem_euclid(workers as i64) as usize;
      partitions[slot].push(item);
    }

    let directory = Arc::new(directory);
    let mut set = JoinSet::new();
    for (worker, items) in partitions.into_iter().enumerate() {
      if items.is_empty() {
        continue;
      }
      set.spawn(run_partition(
        worker,
        self.store.clone(),
        self.transform.clone(),
        directory.clone(),
        items,
        self.config.batch_size,
        run.record.id,
        cancel.clone(),
      ));
    }

    let mut stats = MigrationStats::default();
    let mut cancelled = false;
    while let Some(joined) = set.join_next().await {
      let report = joined
        .map_err(|e| Error::Integrity(format!("transform worker aborted: {e}")))?;
      stats.merge(report.stats);
      cancelled |= report.cancelled;
    }
    Ok((stats, cancelled))
  }

  /// Move to `Failed` on a gate and report it as an outcome.
  async fn gate_failure(
    &self,
    run: &mut Run,
    message: String,
    pre_validation: Option<ValidationReport>,
    post_validation: Option<ValidationReport>,
    rollback_recommended: bool,
  ) -> Result<MigrationOutcome> {
    self.advance(run, MigrationState::Failed).await?;
    run.record.finish(MigrationStatus::Failed, Some(message.clone()));
    self.save(run).await?;
    self.alert(AlertSeverity::Critical, "migration failed", message);
    Ok(MigrationOutcome {
      record: run.record.clone(),
      state: run.state,
      pre_validation,
      post_validation,
      rollback_recommended,
    })
  }

  /// Best-effort bookkeeping after an unexpected error.
  async fn fail(&self, run: &mut Run, message: String) {
    if run.state.can_transition_to(MigrationState::Failed) {
      if let Err(e) = self.advance(run, MigrationState::Failed).await {
        tracing::error!(
          migration = %run.record.id,
          "could not record failure transition: {e}"
        );
      }
    }
    run.record.finish(MigrationStatus::Failed, Some(message.clone()));
    if let Err(e) = self.save(run).await {
      tracing::error!(migration = %run.record.id, "could not save failed record: {e}");
    }
    self.alert(AlertSeverity::Critical, "migration failed", message);
  }

  async fn save(&self, run: &Run) -> Result<()> {
    self.store.save_migration_record(&run.record).await.map_err(Error::store)
  }

  // ── Rollback ──────────────────────────────────────────────────────────────

  /// Restore the snapshot `backup_id` under the lock, as its own recorded
  /// run. A checksum mismatch fails fast with nothing restored.
  pub async fn rollback(&self, backup_id: Uuid) -> Result<MigrationRecord> {
    let mut run = Run {
      record:    MigrationRecord::start(MigrationKind::Rollback),
      state:     MigrationState::Idle,
      persisted: false,
    };
    run.record.backup_id = Some(backup_id);
    let owner = run.record.id;

    if !self.store.acquire_migration_lock(owner).await.map_err(Error::store)? {
      return Err(Error::Concurrency("migration lock is held; rollback refused".into()));
    }

    let result = self.rollback_locked(&mut run, backup_id).await;
    let result = match result {
      Ok(()) => Ok(run.record.clone()),
      Err(e) => {
        self.fail(&mut run, e.to_string()).await;
        Err(e)
      }
    };

    if let Err(e) = self.store.release_migration_lock(owner).await {
      tracing::error!(migration = %owner, "could not release migration lock: {e}");
    }
    result
  }

  async fn rollback_locked(&self, run: &mut Run, backup_id: Uuid) -> Result<()> {
    self.save(run).await?;
    run.persisted = true;
    self.advance(run, MigrationState::RollingBack).await?;

    let meta = self.backups.verify(backup_id).await?;
    let restored = self
      .backups
      .restore(backup_id, &meta.tables, Some(run.record.id))
      .await?;

    run.record.stats.processed = restored.records as u64;
    run.record.stats.migrated = restored.records as u64;
    self.advance(run, MigrationState::RolledBack).await?;
    run.record.finish(
      MigrationStatus::RolledBack,
      Some(format!("restored {} record(s) from snapshot {backup_id}", restored.records)),
    );
    self.save(run).await?;
    self.alert(
      AlertSeverity::Warning,
      "migration rolled back",
      format!("snapshot {backup_id} restored"),
    );
    Ok(())
  }
}

fn forward_only(kind: MigrationKind) -> Result<()> {
  if kind == MigrationKind::Rollback {
    return Err(Error::Input("rollback runs through MigrationEngine::rollback".into()));
  }
  Ok(())
}

/// Error-severity findings that are new or grew between two validations,
/// keyed by kind and entity.
pub fn regressions(pre: &ValidationReport, post: &ValidationReport) -> Vec<String> {
  type Weights = HashMap<(InconsistencyKind, Collection), usize>;

  fn weights(report: &ValidationReport) -> Weights {
    let mut out = HashMap::new();
    for issue in report.errors() {
      *out.entry((issue.kind, issue.entity)).or_insert(0) += issue.affected_count;
    }
    out
  }

  let before = weights(pre);
  let mut grown: Vec<String> = weights(post)
    .into_iter()
    .filter_map(|(key, after)| {
      let was = before.get(&key).copied().unwrap_or(0);
      (after > was).then(|| format!("{} on {} {was} -> {after}", key.0, key.1))
    })
    .collect();
  grown.sort();
  grown
}

#[cfg(test)]
mod tests {
  use ladder_core::{
    fixture::MatchStatus,
    league::{NewLeague, NewParticipant, ParticipantRef},
    store::MatchQuery,
    validate::CHECK_ORPHAN_MATCHES,
  };
  use ladder_store_sqlite::SqliteStore;
  use tempfile::TempDir;

  use super::*;
  use crate::{
    config::BackupConfig,
    testing::{Fixture, RecordingNotifier, fixture},
    transform::TransformError,
  };

  const UNMAPPED_TEAM: i64 = 999;

  fn engine(
    fx: &Fixture,
    dir: &TempDir,
    config: MigrationConfig,
  ) -> (MigrationEngine<SqliteStore>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let snapshots = dir.path().join("snapshots");
    let backups =
      BackupManager::new(fx.store.clone(), snapshots, BackupConfig::default());
    let engine =
      MigrationEngine::new(fx.store.clone(), backups, config, TiePolicy::Sequential)
        .with_notifier(notifier.clone());
    (engine, notifier)
  }

  /// 90 legacy matches between mapped teams plus 10 naming a team no club
  /// claims.
  async fn legacy_league() -> Fixture {
    let fx = fixture(10).await;
    for i in 0..90 {
      fx.play_legacy(i % 10, (i + 1) % 10, 1, 0).await;
    }
    for _ in 0..10 {
      fx.insert_match(ParticipantRef::team(UNMAPPED_TEAM), fx.team_ref(0), 0, 0).await;
    }
    fx
  }

  fn tolerant(max_error_rate: f64) -> MigrationConfig {
    MigrationConfig {
      batch_size: 7,
      workers: 3,
      pre_validation_tolerance: 10,
      max_error_rate,
    }
  }

  async fn club_ref_matches(fx: &Fixture) -> usize {
    fx.store
      .find_matches(&MatchQuery::default())
      .await
      .unwrap()
      .iter()
      .filter(|m| m.home.club_id.is_some() && m.home.team_id.is_none())
      .count()
  }

  #[test]
  fn transitions_follow_the_state_graph() {
    use MigrationState::*;
    assert!(Idle.can_transition_to(PreflightChecks));
    assert!(Idle.can_transition_to(RollingBack));
    assert!(PostValidating.can_transition_to(Committed));
    assert!(Transforming.can_transition_to(Failed));
    assert!(!Idle.can_transition_to(Transforming));
    assert!(!PreValidating.can_transition_to(Committed));
    assert!(!Committed.can_transition_to(Failed));
    assert!(!Failed.can_transition_to(RollingBack));
    assert!(!Idle.can_transition_to(Failed));
    assert!(RolledBack.is_terminal());
    assert_eq!(PreflightChecks.to_string(), "preflight_checks");
  }

  #[tokio::test]
  async fn commits_when_error_rate_is_within_limit() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let (engine, notifier) = engine(&fx, &dir, tolerant(0.1));

    let outcome = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap();
    assert!(outcome.committed(), "{:?}", outcome.record.message);
    assert_eq!(outcome.record.status, MigrationStatus::Committed);
    assert_eq!(
      outcome.record.stats,
      MigrationStats { processed: 100, migrated: 90, skipped: 0, errors: 10 }
    );
    assert!(!outcome.rollback_recommended);
    assert_eq!(club_ref_matches(&fx).await, 90);

    let backup_id = outcome.record.backup_id.unwrap();
    assert!(engine.backups.verify(backup_id).await.is_ok());

    let stored = fx.store.get_migration_record(outcome.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MigrationStatus::Committed);
    assert_eq!(stored.stats, outcome.record.stats);
    assert_eq!(stored.backup_id, Some(backup_id));
    assert!(fx.store.migration_lock().await.unwrap().is_none());

    let alerts = notifier.alerts();
    assert_eq!(alerts.last().unwrap().severity, AlertSeverity::Info);
  }

  #[tokio::test]
  async fn fails_when_error_rate_exceeds_limit() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let (engine, notifier) = engine(&fx, &dir, tolerant(0.05));

    let outcome = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.state, MigrationState::Failed);
    assert_eq!(outcome.record.status, MigrationStatus::Failed);
    assert!(outcome.record.message.as_deref().unwrap().contains("error rate"));
    assert!(!outcome.rollback_recommended);
    assert_eq!(notifier.alerts().last().unwrap().severity, AlertSeverity::Critical);
    assert!(fx.store.migration_lock().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn pre_validation_above_tolerance_stops_before_transform() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let config = MigrationConfig { pre_validation_tolerance: 9, ..tolerant(1.0) };
    let (engine, _) = engine(&fx, &dir, config);

    let outcome = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.state, MigrationState::Failed);
    let pre = outcome.pre_validation.unwrap();
    assert_eq!(pre.check(CHECK_ORPHAN_MATCHES).unwrap().affected(), 10);
    assert_eq!(outcome.record.stats, MigrationStats::default());
    assert_eq!(club_ref_matches(&fx).await, 0);
    // The snapshot was taken before the gate.
    assert!(outcome.record.backup_id.is_some());
  }

  /// Points every team reference at a club that does not exist.
  struct Misroute;

  impl RelationTransform for Misroute {
    fn name(&self) -> &str { "misroute" }

    fn transform_match(
      &self,
      m: &Match,
      _: &ParticipantDirectory,
    ) -> std::result::Result<Option<Match>, TransformError> {
      let mut out = m.clone();
      out.home = ParticipantRef::club(9_999);
      Ok(Some(out))
    }

    fn transform_standing(
      &self,
      _: &Standing,
      _: &ParticipantDirectory,
    ) -> std::result::Result<Option<Standing>, TransformError> {
      Ok(None)
    }
  }

  #[tokio::test]
  async fn post_validation_regression_recommends_rollback() {
    let fx = fixture(4).await;
    fx.play_legacy(0, 1, 2, 1).await;
    fx.play_legacy(2, 3, 0, 0).await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, MigrationConfig::default());
    let engine = engine.with_transform(Arc::new(Misroute));

    let outcome = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.state, MigrationState::Failed);
    assert!(outcome.rollback_recommended);
    let post = outcome.post_validation.unwrap();
    assert_eq!(post.check(CHECK_ORPHAN_MATCHES).unwrap().affected(), 2);

    // Nothing was rolled back automatically; the snapshot undoes the damage.
    engine.rollback(outcome.record.backup_id.unwrap()).await.unwrap();
    let after = load_dataset(&*fx.store).await.unwrap();
    assert!(!engine.validate(&after).has_errors());
  }

  #[tokio::test]
  async fn cancelled_run_fails_at_batch_boundary() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, tolerant(1.0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.run(MigrationKind::MatchRefs, cancel).await.unwrap();
    assert_eq!(outcome.state, MigrationState::Failed);
    assert_eq!(outcome.record.stats.migrated, 0);
    assert!(outcome.record.message.as_deref().unwrap().starts_with("cancelled"));
    assert_eq!(club_ref_matches(&fx).await, 0);
    assert!(fx.store.migration_lock().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn held_lock_refuses_without_writing() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, tolerant(1.0));
    let other = Uuid::new_v4();
    assert!(fx.store.acquire_migration_lock(other).await.unwrap());

    let err = 
      engine.run(MigrationKind::AllRefs, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Concurrency(_)));
    assert!(engine.backups.list().await.unwrap().is_empty());
    assert!(fx.store.list_migration_records(10).await.unwrap().is_empty());
    assert_eq!(fx.store.migration_lock().await.unwrap().unwrap().owner, other);

    let err = engine.rollback(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::Concurrency(_)));
  }

  #[tokio::test]
  async fn preflight_requires_a_legacy_mapping() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
      .create_league(NewLeague { slug: "l".into(), name: "L".into() })
      .await
      .unwrap();
    store.create_participant(NewParticipant::new("a", "A")).await.unwrap();
    let dir = TempDir::new().unwrap();
    let backups = BackupManager::new(store.clone(), dir.path(), BackupConfig::default());
    let config = MigrationConfig::default();
    let engine =
      MigrationEngine::new(store.clone(), backups, config, TiePolicy::Sequential);

    let err = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Referential(_)));
    assert!(store.list_migration_records(10).await.unwrap().is_empty());
    assert!(store.migration_lock().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn rollback_restores_pre_migration_state() {
    let fx = fixture(4).await;
    let legacy = fx.play_legacy(0, 1, 3, 0).await;
    fx.play_legacy(2, 3, 1, 1).await;
    let totals = ladder_core::standing::Totals::from_base(1, 0, 0, 3, 0);
    fx.standing(fx.team_ref(0), totals, 1).await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, MigrationConfig::default());

    let outcome = 
      engine.run(MigrationKind::AllRefs, CancellationToken::new()).await.unwrap();
    assert!(outcome.committed(), "{:?}", outcome.record.message);
    assert_eq!(outcome.record.stats.migrated, 3);
    let migrated = fx.store.get_match(legacy.id).await.unwrap().unwrap();
    assert_eq!(migrated.home, fx.club_ref(0));

    let record = engine.rollback(outcome.record.backup_id.unwrap()).await.unwrap();
    assert_eq!(record.kind, MigrationKind::Rollback);
    assert_eq!(record.status, MigrationStatus::RolledBack);
    assert_eq!(record.backup_id, outcome.record.backup_id);

    let restored = fx.store.get_match(legacy.id).await.unwrap().unwrap();
    assert_eq!(restored.home, fx.team_ref(0));
    assert_eq!(restored.status, MatchStatus::Finished);

    let status = engine.status().await.unwrap();
    assert!(status.lock.is_none());
    assert_eq!(status.recent[0].id, record.id);
    assert_eq!(status.recent[1].id, outcome.record.id);
  }

  #[tokio::test]
  async fn corrupted_snapshot_fails_rollback_fast() {
    let fx = fixture(2).await;
    let m = fx.play_legacy(0, 1, 1, 0).await;
    let dir = TempDir::new().unwrap();
    let (engine, notifier) = engine(&fx, &dir, MigrationConfig::default());
    let outcome = 
      engine.run(MigrationKind::MatchRefs, CancellationToken::new()).await.unwrap();
    let backup_id = outcome.record.backup_id.unwrap();

    let path = engine.backups.payload_path(backup_id);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = engine.rollback(backup_id).await.unwrap_err();
    assert!(
      matches!(err, Error::Checksum { snapshot_id, .. } if snapshot_id == backup_id)
    );
    assert_eq!(fx.store.get_match(m.id).await.unwrap().unwrap().home, fx.club_ref(0));

    let latest = &fx.store.list_migration_records(1).await.unwrap()[0];
    assert_eq!(latest.kind, MigrationKind::Rollback);
    assert_eq!(latest.status, MigrationStatus::Failed);
    assert!(fx.store.migration_lock().await.unwrap().is_none());
    assert_eq!(notifier.alerts().last().unwrap().severity, AlertSeverity::Critical);
  }

  #[tokio::test]
  async fn plan_counts_without_writing() {
    let fx = legacy_league().await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, tolerant(0.05));

    let plan = engine.plan(MigrationKind::AllRefs).await.unwrap();
    assert_eq!(plan.transform, "team_to_club");
    assert!(plan.passes_pre_check);
    assert_eq!(
      plan.planned,
      MigrationStats { processed: 100, migrated: 90, skipped: 0, errors: 10 }
    );
    assert_eq!(club_ref_matches(&fx).await, 0);
    assert!(fx.store.list_migration_records(10).await.unwrap().is_empty());
    assert!(!engine.backups.dir().exists());
  }

  #[tokio::test]
  async fn rollback_kind_is_not_a_forward_run() {
    let fx = fixture(1).await;
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&fx, &dir, MigrationConfig::default());
    let err = 
      engine.run(MigrationKind::Rollback, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Input(_)));
  }

  #[test]
  fn regressions_compare_error_weight_per_kind() {
    use ladder_core::{inconsistency::Inconsistency, validate::{CheckGroup, CheckOutcome}};

    let report = |ids: Vec<i64>| ValidationReport {
      checks: vec![CheckOutcome {
        name:   CHECK_ORPHAN_MATCHES.into(),
        group:  CheckGroup::Referential,
        issues: vec![Inconsistency::new(
          InconsistencyKind::OrphanMatch,
          Collection::Matches,
          "orphans",
          ids,
        )],
      }],
    };
    assert!(regressions(&report(vec![1, 2]), &report(vec![1])).is_empty());
    assert_eq!(
      regressions(&report(vec![1]), &report(vec![1, 2])),
      vec!["orphan_match on matches 1 -> 2".to_string()]
    );
  }
}

//! Guarded, idempotent remediation of fixable inconsistencies.
//!
//! Categories run in a fixed order: orphans, duplicates, negative values,
//! arithmetic, self-play. Each category re-reads its target rows, skips rows
//! that no longer need the fix, and writes the rest in one atomic batch
//! together with before/after audit entries. Running the engine twice in a
//! row therefore changes nothing the second time.

use std::{
  collections::{BTreeMap, BTreeSet, HashSet},
  sync::Arc,
};

use chrono::Utc;
use ladder_core::{
  audit::{AuditAction, AuditEntry},
  calculator::TiePolicy,
  fixture::{Match, MatchStatus},
  inconsistency::{Collection, Inconsistency, InconsistencyKind},
  league::ParticipantDirectory,
  standing::{SOURCE_REPAIR, Standing},
  store::{LeagueStore, StandingQuery, WriteOp},
  validate::{ConsistencyValidator, is_self_play},
};
use serde::Serialize;

use crate::{Error, Result, config::RepairConfig, dataset::load_dataset};

const ACTOR: &str = "repair";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOptions {
  /// Report what would change without writing.
  pub dry_run: bool,
  /// Proceed even when unfixable errors exceed the tolerance.
  pub force:   bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairCategory {
  Orphans,
  Duplicates,
  NegativeValues,
  Arithmetic,
  SelfPlay,
}

impl RepairCategory {
  /// Execution order.
  pub const ORDER: [RepairCategory; 5] = [
    Self::Orphans,
    Self::Duplicates,
    Self::NegativeValues,
    Self::Arithmetic,
    Self::SelfPlay,
  ];

  fn handles(self, kind: InconsistencyKind) -> bool {
    use InconsistencyKind as K;
    match self {
      Self::Orphans => matches!(kind, K::OrphanStanding | K::OrphanMatch),
      Self::Duplicates => kind == K::DuplicateStandings,
      Self::NegativeValues => kind == K::NegativeValues,
      Self::Arithmetic => kind == K::ArithmeticMismatch,
      Self::SelfPlay => kind == K::SelfPlay,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryOutcome {
  pub category: RepairCategory,
  /// Rows reported by validation.
  pub targeted: usize,
  /// Rows changed (or, in a dry run, that would change).
  pub fixed:    usize,
  /// Targeted rows that no longer needed the fix.
  pub skipped:  usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
  pub dry_run:    bool,
  pub categories: Vec<CategoryOutcome>,
}

impl RepairReport {
  pub fn total_fixed(&self) -> usize { self.categories.iter().map(|c| c.fixed).sum() }
}

/// The writes one category wants to make.
#[derive(Default)]
struct Plan {
  ops:     Vec<WriteOp>,
  fixed:   usize,
  skipped: usize,
}

impl Plan {
  fn change(&mut self, op: WriteOp, audit: AuditEntry) {
    self.ops.push(op);
    self.ops.push(WriteOp::AppendAudit(audit));
    self.fixed += 1;
  }
}

/// Reference data that repairs never modify.
struct References {
  directory: ParticipantDirectory,
  leagues:   HashSet<i64>,
  seasons:   HashSet<i64>,
}

impl References {
  fn standing_is_orphan(&self, s: &Standing) -> bool {
    !self.leagues.contains(&s.league_id)
      || !self.seasons.contains(&s.season_id)
      || self.directory.resolve(&s.participant).is_none()
  }

  fn match_is_orphan(&self, m: &Match) -> bool {
    !self.leagues.contains(&m.league_id)
      || !self.seasons.contains(&m.season_id)
      || self.directory.resolve(&m.home).is_none()
      || self.directory.resolve(&m.away).is_none()
  }
}

pub struct RepairEngine<S> {
  store:      Arc<S>,
  config:     RepairConfig,
  tie_policy: TiePolicy,
}

impl<S: LeagueStore> RepairEngine<S> {
  pub fn new(store: Arc<S>, config: RepairConfig, tie_policy: TiePolicy) -> Self {
    Self { store, config, tie_policy }
  }

  /// Validate the store and repair what was found.
  pub async fn repair(&self, options: RepairOptions) -> Result<RepairReport> {
    let data = load_dataset(&*self.store).await?;
    let report = ConsistencyValidator::new(self.tie_policy).validate(&data);
    let issues: Vec<Inconsistency> = report.issues().cloned().collect();
    self.apply_fixes(&issues, options).await
  }

  /// Act on the fixable entries of `issues`.
  pub async fn apply_fixes(
    &self,
    issues: &[Inconsistency],
    options: RepairOptions,
  ) -> Result<RepairReport> {
    if let Some(lock) = self.store.migration_lock().await.map_err(Error::store)? {
      return Err(Error::Concurrency(format!(
        "migration {} holds the lock; repair refused",
        lock.owner
      )));
    }

    let blocking = unfixable_weight(issues);
    if blocking > self.config.error_tolerance {
      if !options.force {
        return Err(Error::Integrity(format!(
          "{blocking} row(s) have errors repair cannot fix (tolerance {})",
          self.config.error_tolerance
        )));
      }
      tracing::warn!(blocking, "forcing repair past unfixable errors");
    }

    let refs = self.references().await?;
    let mut categories = Vec::with_capacity(RepairCategory::ORDER.len());

    for category in RepairCategory::ORDER {
      let targets: Vec<(Collection, i64)> = issues
        .iter()
        .filter(|i| i.fixable && category.handles(i.kind))
        .flat_map(|i| i.records.iter().map(move |id| (i.entity, *id)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
      if targets.is_empty() {
        continue;
      }

      let plan = match category {
        RepairCategory::Orphans => self.plan_orphans(&targets, &refs).await?,
        RepairCategory::Duplicates => self.plan_duplicates(&targets, &refs).await?,
        RepairCategory::NegativeValues => self.plan_negatives(&targets).await?,
        RepairCategory::Arithmetic => self.plan_arithmetic(&targets).await?,
        RepairCategory::SelfPlay => self.plan_self_play(&targets, &refs).await?,
      };

      if !options.dry_run && !plan.ops.is_empty() {
        self.store.apply(plan.ops).await.map_err(Error::store)?;
      }
      tracing::info!(
        ?category,
        targeted = targets.len(),
        fixed = plan.fixed,
        skipped = plan.skipped,
        dry_run = options.dry_run,
        "repair category finished"
      );
      categories.push(CategoryOutcome {
        category,
        targeted: targets.len(),
        fixed: plan.fixed,
        skipped: plan.skipped,
      });
    }

    Ok(RepairReport { dry_run: options.dry_run, categories })
  }

  async fn references(&self) -> Result<References> {
    let leagues = self.store.list_leagues().await.map_err(Error::store)?;
    let seasons = self.store.list_seasons(None).await.map_err(Error::store)?;
    let participants = self.store.list_participants().await.map_err(Error::store)?;
    Ok(References {
      directory: ParticipantDirectory::new(participants),
      leagues:   leagues.into_iter().map(|l| l.id).collect(),
      seasons:   seasons.into_iter().map(|s| s.id).collect(),
    })
  }

  // ── Categories ────────────────────────────────────────────────────────────

  async fn plan_orphans(
    &self,
    targets: &[(Collection, i64)],
    refs: &References,
  ) -> Result<Plan> {
    let mut plan = Plan::default();
    for (entity, id) in targets {
      match entity {
        Collection::Standings => {
          match self.store.get_standing(*id).await.map_err(Error::store)? {
            Some(s) if refs.standing_is_orphan(&s) => plan.change(
              WriteOp::DeleteStanding(s.id),
              AuditEntry::new(ACTOR, AuditAction::Delete, "deleted orphan standing")
                .on(Collection::Standings, Some(s.id))
                .before(&s),
            ),
            _ => plan.skipped += 1,
          }
        }
        Collection::Matches => {
          match self.store.get_match(*id).await.map_err(Error::store)? {
            Some(m) if refs.match_is_orphan(&m) => plan.change(
              WriteOp::DeleteMatch(m.id),
              AuditEntry::new(ACTOR, AuditAction::Delete, "deleted orphan match")
                .on(Collection::Matches, Some(m.id))
                .before(&m),
            ),
            _ => plan.skipped += 1,
          }
        }
        _ => plan.skipped += 1,
      }
    }
    Ok(plan)
  }

  /// Keep the lowest id of every (participant, league, season) key that one
  /// of `targets` belongs to.
  async fn plan_duplicates(
    &self,
    targets: &[(Collection, i64)],
    refs: &References,
  ) -> Result<Plan> {
    let wanted: HashSet<i64> = targets.iter().map(|(_, id)| *id).collect();
    let all = self
      .store
      .find_standings(&StandingQuery::default())
      .await
      .map_err(Error::store)?;

    let mut groups: BTreeMap<(i64, i64, i64), Vec<Standing>> = BTreeMap::new();
    for s in all {
      if let Some(pid) = refs.directory.resolve_id(&s.participant) {
        groups.entry((pid, s.league_id, s.season_id)).or_default().push(s);
      }
    }

    let mut plan = Plan::default();
    let mut seen = HashSet::new();
    for rows in groups.into_values() {
      if !rows.iter().any(|s| wanted.contains(&s.id)) {
        continue;
      }
      // Ordered by id, so the first row is the keeper.
      for s in rows.into_iter().skip(1) {
        seen.insert(s.id);
        plan.change(
          WriteOp::DeleteStanding(s.id),
          AuditEntry::new(ACTOR, AuditAction::Delete, "deleted duplicate standing")
            .on(Collection::Standings, Some(s.id))
            .before(&s),
        );
      }
    }
    plan.skipped = wanted.iter().filter(|id| !seen.contains(id)).count();
    Ok(plan)
  }

  async fn plan_negatives(&self, targets: &[(Collection, i64)]) -> Result<Plan> {
    self
      .plan_standing_updates(targets, "clamped negative counters", |s| {
        (s.totals.has_negative() || s.rank < 0).then(|| {
          let mut fixed = s.clone();
          fixed.totals = s.totals.clamped();
          fixed.rank = s.rank.max(0);
          fixed
        })
      })
      .await
  }

  async fn plan_arithmetic(&self, targets: &[(Collection, i64)]) -> Result<Plan> {
    self
      .plan_standing_updates(targets, "recomputed derived fields", |s| {
        (!s.totals.is_consistent()).then(|| {
          let mut fixed = s.clone();
          fixed.totals = s.totals.recomputed();
          fixed
        })
      })
      .await
  }

  async fn plan_standing_updates(
    &self,
    targets: &[(Collection, i64)],
    message: &str,
    fix: impl Fn(&Standing) -> Option<Standing>,
  ) -> Result<Plan> {
    let mut plan = Plan::default();
    for (entity, id) in targets {
      if *entity != Collection::Standings {
        plan.skipped += 1;
        continue;
      }
      let Some(current) = self.store.get_standing(*id).await.map_err(Error::store)? else {
        plan.skipped += 1;
        continue;
      };
      match fix(&current) {
        Some(mut fixed) => {
          fixed.calculation_source = SOURCE_REPAIR.to_owned();
          fixed.last_updated = Utc::now();
          let audit = AuditEntry::new(ACTOR, AuditAction::Update, message)
            .on(Collection::Standings, Some(fixed.id))
            .before(&current)
            .after(&fixed);
          plan.change(WriteOp::UpdateStanding(fixed), audit);
        }
        None => plan.skipped += 1,
      }
    }
    Ok(plan)
  }

  async fn plan_self_play(
    &self,
    targets: &[(Collection, i64)],
    refs: &References,
  ) -> Result<Plan> {
    let mut plan = Plan::default();
    for (entity, id) in targets {
      if *entity != Collection::Matches {
        plan.skipped += 1;
        continue;
      }
      match self.store.get_match(*id).await.map_err(Error::store)? {
        Some(m) if is_self_play(&m, &refs.directory) => {
          let mut cancelled = m.clone();
          cancelled.status = MatchStatus::Cancelled;
          cancelled.updated_at = Utc::now();
          let audit =
            AuditEntry::new(ACTOR, AuditAction::Cancel, "cancelled self-play match")
              .on(Collection::Matches, Some(m.id))
              .before(&m)
              .after(&cancelled);
          plan.change(WriteOp::UpdateMatch(cancelled), audit);
        }
        _ => plan.skipped += 1,
      }
    }
    Ok(plan)
  }
}

/// Rows in error-severity findings repair cannot fix, excluding rows that a
/// fixable finding also covers (a clamped row usually also drifts).
pub fn unfixable_weight(issues: &[Inconsistency]) -> usize {
  let fixable: HashSet<(Collection, i64)> = issues
    .iter()
    .filter(|i| i.fixable)
    .flat_map(|i| i.records.iter().map(move |id| (i.entity, *id)))
    .collect();
  issues
    .iter()
    .filter(|i| i.is_error() && !i.fixable)
    .flat_map(|i| i.records.iter().map(move |id| (i.entity, *id)))
    .filter(|key| !fixable.contains(key))
    .collect::<HashSet<_>>()
    .len()
}

#[cfg(test)]
mod tests {
  use ladder_core::{
    audit::AuditQuery,
    fixture::NewMatch,
    league::ParticipantRef,
    standing::Totals,
  };
  use uuid::Uuid;

  use super::*;
  use crate::testing::{Fixture, fixture};

  fn engine(fx: &Fixture) -> RepairEngine<ladder_store_sqlite::SqliteStore> {
    RepairEngine::new(fx.store.clone(), RepairConfig::default(), TiePolicy::Sequential)
  }

  type Corrupted = (Standing, Standing, Standing, Standing, Standing, Match);

  /// One problem per category. Returns the rows involved.
  async fn corrupt(fx: &Fixture) -> Corrupted {
    let negative = fx
      .standing(
        fx.club_ref(0),
        Totals {
          played:        -1,
          wins:          -1,
          draws:         0,
          losses:        0,
          goals_for:     0,
          goals_against: 0,
          goal_diff:     0,
          points:        -3,
        },
        1,
      )
      .await;
    let mut wrong_points = Totals::default();
    wrong_points.points = 99;
    let arithmetic = fx.standing(fx.club_ref(1), wrong_points, 2).await;
    let keeper = fx.standing(fx.club_ref(2), Totals::default(), 3).await;
    let duplicate = fx.standing(fx.club_ref(2), Totals::default(), 4).await;
    let orphan = fx.standing(ParticipantRef::club(9_999), Totals::default(), 5).await;
    let self_play = fx
      .store
      .create_match(NewMatch::scheduled(
        fx.league.id,
        fx.season.id,
        2,
        fx.club_ref(1),
        fx.team_ref(1),
      ))
      .await
      .unwrap();
    (negative, arithmetic, keeper, duplicate, orphan, self_play)
  }

  #[tokio::test]
  async fn repairs_every_category_then_is_a_no_op() {
    let fx = fixture(3).await;
    let (negative, arithmetic, keeper, duplicate, orphan, self_play) = corrupt(&fx).await;
    let repair = engine(&fx);

    let report = repair.repair(RepairOptions::default()).await.unwrap();
    let order: Vec<_> = report.categories.iter().map(|c| c.category).collect();
    assert_eq!(order, RepairCategory::ORDER.to_vec());
    assert_eq!(report.total_fixed(), 5);

    let store = &fx.store;
    assert!(store.get_standing(orphan.id).await.unwrap().is_none());
    assert!(store.get_standing(duplicate.id).await.unwrap().is_none());
    assert!(store.get_standing(keeper.id).await.unwrap().is_some());

    let clamped = store.get_standing(negative.id).await.unwrap().unwrap();
    assert_eq!(clamped.totals, Totals::default());
    assert_eq!(clamped.calculation_source, SOURCE_REPAIR);

    let recomputed = store.get_standing(arithmetic.id).await.unwrap().unwrap();
    assert_eq!(recomputed.totals.points, 0);

    let cancelled = store.get_match(self_play.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, MatchStatus::Cancelled);

    let trail = store
      .list_audit(&AuditQuery { actor: Some(ACTOR.into()), ..Default::default() })
      .await
      .unwrap();
    assert_eq!(trail.len(), 5);
    assert!(trail.iter().all(|e| e.before.is_some()));

    let again = repair.repair(RepairOptions::default()).await.unwrap();
    assert_eq!(again.total_fixed(), 0);
    let trail_after = store.list_audit(&AuditQuery::default()).await.unwrap();
    assert_eq!(trail_after.len(), 5);
  }

  #[tokio::test]
  async fn dry_run_reports_without_writing() {
    let fx = fixture(3).await;
    let (negative, ..) = corrupt(&fx).await;

    let report = engine(&fx)
      .repair(RepairOptions { dry_run: true, force: false })
      .await
      .unwrap();
    assert!(report.dry_run);
    assert!(report.total_fixed() >= 5);

    let untouched = fx.store.get_standing(negative.id).await.unwrap().unwrap();
    assert_eq!(untouched, negative);
    assert!(fx.store.list_audit(&AuditQuery::default()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn refuses_while_a_migration_holds_the_lock() {
    let fx = fixture(3).await;
    corrupt(&fx).await;
    assert!(fx.store.acquire_migration_lock(Uuid::new_v4()).await.unwrap());

    let err = engine(&fx).repair(RepairOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Concurrency(_)));
    assert!(fx.store.list_audit(&AuditQuery::default()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn unfixable_errors_above_tolerance_need_force() {
    let fx = fixture(1).await;
    // Consistent, but no match backs the win: drift only.
    fx.standing(fx.club_ref(0), Totals::from_base(1, 0, 0, 1, 0), 1).await;
    let repair = engine(&fx);

    let err = repair.repair(RepairOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));

    let forced = repair
      .repair(RepairOptions { dry_run: false, force: true })
      .await
      .unwrap();
    assert_eq!(forced.total_fixed(), 0);
  }

  #[test]
  fn rows_covered_by_a_fix_do_not_block() {
    let drift = Inconsistency::new(
      InconsistencyKind::StandingsDrift,
      Collection::Standings,
      "drift",
      vec![1, 2],
    );
    let negative = Inconsistency::new(
      InconsistencyKind::NegativeValues,
      Collection::Standings,
      "negative",
      vec![1],
    );
    assert_eq!(unfixable_weight(&[drift.clone()]), 2);
    assert_eq!(unfixable_weight(&[drift, negative]), 1);
  }
}

//! Persisting a full standings recompute for one league and season.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use ladder_core::{
  audit::{AuditAction, AuditEntry},
  calculator::{StandingsCalculator, TiePolicy},
  inconsistency::{Collection, Inconsistency},
  league::{Participant, ParticipantDirectory, ParticipantRef},
  standing::{NewStanding, SOURCE_AUTO, Standing},
  store::{LeagueStore, MatchQuery, StandingQuery, WriteOp},
};
use serde::Serialize;

use crate::{Error, Result};

const ACTOR: &str = "recalculate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecalcReport {
  pub league_id: i64,
  pub season_id: i64,
  pub dry_run:   bool,
  pub created:   usize,
  pub updated:   usize,
  pub unchanged: usize,
  /// Extra rows for an already-covered participant.
  pub removed:   usize,
  /// Manual overrides left as they were.
  pub manual:    usize,
  /// Matches the calculator could not count.
  pub rejected:  Vec<Inconsistency>,
}

pub struct Recalculator<S> {
  store:      Arc<S>,
  calculator: StandingsCalculator,
}

impl<S: LeagueStore> Recalculator<S> {
  pub fn new(store: Arc<S>, tie_policy: TiePolicy) -> Self {
    Self { store, calculator: StandingsCalculator::new(tie_policy) }
  }

  /// Recompute the table for `(league_id, season_id)` and write it in one
  /// atomic batch. Rows are addressed by club reference; a row found under
  /// the legacy scheme is rewritten in place. Refused while a migration
  /// holds the lock, dry runs included.
  pub async fn recalculate(
    &self,
    league_id: i64,
    season_id: i64,
    dry_run: bool,
  ) -> Result<RecalcReport> {
    if let Some(lock) = self.store.migration_lock().await.map_err(Error::store)? {
      return Err(Error::Concurrency(format!(
        "migration {} holds the lock; recalculation refused",
        lock.owner
      )));
    }

    let season = self
      .store
      .get_season(season_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::Referential(format!("season {season_id} does not exist")))?;
    if season.league_id != league_id {
      return Err(Error::Input(format!(
        "season {season_id} belongs to league {}, not {league_id}",
        season.league_id
      )));
    }

    let participants = self.store.list_participants().await.map_err(Error::store)?;
    let directory = ParticipantDirectory::new(participants);
    let roster: Vec<Participant> = season
      .roster
      .iter()
      .filter_map(|id| {
        let found = directory.get(*id).cloned();
        if found.is_none() {
          tracing::warn!(
            participant = id,
            season = season_id,
            "roster entry has no participant"
          );
        }
        found
      })
      .collect();

    let matches = self
      .store
      .find_matches(&MatchQuery {
        league_id: Some(league_id),
        season_id: Some(season_id),
        ..Default::default()
      })
      .await
      .map_err(Error::store)?;
    let calculation = self.calculator.calculate(league_id, season_id, &roster, &matches);

    let existing = self
      .store
      .find_standings(&StandingQuery {
        league_id: Some(league_id),
        season_id: Some(season_id),
        ..Default::default()
      })
      .await
      .map_err(Error::store)?;
    let mut by_participant: BTreeMap<i64, Vec<Standing>> = BTreeMap::new();
    for s in existing {
      if let Some(pid) = directory.resolve_id(&s.participant) {
        by_participant.entry(pid).or_default().push(s);
      }
    }

    let mut report = RecalcReport {
      league_id,
      season_id,
      dry_run,
      rejected: calculation.rejected.clone(),
      ..Default::default()
    };
    let mut ops = Vec::new();
    let now = Utc::now();

    for computed in &calculation.standings {
      let mut rows = by_participant.remove(&computed.participant_id).unwrap_or_default();
      let extras = if rows.len() > 1 { rows.split_off(1) } else { Vec::new() };
      for extra in extras {
        report.removed += 1;
        ops.push(WriteOp::DeleteStanding(extra.id));
        ops.push(WriteOp::AppendAudit(
          AuditEntry::new(ACTOR, AuditAction::Delete, "removed extra standing row")
            .on(Collection::Standings, Some(extra.id))
            .before(&extra),
        ));
      }

      let participant = ParticipantRef::club(computed.participant_id);
      match rows.pop() {
        Some(current) if !current.auto_calculated => report.manual += 1,
        Some(current) => {
          let mut desired = current.clone();
          desired.participant = participant;
          desired.totals = computed.totals;
          desired.rank = computed.rank;
          desired.calculation_source = SOURCE_AUTO.to_owned();
          if desired == current {
            report.unchanged += 1;
            continue;
          }
          desired.last_updated = now;
          report.updated += 1;
          ops.push(WriteOp::AppendAudit(
            AuditEntry::new(ACTOR, AuditAction::Update, "recalculated standing")
              .on(Collection::Standings, Some(current.id))
              .before(&current)
              .after(&desired),
          ));
          ops.push(WriteOp::UpdateStanding(desired));
        }
        None => {
          let row = NewStanding::empty(participant, league_id, season_id)
            .with_totals(computed.totals)
            .with_rank(computed.rank);
          report.created += 1;
          ops.push(WriteOp::AppendAudit(
            AuditEntry::new(ACTOR, AuditAction::Insert, "created standing")
              .on(Collection::Standings, None)
              .after(&computed),
          ));
          ops.push(WriteOp::InsertStanding(row));
        }
      }
    }

    if !dry_run && !ops.is_empty() {
      self.store.apply(ops).await.map_err(Error::store)?;
    }
    tracing::info!(
      league = league_id,
      season = season_id,
      created = report.created,
      updated = report.updated,
      unchanged = report.unchanged,
      removed = report.removed,
      dry_run,
      "standings recalculated"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use ladder_core::{
    standing::Totals,
    validate::{CHECK_DRIFT, ConsistencyValidator},
  };

  use uuid::Uuid;

  use super::*;
  use crate::{dataset::load_dataset, testing::fixture};

  #[tokio::test]
  async fn writes_a_row_per_roster_participant() {
    let fx = fixture(4).await;
    // A 3-1 B, C 2-2 D.
    fx.play(0, 1, 3, 1).await;
    fx.play(2, 3, 2, 2).await;
    let recalc = Recalculator::new(fx.store.clone(), TiePolicy::Sequential);

    let report = recalc.recalculate(fx.league.id, fx.season.id, false).await.unwrap();
    assert_eq!(report.created, 4);

    let rows = fx
      .store
      .find_standings(&StandingQuery::default())
      .await
      .unwrap();
    assert_eq!(rows.len(), 4);
    let a = rows.iter().find(|s| s.participant == fx.club_ref(0)).unwrap();
    assert_eq!(a.totals, Totals::from_base(1, 0, 0, 3, 1));
    assert_eq!(a.rank, 1);
    assert!(a.auto_calculated);
    assert_eq!(a.calculation_source, SOURCE_AUTO);

    let data = load_dataset(&*fx.store).await.unwrap();
    let validation = ConsistencyValidator::new(TiePolicy::Sequential).validate(&data);
    assert!(!validation.has_errors(), "{validation:?}");

    let again = recalc.recalculate(fx.league.id, fx.season.id, false).await.unwrap();
    assert_eq!(again.unchanged, 4);
    assert_eq!(again.created + again.updated + again.removed, 0);
  }

  #[tokio::test]
  async fn fixes_drift_and_rewrites_legacy_rows() {
    let fx = fixture(2).await;
    fx.play(0, 1, 1, 0).await;
    let legacy = fx.standing(fx.team_ref(0), Totals::default(), 2).await;
    let extra = fx.standing(fx.club_ref(0), Totals::default(), 1).await;
    let recalc = Recalculator::new(fx.store.clone(), TiePolicy::Sequential);

    let data = load_dataset(&*fx.store).await.unwrap();
    let before = ConsistencyValidator::default().validate(&data);
    assert!(!before.check(CHECK_DRIFT).unwrap().passed());

    let report = recalc.recalculate(fx.league.id, fx.season.id, false).await.unwrap();
    assert_eq!((report.updated, report.removed, report.created), (1, 1, 1));

    let kept = fx.store.get_standing(legacy.id).await.unwrap().unwrap();
    assert_eq!(kept.participant, fx.club_ref(0));
    assert_eq!(kept.totals.points, 3);
    assert!(fx.store.get_standing(extra.id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn dry_run_and_manual_rows_are_left_alone() {
    let fx = fixture(2).await;
    fx.play(0, 1, 0, 2).await;
    let mut manual = fx.standing(fx.club_ref(0), Totals::default(), 1).await;
    manual.auto_calculated = false;
    fx.store.apply(vec![WriteOp::UpdateStanding(manual.clone())]).await.unwrap();
    let recalc = Recalculator::new(fx.store.clone(), TiePolicy::Sequential);

    let dry = recalc.recalculate(fx.league.id, fx.season.id, true).await.unwrap();
    assert_eq!((dry.manual, dry.created), (1, 1));
    let rows = fx.store.find_standings(&StandingQuery::default()).await.unwrap();
    assert_eq!(rows.len(), 1);

    recalc.recalculate(fx.league.id, fx.season.id, false).await.unwrap();
    assert_eq!(fx.store.get_standing(manual.id).await.unwrap().unwrap(), manual);
  }

  #[tokio::test]
  async fn unknown_season_is_referential() {
    let fx = fixture(1).await;
    let recalc = Recalculator::new(fx.store.clone(), TiePolicy::Sequential);
    let err = recalc.recalculate(fx.league.id, 4_242, false).await.unwrap_err();
    assert!(matches!(err, Error::Referential(_)));
  }

  #[tokio::test]
  async fn refused_while_a_migration_holds_the_lock() {
    let fx = fixture(2).await;
    fx.play(0, 1, 2, 0).await;
    let recalc = Recalculator::new(fx.store.clone(), TiePolicy::Sequential);
    let owner = Uuid::new_v4();
    assert!(fx.store.acquire_migration_lock(owner).await.unwrap());

    for dry_run in [false, true] {
      let result = recalc.recalculate(fx.league.id, fx.season.id, dry_run).await;
      let err = result.unwrap_err();
      assert!(matches!(err, Error::Concurrency(_)));
    }
    assert!(fx.store.find_standings(&StandingQuery::default()).await.unwrap().is_empty());

    fx.store.release_migration_lock(owner).await.unwrap();
    let report = recalc.recalculate(fx.league.id, fx.season.id, false).await.unwrap();
    assert_eq!(report.created, 2);
  }
}

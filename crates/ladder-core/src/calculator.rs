//! The standings calculator: finished matches in, ranked standings out.
//!
//! Standings are always recomputed from scratch. Nothing here patches an
//! existing table, so a stored table can never drift from its matches without
//! the validator noticing.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{
  fixture::Match,
  inconsistency::{Collection, Inconsistency, InconsistencyKind},
  league::{Participant, ParticipantDirectory},
  standing::Totals,
};

/// How ranks are assigned when participants are level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
  /// Ranks are always 1..N and unique; level participants are separated by
  /// name, then by id.
  #[default]
  Sequential,
  /// Before anyone has played, every participant shares rank 1. Once a
  /// single match counts, ranks are sequential.
  SharedAtSeasonStart,
}

/// One computed row of a league table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedStanding {
  pub participant_id: i64,
  pub name:           String,
  pub totals:         Totals,
  pub rank:           i64,
}

/// The result of one calculation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calculation {
  pub league_id: i64,
  pub season_id: i64,
  /// Ordered by rank.
  pub standings: Vec<ComputedStanding>,
  /// Matches excluded from aggregation, with the reason.
  pub rejected:  Vec<Inconsistency>,
}

impl Calculation {
  pub fn get(&self, participant_id: i64) -> Option<&ComputedStanding> {
    self
      .standings
      .iter()
      .find(|s| s.participant_id == participant_id)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandingsCalculator {
  tie_policy: TiePolicy,
}

impl StandingsCalculator {
  pub fn new(tie_policy: TiePolicy) -> Self { Self { tie_policy } }

  pub fn tie_policy(&self) -> TiePolicy { self.tie_policy }

  /// Compute the table for one league and season.
  ///
  /// `roster` is the full participant list for the pair; every roster entry
  /// gets a row even without matches. `matches` may contain fixtures of
  /// other pairs or in other states; those are ignored.
  pub fn calculate(
    &self,
    league_id: i64,
    season_id: i64,
    roster: &[Participant],
    matches: &[Match],
  ) -> Calculation {
    let directory = ParticipantDirectory::new(roster.iter().cloned());
    let mut totals: BTreeMap<i64, Totals> =
      roster.iter().map(|p| (p.id, Totals::default())).collect();

    let mut invalid_scores = Vec::new();
    let mut unresolved = Vec::new();
    let mut self_play = Vec::new();

    for m in matches {
      if m.league_id != league_id || m.season_id != season_id || !m.is_finished()
      {
        continue;
      }
      let Some((home_goals, away_goals)) = m.final_score() else {
        invalid_scores.push(m.id);
        continue;
      };
      let (Some(home), Some(away)) =
        (directory.resolve_id(&m.home), directory.resolve_id(&m.away))
      else {
        unresolved.push(m.id);
        continue;
      };
      if home == away {
        self_play.push(m.id);
        continue;
      }
      if let Some(t) = totals.get_mut(&home) {
        t.record_result(home_goals, away_goals);
      }
      if let Some(t) = totals.get_mut(&away) {
        t.record_result(away_goals, home_goals);
      }
    }

    let mut standings: Vec<ComputedStanding> = totals
      .into_iter()
      .filter_map(|(id, totals)| {
        directory.get(id).map(|p| ComputedStanding {
          participant_id: id,
          name: p.name.clone(),
          totals,
          rank: 0,
        })
      })
      .collect();

    standings.sort_by(table_order);
    self.assign_ranks(&mut standings);

    let mut rejected = Vec::new();
    if !invalid_scores.is_empty() {
      rejected.push(Inconsistency::new(
        InconsistencyKind::InvalidScore,
        Collection::Matches,
        format!(
          "{} finished match(es) in league {league_id} season {season_id} have \
           a missing or negative score and were not counted",
          invalid_scores.len()
        ),
        invalid_scores,
      ));
    }
    if !unresolved.is_empty() {
      rejected.push(Inconsistency::new(
        InconsistencyKind::UnresolvedParticipant,
        Collection::Matches,
        format!(
          "{} finished match(es) in league {league_id} season {season_id} \
           reference a participant outside the season roster",
          unresolved.len()
        ),
        unresolved,
      ));
    }
    if !self_play.is_empty() {
      rejected.push(Inconsistency::new(
        InconsistencyKind::SelfPlay,
        Collection::Matches,
        format!(
          "{} finished match(es) in league {league_id} season {season_id} \
           pit a participant against itself and were not counted",
          self_play.len()
        ),
        self_play,
      ));
    }

    Calculation { league_id, season_id, standings, rejected }
  }

  fn assign_ranks(&self, standings: &mut [ComputedStanding]) {
    let nobody_played = standings.iter().all(|s| s.totals.played == 0);
    let shared = self.tie_policy == TiePolicy::SharedAtSeasonStart && nobody_played;
    for (i, s) in standings.iter_mut().enumerate() {
      s.rank = if shared { 1 } else { i as i64 + 1 };
    }
  }
}

/// Points desc, goal difference desc, goals for desc, name asc, id asc.
fn table_order(a: &ComputedStanding, b: &ComputedStanding) -> Ordering {
  b.totals
    .points
    .cmp(&a.totals.points)
    .then_with(|| b.totals.goal_diff.cmp(&a.totals.goal_diff))
    .then_with(|| b.totals.goals_for.cmp(&a.totals.goals_for))
    .then_with(|| a.name.cmp(&b.name))
    .then_with(|| a.participant_id.cmp(&b.participant_id))
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use uuid::Uuid;

  use super::*;
  use crate::{fixture::MatchStatus, league::ParticipantRef};

  fn participant(id: i64, name: &str) -> Participant {
    Participant {
      id,
      slug: name.to_lowercase(),
      name: name.to_owned(),
      legacy_team_id: Some(id + 100),
    }
  }

  fn finished(id: i64, home: i64, away: i64, h: i64, a: i64) -> Match {
    Match {
      id,
      uid: Uuid::new_v4(),
      home: ParticipantRef::club(home),
      away: ParticipantRef::club(away),
      league_id: 1,
      season_id: 1,
      matchday: 1,
      score_home: Some(h),
      score_away: Some(a),
      status: MatchStatus::Finished,
      updated_at: Utc::now(),
    }
  }

  fn abcd() -> Vec<Participant> {
    vec![
      participant(1, "A"),
      participant(2, "B"),
      participant(3, "C"),
      participant(4, "D"),
    ]
  }

  #[test]
  fn scenario_win_and_draw() {
    let calc = StandingsCalculator::default();
    let matches = [finished(1, 1, 2, 3, 1), finished(2, 3, 4, 2, 2)];
    let table = calc.calculate(1, 1, &abcd(), &matches);

    assert_eq!(table.get(1).unwrap().totals, Totals::from_base(1, 0, 0, 3, 1));
    assert_eq!(table.get(2).unwrap().totals, Totals::from_base(0, 0, 1, 1, 3));
    assert_eq!(table.get(3).unwrap().totals, Totals::from_base(0, 1, 0, 2, 2));
    assert_eq!(table.get(4).unwrap().totals, table.get(3).unwrap().totals);

    let a = table.get(1).unwrap().totals;
    let summary = (a.played, a.wins, a.points, a.goals_for, a.goals_against);
    assert_eq!(summary, (1, 1, 3, 3, 1));

    let order: Vec<i64> = table.standings.iter().map(|s| s.participant_id).collect();
    assert_eq!(order, vec![1, 3, 4, 2]);
    assert!(table.rejected.is_empty());
  }

  #[test]
  fn sixteen_participants_without_matches() {
    let roster: Vec<Participant> = (1..=16)
      .map(|i| participant(i, &format!("Club {i:02}")))
      .collect();

    let sequential = StandingsCalculator::new(TiePolicy::Sequential)
      .calculate(1, 1, &roster, &[]);
    assert_eq!(sequential.standings.len(), 16);
    assert!(sequential.standings.iter().all(|s| s.totals == Totals::default()));
    let ranks: Vec<i64> = sequential.standings.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, (1..=16).collect::<Vec<_>>());
    // Level on everything, so the name decides.
    assert_eq!(sequential.standings[0].name, "Club 01");

    let shared = StandingsCalculator::new(TiePolicy::SharedAtSeasonStart)
      .calculate(1, 1, &roster, &[]);
    assert!(shared.standings.iter().all(|s| s.rank == 1));
  }

  #[test]
  fn shared_policy_is_sequential_once_a_match_counts() {
    let calc = StandingsCalculator::new(TiePolicy::SharedAtSeasonStart);
    let table = calc.calculate(1, 1, &abcd(), &[finished(1, 1, 2, 0, 0)]);
    let ranks: Vec<i64> = table.standings.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
  }

  #[test]
  fn deterministic_regardless_of_match_order() {
    let calc = StandingsCalculator::default();
    let mut matches = vec![
      finished(1, 1, 2, 1, 0),
      finished(2, 3, 4, 0, 2),
      finished(3, 2, 3, 2, 2),
      finished(4, 4, 1, 1, 1),
    ];
    let first = calc.calculate(1, 1, &abcd(), &matches);
    matches.reverse();
    let second = calc.calculate(1, 1, &abcd(), &matches);
    assert_eq!(first, second);
    assert_eq!(first, calc.calculate(1, 1, &abcd(), &matches));
  }

  #[test]
  fn produced_rows_satisfy_invariants() {
    let calc = StandingsCalculator::default();
    let matches = [
      finished(1, 1, 2, 4, 0),
      finished(2, 2, 3, 1, 3),
      finished(3, 3, 4, 0, 0),
      finished(4, 4, 1, 2, 5),
      finished(5, 1, 3, 1, 1),
    ];
    let table = calc.calculate(1, 1, &abcd(), &matches);
    for s in &table.standings {
      let t = s.totals;
      assert_eq!(t.played, t.wins + t.draws + t.losses);
      assert_eq!(t.goal_diff, t.goals_for - t.goals_against);
      assert_eq!(t.points, t.wins * 3 + t.draws);
    }
  }

  #[test]
  fn tiebreak_order_points_then_diff_then_goals() {
    let calc = StandingsCalculator::default();
    // A and C both win once; A by more goals. B and D lose.
    let matches = [finished(1, 1, 2, 4, 0), finished(2, 3, 4, 1, 0)];
    let table = calc.calculate(1, 1, &abcd(), &matches);
    let order: Vec<i64> = table.standings.iter().map(|s| s.participant_id).collect();
    assert_eq!(order, vec![1, 3, 4, 2]);
  }

  #[test]
  fn invalid_scores_are_rejected_not_zeroed() {
    let calc = StandingsCalculator::default();
    let mut missing = finished(1, 1, 2, 0, 0);
    missing.score_away = None;
    let negative = finished(2, 3, 4, -1, 2);
    let table = calc.calculate(1, 1, &abcd(), &[missing, negative]);

    assert!(table.standings.iter().all(|s| s.totals.played == 0));
    assert_eq!(table.rejected.len(), 1);
    assert_eq!(table.rejected[0].kind, InconsistencyKind::InvalidScore);
    assert_eq!(table.rejected[0].records, vec![1, 2]);
  }

  #[test]
  fn ignores_other_seasons_and_unfinished_matches() {
    let calc = StandingsCalculator::default();
    let mut other_season = finished(1, 1, 2, 1, 0);
    other_season.season_id = 2;
    let mut live = finished(2, 1, 2, 1, 0);
    live.status = MatchStatus::Live;
    let table = calc.calculate(1, 1, &abcd(), &[other_season, live]);
    assert!(table.standings.iter().all(|s| s.totals.played == 0));
    assert!(table.rejected.is_empty());
  }

  #[test]
  fn legacy_team_references_are_counted() {
    let calc = StandingsCalculator::default();
    let mut m = finished(1, 0, 0, 2, 1);
    m.home = ParticipantRef::team(101);
    m.away = ParticipantRef::team(102);
    let table = calc.calculate(1, 1, &abcd(), &[m]);
    assert_eq!(table.get(1).unwrap().totals.wins, 1);
    assert_eq!(table.get(2).unwrap().totals.losses, 1);
  }

  #[test]
  fn unknown_participants_are_rejected() {
    let calc = StandingsCalculator::default();
    let table = calc.calculate(1, 1, &abcd(), &[finished(1, 1, 99, 2, 0)]);
    assert_eq!(table.get(1).unwrap().totals.played, 0);
    assert_eq!(table.rejected[0].kind, InconsistencyKind::UnresolvedParticipant);
  }

  #[test]
  fn self_play_is_rejected_not_counted() {
    let calc = StandingsCalculator::default();
    let table = calc.calculate(1, 1, &abcd(), &[finished(1, 1, 1, 3, 1)]);
    assert!(table.standings.iter().all(|s| s.totals.played == 0));
    assert_eq!(table.get(1).unwrap().totals, Totals::default());
    assert_eq!(table.rejected.len(), 1);
    assert_eq!(table.rejected[0].kind, InconsistencyKind::SelfPlay);
    assert_eq!(table.rejected[0].records, vec![1]);
  }

  #[test]
  fn huge_scores_saturate() {
    let calc = StandingsCalculator::default();
    let matches = [finished(1, 1, 2, i64::MAX, 0), finished(2, 1, 2, i64::MAX, 0)];
    let table = calc.calculate(1, 1, &abcd(), &matches);
    let a = table.get(1).unwrap().totals;
    assert_eq!(a.wins, 2);
    assert_eq!(a.goals_for, i64::MAX);
    assert_eq!(table.get(2).unwrap().totals.goal_diff, -i64::MAX);
  }
}

//! Standing rows: a participant's aggregate for one league and season.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::league::ParticipantRef;

pub const POINTS_FOR_WIN: i64 = 3;
pub const POINTS_FOR_DRAW: i64 = 1;

/// Calculation source written by a full recompute.
pub const SOURCE_AUTO: &str = "auto";
/// Calculation source written by a targeted repair.
pub const SOURCE_REPAIR: &str = "repair";

// ─── Totals ──────────────────────────────────────────────────────────────────

/// The numeric fields of a standing.
///
/// `wins`, `draws`, `losses`, `goals_for` and `goals_against` are the base
/// counters. `played`, `goal_diff` and `points` are derived from them and are
/// only ever written through [`Totals::from_base`] or [`Totals::recomputed`].
/// Fields are signed so that corrupted rows can be represented and detected.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct Totals {
  pub played:        i64,
  pub wins:          i64,
  pub draws:         i64,
  pub losses:        i64,
  pub goals_for:     i64,
  pub goals_against: i64,
  pub goal_diff:     i64,
  pub points:        i64,
}

impl Totals {
  pub fn from_base(
    wins: i64,
    draws: i64,
    losses: i64,
    goals_for: i64,
    goals_against: i64,
  ) -> Self {
    // Saturating so that corrupted rows never panic the validator.
    Self {
      played: wins.saturating_add(draws).saturating_add(losses),
      wins,
      draws,
      losses,
      goals_for,
      goals_against,
      goal_diff: goals_for.saturating_sub(goals_against),
      points: wins
        .saturating_mul(POINTS_FOR_WIN)
        .saturating_add(draws.saturating_mul(POINTS_FOR_DRAW)),
    }
  }

  /// Derived fields recomputed from the base counters.
  pub fn recomputed(self) -> Self {
    Self::from_base(
      self.wins,
      self.draws,
      self.losses,
      self.goals_for,
      self.goals_against,
    )
  }

  /// Negative base counters clamped to zero, derived fields recomputed.
  pub fn clamped(self) -> Self {
    Self::from_base(
      self.wins.max(0),
      self.draws.max(0),
      self.losses.max(0),
      self.goals_for.max(0),
      self.goals_against.max(0),
    )
  }

  /// Whether derived fields agree with the base counters.
  pub fn is_consistent(&self) -> bool { *self == self.recomputed() }

  /// Whether any counter that must be non-negative is negative.
  /// `goal_diff` is allowed to be negative.
  pub fn has_negative(&self) -> bool {
    [
      self.played,
      self.wins,
      self.draws,
      self.losses,
      self.goals_for,
      self.goals_against,
      self.points,
    ]
    .iter()
    .any(|v| *v < 0)
  }

  pub(crate) fn record_result(&mut self, scored: i64, conceded: i64) {
    match scored.cmp(&conceded) {
      std::cmp::Ordering::Greater => self.wins = self.wins.saturating_add(1),
      std::cmp::Ordering::Equal => self.draws = self.draws.saturating_add(1),
      std::cmp::Ordering::Less => self.losses = self.losses.saturating_add(1),
    }
    self.goals_for = self.goals_for.saturating_add(scored);
    self.goals_against = self.goals_against.saturating_add(conceded);
    *self = self.recomputed();
  }
}

// ─── Standing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
  pub id:                 i64,
  /// Business key; survives backup and restore.
  pub uid:                Uuid,
  pub participant:        ParticipantRef,
  pub league_id:          i64,
  pub season_id:          i64,
  #[serde(flatten)]
  pub totals:             Totals,
  /// 1-based position in the table; 0 when never ranked.
  pub rank:               i64,
  /// `false` for rows an editor overrode by hand.
  pub auto_calculated:    bool,
  pub calculation_source: String,
  pub last_updated:       DateTime<Utc>,
}

/// Input to [`crate::store::LeagueStore::create_standing`] and to
/// [`crate::store::WriteOp::InsertStanding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStanding {
  pub uid:                Uuid,
  pub participant:        ParticipantRef,
  pub league_id:          i64,
  pub season_id:          i64,
  pub totals:             Totals,
  pub rank:               i64,
  pub auto_calculated:    bool,
  pub calculation_source: String,
}

impl NewStanding {
  /// An all-zero, unranked, auto-calculated row.
  pub fn empty(participant: ParticipantRef, league_id: i64, season_id: i64) -> Self {
    Self {
      uid: Uuid::new_v4(),
      participant,
      league_id,
      season_id,
      totals: Totals::default(),
      rank: 0,
      auto_calculated: true,
      calculation_source: SOURCE_AUTO.to_owned(),
    }
  }

  pub fn with_totals(mut self, totals: Totals) -> Self {
    self.totals = totals;
    self
  }

  pub fn with_rank(mut self, rank: i64) -> Self {
    self.rank = rank;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_base_derives_fields() {
    let t = Totals::from_base(2, 1, 3, 7, 9);
    assert_eq!(t.played, 6);
    assert_eq!(t.goal_diff, -2);
    assert_eq!(t.points, 7);
    assert!(t.is_consistent());
    assert!(!t.has_negative());
  }

  #[test]
  fn negative_goal_diff_is_not_a_negative_counter() {
    let t = Totals::from_base(0, 0, 1, 0, 4);
    assert!(!t.has_negative());
  }

  #[test]
  fn clamping_repairs_negatives_and_derived_fields() {
    let corrupt = Totals {
      played:        1,
      wins:          -2,
      draws:         1,
      losses:        0,
      goals_for:     -5,
      goals_against: 3,
      goal_diff:     0,
      points:        -6,
    };
    assert!(corrupt.has_negative());
    let fixed = corrupt.clamped();
    assert_eq!(fixed, Totals::from_base(0, 1, 0, 0, 3));
    assert!(fixed.is_consistent());
  }

  #[test]
  fn record_result_keeps_invariants() {
    let mut t = Totals::default();
    t.record_result(3, 1);
    t.record_result(0, 0);
    t.record_result(1, 2);
    assert_eq!(t, Totals::from_base(1, 1, 1, 4, 3));
  }
}

//! Matches (fixtures) and their results.
//!
//! Matches are created by fixture import and mutated by result entry, both of
//! which happen outside this engine. The engine reads them, and only touches
//! them to cancel a self-playing fixture, delete an orphan, or rewrite its
//! participant references during a migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, league::ParticipantRef};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
  Scheduled,
  Live,
  Finished,
  Cancelled,
}

impl MatchStatus {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownMatchStatus(s.to_owned()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
  pub id:         i64,
  /// Business key assigned at import; survives backup and restore.
  pub uid:        Uuid,
  pub home:       ParticipantRef,
  pub away:       ParticipantRef,
  pub league_id:  i64,
  pub season_id:  i64,
  pub matchday:   i64,
  pub score_home: Option<i64>,
  pub score_away: Option<i64>,
  pub status:     MatchStatus,
  pub updated_at: DateTime<Utc>,
}

impl Match {
  pub fn is_finished(&self) -> bool { self.status == MatchStatus::Finished }

  /// Both scores, if present and non-negative.
  pub fn final_score(&self) -> Option<(i64, i64)> {
    match (self.score_home, self.score_away) {
      (Some(h), Some(a)) if h >= 0 && a >= 0 => Some((h, a)),
      _ => None,
    }
  }

  /// Whether the match is finished but its score cannot be counted.
  pub fn has_invalid_score(&self) -> bool {
    self.is_finished() && self.final_score().is_none()
  }
}

/// Input to [`crate::store::LeagueStore::create_match`].
#[derive(Debug, Clone)]
pub struct NewMatch {
  pub uid:        Uuid,
  pub home:       ParticipantRef,
  pub away:       ParticipantRef,
  pub league_id:  i64,
  pub season_id:  i64,
  pub matchday:   i64,
  pub score_home: Option<i64>,
  pub score_away: Option<i64>,
  pub status:     MatchStatus,
}

impl NewMatch {
  /// A scheduled fixture with no score.
  pub fn scheduled(
    league_id: i64,
    season_id: i64,
    matchday: i64,
    home: ParticipantRef,
    away: ParticipantRef,
  ) -> Self {
    Self {
      uid: Uuid::new_v4(),
      home,
      away,
      league_id,
      season_id,
      matchday,
      score_home: None,
      score_away: None,
      status: MatchStatus::Scheduled,
    }
  }

  /// Mark the fixture finished with the given score.
  pub fn finished(mut self, home: i64, away: i64) -> Self {
    self.score_home = Some(home);
    self.score_away = Some(away);
    self.status = MatchStatus::Finished;
    self
  }
}

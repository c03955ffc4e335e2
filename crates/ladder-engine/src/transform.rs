//! Relation transforms applied record by record during a migration.

use chrono::Utc;
use ladder_core::{
  fixture::Match,
  league::{ParticipantDirectory, ParticipantRef, RefScheme},
  standing::Standing,
};
use thiserror::Error;

/// Why a single record could not be transformed. Counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
  #[error("legacy team {0} maps to no club")]
  UnmappedTeam(i64),

  #[error("legacy team {team} maps to several clubs: {clubs:?}")]
  AmbiguousTeam { team: i64, clubs: Vec<i64> },

  #[error("club {club} disagrees with legacy team {team}")]
  Conflict { team: i64, club: i64 },

  #[error("reference names no participant")]
  MissingReference,
}

/// Rewrites the participant references of matches and standings.
///
/// `Ok(None)` means the record is already in the target scheme and counts as
/// skipped.
pub trait RelationTransform: Send + Sync {
  fn name(&self) -> &str;

  fn transform_match(
    &self,
    m: &Match,
    directory: &ParticipantDirectory,
  ) -> Result<Option<Match>, TransformError>;

  fn transform_standing(
    &self,
    s: &Standing,
    directory: &ParticipantDirectory,
  ) -> Result<Option<Standing>, TransformError>;
}

/// Legacy team references to club references.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamToClub;

impl TeamToClub {
  fn rewrite(
    r: &ParticipantRef,
    directory: &ParticipantDirectory,
  ) -> Result<Option<ParticipantRef>, TransformError> {
    match (r.scheme(), r.team_id, r.club_id) {
      (Some(RefScheme::Club), ..) => Ok(None),
      (Some(RefScheme::Mixed), Some(team), Some(club)) => {
        // A half-migrated row: keep the club if the team agrees with it.
        let clubs = directory.clubs_for_team(team);
        if clubs.is_empty() || clubs.contains(&club) {
          Ok(Some(ParticipantRef::club(club)))
        } else {
          Err(TransformError::Conflict { team, club })
        }
      }
      (Some(RefScheme::Team), Some(team), _) => match directory.clubs_for_team(team) {
        [club] => Ok(Some(ParticipantRef::club(*club))),
        [] => Err(TransformError::UnmappedTeam(team)),
        clubs => Err(TransformError::AmbiguousTeam { team, clubs: clubs.to_vec() }),
      },
      _ => Err(TransformError::MissingReference),
    }
  }
}

impl RelationTransform for TeamToClub {
  fn name(&self) -> &str { "team_to_club" }

  fn transform_match(
    &self,
    m: &Match,
    directory: &ParticipantDirectory,
  ) -> Result<Option<Match>, TransformError> {
    let home = Self::rewrite(&m.home, directory)?;
    let away = Self::rewrite(&m.away, directory)?;
    if home.is_none() && away.is_none() {
      return Ok(None);
    }
    let mut out = m.clone();
    out.home = home.unwrap_or(m.home);
    out.away = away.unwrap_or(m.away);
    out.updated_at = Utc::now();
    Ok(Some(out))
  }

  fn transform_standing(
    &self,
    s: &Standing,
    directory: &ParticipantDirectory,
  ) -> Result<Option<Standing>, TransformError> {
    let Some(participant) = Self::rewrite(&s.participant, directory)? else {
      return Ok(None);
    };
    let mut out = s.clone();
    out.participant = participant;
    out.last_updated = Utc::now();
    Ok(Some(out))
  }
}

//! Reference entities (leagues, seasons, participants) and the two
//! participant-reference schemes used by matches and standings.
//!
//! Participants are clubs. Older records point at them through a legacy
//! *team* id; newer records point at the club directly. A club carries the
//! legacy team id it replaced, which is what makes the mapping possible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── Leagues and seasons ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
  pub id:   i64,
  /// Business key; stable across backup and restore.
  pub slug: String,
  pub name: String,
}

#[derive(Debug, Clone)]
pub struct NewLeague {
  pub slug: String,
  pub name: String,
}

/// A season of one league, with the participants enrolled in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
  pub id:        i64,
  pub slug:      String,
  pub league_id: i64,
  pub name:      String,
  /// Participant ids enrolled for this league and season.
  pub roster:    Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewSeason {
  pub slug:      String,
  pub league_id: i64,
  pub name:      String,
  pub roster:    Vec<i64>,
}

// ─── Participants ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
  pub id:             i64,
  pub slug:           String,
  pub name:           String,
  /// The id this club had under the legacy team scheme, if any.
  pub legacy_team_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
  pub slug:           String,
  pub name:           String,
  pub legacy_team_id: Option<i64>,
}

impl NewParticipant {
  pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
    Self { slug: slug.into(), name: name.into(), legacy_team_id: None }
  }

  pub fn with_legacy_team(mut self, team_id: i64) -> Self {
    self.legacy_team_id = Some(team_id);
    self
  }
}

// ─── References ──────────────────────────────────────────────────────────────

/// Which reference scheme a relation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefScheme {
  /// Legacy reference through `team_id`.
  Team,
  /// Current reference through `club_id`.
  Club,
  /// Both ids set; only valid transiently while a migration is running.
  Mixed,
}

/// How a match side or a standing points at its participant.
///
/// In steady state exactly one id is set. Both ids set is the mixed
/// mid-migration state; resolution then prefers `club_id`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct ParticipantRef {
  pub team_id: Option<i64>,
  pub club_id: Option<i64>,
}

impl ParticipantRef {
  pub fn club(id: i64) -> Self { Self { team_id: None, club_id: Some(id) } }

  pub fn team(id: i64) -> Self { Self { team_id: Some(id), club_id: None } }

  /// The scheme in use, or `None` when the reference is empty.
  pub fn scheme(&self) -> Option<RefScheme> {
    match (self.team_id, self.club_id) {
      (None, None) => None,
      (Some(_), None) => Some(RefScheme::Team),
      (None, Some(_)) => Some(RefScheme::Club),
      (Some(_), Some(_)) => Some(RefScheme::Mixed),
    }
  }

  pub fn is_empty(&self) -> bool { self.scheme().is_none() }

  /// Stable integer used to assign a record to a worker partition.
  pub fn partition_key(&self) -> i64 {
    self.team_id.or(self.club_id).unwrap_or_default()
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Owned lookup table resolving [`ParticipantRef`]s under either scheme.
#[derive(Debug, Clone, Default)]
pub struct ParticipantDirectory {
  by_id:   HashMap<i64, Participant>,
  by_team: HashMap<i64, Vec<i64>>,
}

impl ParticipantDirectory {
  pub fn new(participants: impl IntoIterator<Item = Participant>) -> Self {
    let mut by_id = HashMap::new();
    let mut by_team: HashMap<i64, Vec<i64>> = HashMap::new();
    for p in participants {
      if let Some(team_id) = p.legacy_team_id {
        by_team.entry(team_id).or_default().push(p.id);
      }
      by_id.insert(p.id, p);
    }
    for ids in by_team.values_mut() {
      ids.sort_unstable();
    }
    Self { by_id, by_team }
  }

  pub fn get(&self, id: i64) -> Option<&Participant> { self.by_id.get(&id) }

  pub fn contains(&self, id: i64) -> bool { self.by_id.contains_key(&id) }

  pub fn len(&self) -> usize { self.by_id.len() }

  pub fn is_empty(&self) -> bool { self.by_id.is_empty() }

  /// Whether any participant carries a legacy team id.
  pub fn has_legacy_mapping(&self) -> bool { !self.by_team.is_empty() }

  /// All clubs claiming `team_id` as their legacy id. More than one entry
  /// means the mapping is ambiguous.
  pub fn clubs_for_team(&self, team_id: i64) -> &[i64] {
    self.by_team.get(&team_id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Resolve a reference to a participant. A set `club_id` is authoritative;
  /// otherwise the legacy team id must map to exactly one club.
  pub fn resolve(&self, r: &ParticipantRef) -> Option<&Participant> {
    if let Some(club_id) = r.club_id {
      return self.get(club_id);
    }
    match self.clubs_for_team(r.team_id?) {
      [only] => self.get(*only),
      _ => None,
    }
  }

  pub fn resolve_id(&self, r: &ParticipantRef) -> Option<i64> {
    self.resolve(r).map(|p| p.id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn club(id: i64, team: Option<i64>) -> Participant {
    Participant {
      id,
      slug: format!("club-{id}"),
      name: format!("Club {id}"),
      legacy_team_id: team,
    }
  }

  #[test]
  fn scheme_reflects_which_ids_are_set() {
    assert_eq!(ParticipantRef::default().scheme(), None);
    assert_eq!(ParticipantRef::team(1).scheme(), Some(RefScheme::Team));
    assert_eq!(ParticipantRef::club(1).scheme(), Some(RefScheme::Club));
    let mixed = ParticipantRef { team_id: Some(1), club_id: Some(2) };
    assert_eq!(mixed.scheme(), Some(RefScheme::Mixed));
  }

  #[test]
  fn resolves_both_schemes() {
    let dir = ParticipantDirectory::new([club(10, Some(1)), club(20, None)]);
    assert_eq!(dir.resolve_id(&ParticipantRef::club(20)), Some(20));
    assert_eq!(dir.resolve_id(&ParticipantRef::team(1)), Some(10));
    assert_eq!(dir.resolve_id(&ParticipantRef::team(2)), None);
    assert_eq!(dir.resolve_id(&ParticipantRef::club(99)), None);
  }

  #[test]
  fn club_id_wins_in_mixed_state() {
    let dir = ParticipantDirectory::new([club(10, Some(1)), club(20, None)]);
    let mixed = ParticipantRef { team_id: Some(1), club_id: Some(20) };
    assert_eq!(dir.resolve_id(&mixed), Some(20));
  }

  #[test]
  fn ambiguous_team_mapping_does_not_resolve() {
    let dir = ParticipantDirectory::new([club(10, Some(1)), club(11, Some(1))]);
    assert_eq!(dir.clubs_for_team(1), &[10, 11]);
    assert_eq!(dir.resolve(&ParticipantRef::team(1)), None);
  }
}

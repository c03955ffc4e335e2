//! The `LeagueStore` trait and supporting query and write types.
//!
//! The trait is implemented by storage backends (e.g. `ladder-store-sqlite`).
//! The engine depends on this abstraction, never on a concrete backend, and
//! routes every repair and migration write through it.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  audit::{AuditEntry, AuditQuery},
  fixture::{Match, MatchStatus, NewMatch},
  inconsistency::Collection,
  league::{League, NewLeague, NewParticipant, NewSeason, Participant, Season},
  migration::{LockInfo, MigrationRecord},
  standing::{NewStanding, Standing},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`LeagueStore::find_matches`]. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
  pub league_id:     Option<i64>,
  pub season_id:     Option<i64>,
  pub status:        Option<MatchStatus>,
  /// Only matches whose `updated_at` is strictly later.
  pub updated_after: Option<DateTime<Utc>>,
}

/// Parameters for [`LeagueStore::find_standings`]. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct StandingQuery {
  pub league_id:     Option<i64>,
  pub season_id:     Option<i64>,
  /// Only standings whose `last_updated` is strictly later.
  pub updated_after: Option<DateTime<Utc>>,
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// One mutation inside an atomic [`LeagueStore::apply`] batch.
///
/// `Update*` and `Delete*` address rows by surrogate id and silently affect
/// nothing when the row is gone. `Upsert*` address rows by business key
/// (slug or uid), which is what makes restoring a snapshot repeatable.
#[derive(Debug, Clone)]
pub enum WriteOp {
  UpdateMatch(Match),
  UpdateStanding(Standing),
  InsertStanding(NewStanding),
  DeleteMatch(i64),
  DeleteStanding(i64),
  UpsertLeague(League),
  UpsertSeason(Season),
  UpsertParticipant(Participant),
  UpsertMatch(Match),
  UpsertStanding(Standing),
  AppendAudit(AuditEntry),
}

/// A full or partial copy of the store's collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionData {
  #[serde(default)]
  pub leagues:      Vec<League>,
  #[serde(default)]
  pub seasons:      Vec<Season>,
  #[serde(default)]
  pub participants: Vec<Participant>,
  #[serde(default)]
  pub matches:      Vec<Match>,
  #[serde(default)]
  pub standings:    Vec<Standing>,
}

impl CollectionData {
  pub fn len(&self) -> usize {
    self.leagues.len()
      + self.seasons.len()
      + self.participants.len()
      + self.matches.len()
      + self.standings.len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Upserts for every record in `scope`, in dependency order.
  pub fn upserts(&self, scope: &[Collection]) -> Vec<WriteOp> {
    let mut ops = Vec::with_capacity(self.len());
    for collection in Collection::ALL {
      if !scope.contains(&collection) {
        continue;
      }
      match collection {
        Collection::Leagues => {
          ops.extend(self.leagues.iter().cloned().map(WriteOp::UpsertLeague))
        }
        Collection::Seasons => {
          ops.extend(self.seasons.iter().cloned().map(WriteOp::UpsertSeason))
        }
        Collection::Participants => ops.extend(
          self.participants.iter().cloned().map(WriteOp::UpsertParticipant),
        ),
        Collection::Matches => {
          ops.extend(self.matches.iter().cloned().map(WriteOp::UpsertMatch))
        }
        Collection::Standings => {
          ops.extend(self.standings.iter().cloned().map(WriteOp::UpsertStanding))
        }
      }
    }
    ops
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the content store holding leagues, seasons, participants,
/// matches and standings, plus the engine's own bookkeeping (migration
/// records, the migration lock, and the audit log).
///
/// All methods return `Send` futures so the trait can be used from tasks
/// spawned on a multi-threaded tokio runtime.
pub trait LeagueStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Creation (fixture import, seeding) ────────────────────────────────

  fn create_league(
    &self,
    input: NewLeague,
  ) -> impl Future<Output = Result<League, Self::Error>> + Send + '_;

  fn create_season(
    &self,
    input: NewSeason,
  ) -> impl Future<Output = Result<Season, Self::Error>> + Send + '_;

  fn create_participant(
    &self,
    input: NewParticipant,
  ) -> impl Future<Output = Result<Participant, Self::Error>> + Send + '_;

  /// Persist a match; `updated_at` is set by the store.
  fn create_match(
    &self,
    input: NewMatch,
  ) -> impl Future<Output = Result<Match, Self::Error>> + Send + '_;

  /// Persist a standing; `last_updated` is set by the store.
  fn create_standing(
    &self,
    input: NewStanding,
  ) -> impl Future<Output = Result<Standing, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn list_leagues(
    &self,
  ) -> impl Future<Output = Result<Vec<League>, Self::Error>> + Send + '_;

  /// List seasons, optionally restricted to one league.
  fn list_seasons(
    &self,
    league_id: Option<i64>,
  ) -> impl Future<Output = Result<Vec<Season>, Self::Error>> + Send + '_;

  fn get_season(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Season>, Self::Error>> + Send + '_;

  fn list_participants(
    &self,
  ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send + '_;

  /// Matches ordered by id.
  fn find_matches<'a>(
    &'a self,
    query: &'a MatchQuery,
  ) -> impl Future<Output = Result<Vec<Match>, Self::Error>> + Send + 'a;

  fn get_match(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  /// Standings ordered by id.
  fn find_standings<'a>(
    &'a self,
    query: &'a StandingQuery,
  ) -> impl Future<Output = Result<Vec<Standing>, Self::Error>> + Send + 'a;

  fn get_standing(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Standing>, Self::Error>> + Send + '_;

  /// Number of rows in a collection.
  fn count(
    &self,
    collection: Collection,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Transactional writes ──────────────────────────────────────────────

  /// Apply every operation in one transaction: all of them take effect or
  /// none do. Returns the number of rows affected.
  fn apply(
    &self,
    ops: Vec<WriteOp>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Migration bookkeeping ─────────────────────────────────────────────

  /// Insert or replace a migration record by id.
  fn save_migration_record<'a>(
    &'a self,
    record: &'a MigrationRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_migration_record(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<MigrationRecord>, Self::Error>> + Send + '_;

  /// Most recent records first.
  fn list_migration_records(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<MigrationRecord>, Self::Error>> + Send + '_;

  /// Take the single migration lock for `owner`. Returns `false` without
  /// side effects when someone else holds it.
  fn acquire_migration_lock(
    &self,
    owner: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Release the lock if `owner` holds it. Returns whether it was released.
  fn release_migration_lock(
    &self,
    owner: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn migration_lock(
    &self,
  ) -> impl Future<Output = Result<Option<LockInfo>, Self::Error>> + Send + '_;

  // ── Audit ─────────────────────────────────────────────────────────────

  /// Audit entries, newest first.
  fn list_audit<'a>(
    &'a self,
    query: &'a AuditQuery,
  ) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + 'a;
}

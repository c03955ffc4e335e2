//! Encoding and decoding helpers between Rust domain types and the plain
//! column values stored in SQLite.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond
//! precision and a `Z` suffix, so that lexicographic order is chronological.
//! UUIDs are stored as hyphenated lowercase strings. Enums use their
//! snake_case names.

use chrono::{DateTime, SecondsFormat, Utc};
use ladder_core::{
  audit::{AuditAction, AuditEntry},
  fixture::{Match, MatchStatus},
  inconsistency::Collection,
  league::ParticipantRef,
  migration::{MigrationKind, MigrationRecord, MigrationStats, MigrationStatus},
  standing::{Standing, Totals},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// Truncate to the precision the store keeps, so values handed back to
/// callers compare equal to what a later read returns.
pub fn stored_precision(dt: DateTime<Utc>) -> DateTime<Utc> {
  DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

// ─── Matches ─────────────────────────────────────────────────────────────────

/// Column list matching the field order of [`MatchRow::from_row`].
pub const MATCH_COLUMNS: &str = "id, uid, home_team_id, home_club_id, \
  away_team_id, away_club_id, league_id, season_id, matchday, score_home, \
  score_away, status, updated_at";

/// Plain column values of a `matches` row.
pub struct MatchRow {
  pub id:           i64,
  pub uid:          String,
  pub home_team_id: Option<i64>,
  pub home_club_id: Option<i64>,
  pub away_team_id: Option<i64>,
  pub away_club_id: Option<i64>,
  pub league_id:    i64,
  pub season_id:    i64,
  pub matchday:     i64,
  pub score_home:   Option<i64>,
  pub score_away:   Option<i64>,
  pub status:       String,
  pub updated_at:   String,
}

impl MatchRow {
  pub fn from_match(m: &Match) -> Self {
    Self {
      id:           m.id,
      uid:          encode_uuid(m.uid),
      home_team_id: m.home.team_id,
      home_club_id: m.home.club_id,
      away_team_id: m.away.team_id,
      away_club_id: m.away.club_id,
      league_id:    m.league_id,
      season_id:    m.season_id,
      matchday:     m.matchday,
      score_home:   m.score_home,
      score_away:   m.score_away,
      status:       m.status.to_string(),
      updated_at:   encode_dt(m.updated_at),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      uid:          row.get(1)?,
      home_team_id: row.get(2)?,
      home_club_id: row.get(3)?,
      away_team_id: row.get(4)?,
      away_club_id: row.get(5)?,
      league_id:    row.get(6)?,
      season_id:    row.get(7)?,
      matchday:     row.get(8)?,
      score_home:   row.get(9)?,
      score_away:   row.get(10)?,
      status:       row.get(11)?,
      updated_at:   row.get(12)?,
    })
  }

  pub fn into_match(self) -> Result<Match> {
    Ok(Match {
      id:         self.id,
      uid:        decode_uuid(&self.uid)?,
      home:       ParticipantRef {
        team_id: self.home_team_id,
        club_id: self.home_club_id,
      },
      away:       ParticipantRef {
        team_id: self.away_team_id,
        club_id: self.away_club_id,
      },
      league_id:  self.league_id,
      season_id:  self.season_id,
      matchday:   self.matchday,
      score_home: self.score_home,
      score_away: self.score_away,
      status:     MatchStatus::parse(&self.status)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Standings ───────────────────────────────────────────────────────────────

/// Column list matching the field order of [`StandingRow::from_row`].
pub const STANDING_COLUMNS: &str = "id, uid, team_id, club_id, league_id, \
  season_id, played, wins, draws, losses, goals_for, goals_against, \
  goal_diff, points, rank, auto_calculated, calculation_source, last_updated";

/// Plain column values of a `standings` row.
pub struct StandingRow {
  pub id:                 i64,
  pub uid:                String,
  pub team_id:            Option<i64>,
  pub club_id:            Option<i64>,
  pub league_id:          i64,
  pub season_id:          i64,
  pub played:             i64,
  pub wins:               i64,
  pub draws:              i64,
  pub losses:             i64,
  pub goals_for:          i64,
  pub goals_against:      i64,
  pub goal_diff:          i64,
  pub points:             i64,
  pub rank:               i64,
  pub auto_calculated:    bool,
  pub calculation_source: String,
  pub last_updated:       String,
}

impl StandingRow {
  pub fn from_standing(s: &Standing) -> Self {
    Self {
      id:                 s.id,
      uid:                encode_uuid(s.uid),
      team_id:            s.participant.team_id,
      club_id:            s.participant.club_id,
      league_id:          s.league_id,
      season_id:          s.season_id,
      played:             s.totals.played,
      wins:               s.totals.wins,
      draws:              s.totals.draws,
      losses:             s.totals.losses,
      goals_for:          s.totals.goals_for,
      goals_against:      s.totals.goals_against,
      goal_diff:          s.totals.goal_diff,
      points:             s.totals.points,
      rank:               s.rank,
      auto_calculated:    s.auto_calculated,
      calculation_source: s.calculation_source.clone(),
      last_updated:       encode_dt(s.last_updated),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                 row.get(0)?,
      uid:                row.get(1)?,
      team_id:            row.get(2)?,
      club_id:            row.get(3)?,
      league_id:          row.get(4)?,
      season_id:          row.get(5)?,
      played:             row.get(6)?,
      wins:               row.get(7)?,
      draws:              row.get(8)?,
      losses:             row.get(9)?,
      goals_for:          row.get(10)?,
      goals_against:      row.get(11)?,
      goal_diff:          row.get(12)?,
      points:             row.get(13)?,
      rank:               row.get(14)?,
      auto_calculated:    row.get(15)?,
      calculation_source: row.get(16)?,
      last_updated:       row.get(17)?,
    })
  }

  pub fn into_standing(self) -> Result<Standing> {
    Ok(Standing {
      id:                 self.id,
      uid:                decode_uuid(&self.uid)?,
      participant:        ParticipantRef { team_id: self.team_id, club_id: self.club_id },
      league_id:          self.league_id,
      season_id:          self.season_id,
      totals:             Totals {
        played:        self.played,
        wins:          self.wins,
        draws:         self.draws,
        losses:        self.losses,
        goals_for:     self.goals_for,
        goals_against: self.goals_against,
        goal_diff:     self.goal_diff,
        points:        self.points,
      },
      rank:               self.rank,
      auto_calculated:    self.auto_calculated,
      calculation_source: self.calculation_source,
      last_updated:       decode_dt(&self.last_updated)?,
    })
  }
}

// ─── Migration records ───────────────────────────────────────────────────────

pub const MIGRATION_COLUMNS: &str = "id, kind, status, started_at, \
  finished_at, backup_id, processed, migrated, skipped, errors, message";

pub struct MigrationRow {
  pub id:          String,
  pub kind:        String,
  pub status:      String,
  pub started_at:  String,
  pub finished_at: Option<String>,
  pub backup_id:   Option<String>,
  pub processed:   i64,
  pub migrated:    i64,
  pub skipped:     i64,
  pub errors:      i64,
  pub message:     Option<String>,
}

impl MigrationRow {
  pub fn from_record(r: &MigrationRecord) -> Self {
    Self {
      id:          encode_uuid(r.id),
      kind:        r.kind.to_string(),
      status:      r.status.to_string(),
      started_at:  encode_dt(r.started_at),
      finished_at: r.finished_at.map(encode_dt),
      backup_id:   r.backup_id.map(encode_uuid),
      processed:   r.stats.processed as i64,
      migrated:    r.stats.migrated as i64,
      skipped:     r.stats.skipped as i64,
      errors:      r.stats.errors as i64,
      message:     r.message.clone(),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      kind:        row.get(1)?,
      status:      row.get(2)?,
      started_at:  row.get(3)?,
      finished_at: row.get(4)?,
      backup_id:   row.get(5)?,
      processed:   row.get(6)?,
      migrated:    row.get(7)?,
      skipped:     row.get(8)?,
      errors:      row.get(9)?,
      message:     row.get(10)?,
    })
  }

  pub fn into_record(self) -> Result<MigrationRecord> {
    Ok(MigrationRecord {
      id:          decode_uuid(&self.id)?,
      kind:        MigrationKind::parse(&self.kind)?,
      status:      MigrationStatus::parse(&self.status)?,
      started_at:  decode_dt(&self.started_at)?,
      finished_at: self.finished_at.as_deref().map(decode_dt).transpose()?,
      backup_id:   self.backup_id.as_deref().map(decode_uuid).transpose()?,
      stats:       MigrationStats {
        processed: self.processed.max(0) as u64,
        migrated:  self.migrated.max(0) as u64,
        skipped:   self.skipped.max(0) as u64,
        errors:    self.errors.max(0) as u64,
      },
      message:     self.message,
    })
  }
}

// ─── Audit entries ───────────────────────────────────────────────────────────

pub const AUDIT_COLUMNS: &str = "id, at, actor, action, entity, record_id, \
  migration_id, before_json, after_json, message";

pub struct AuditRow {
  pub id:           String,
  pub at:           String,
  pub actor:        String,
  pub action:       String,
  pub entity:       Option<String>,
  pub record_id:    Option<i64>,
  pub migration_id: Option<String>,
  pub before_json:  Option<String>,
  pub after_json:   Option<String>,
  pub message:      String,
}

impl AuditRow {
  pub fn from_entry(e: &AuditEntry) -> Result<Self> {
    Ok(Self {
      id:           encode_uuid(e.id),
      at:           encode_dt(e.at),
      actor:        e.actor.clone(),
      action:       e.action.to_string(),
      entity:       e.entity.map(|c| c.to_string()),
      record_id:    e.record_id,
      migration_id: e.migration_id.map(encode_uuid),
      before_json:  e.before.as_ref().map(serde_json::to_string).transpose()?,
      after_json:   e.after.as_ref().map(serde_json::to_string).transpose()?,
      message:      e.message.clone(),
    })
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      at:           row.get(1)?,
      actor:        row.get(2)?,
      action:       row.get(3)?,
      entity:       row.get(4)?,
      record_id:    row.get(5)?,
      migration_id: row.get(6)?,
      before_json:  row.get(7)?,
      after_json:   row.get(8)?,
      message:      row.get(9)?,
    })
  }

  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      id:           decode_uuid(&self.id)?,
      at:           decode_dt(&self.at)?,
      actor:        self.actor,
      action:       AuditAction::parse(&self.action)?,
      entity:       self.entity.as_deref().map(Collection::parse).transpose()?,
      record_id:    self.record_id,
      migration_id: self.migration_id.as_deref().map(decode_uuid).transpose()?,
      before:       self
        .before_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      after:        self
        .after_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      message:      self.message,
    })
  }
}

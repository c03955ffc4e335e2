//! Durable migration bookkeeping: records and the migration lock.
//!
//! Both live in the store rather than in process memory, so a second process
//! sees an in-flight migration and its history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, inconsistency::Collection};

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
pub enum MigrationKind {
  /// Rewrite match home/away references from teams to clubs.
  MatchRefs,
  /// Rewrite standing references from teams to clubs.
  StandingRefs,
  /// Both of the above in one run.
  AllRefs,
  /// Restore of a pre-migration snapshot.
  Rollback,
}

impl MigrationKind {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownMigrationKind(s.to_owned()))
  }

  /// Collections whose rows this kind rewrites.
  pub fn collections(self) -> &'static [Collection] {
    match self {
      Self::MatchRefs => &[Collection::Matches],
      Self::StandingRefs => &[Collection::Standings],
      Self::AllRefs => &[Collection::Matches, Collection::Standings],
      Self::Rollback => &[],
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MigrationStatus {
  Pending,
  Committed,
  Failed,
  RolledBack,
}

impl MigrationStatus {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownMigrationStatus(s.to_owned()))
  }

  pub fn is_terminal(self) -> bool { self != Self::Pending }
}

/// Counters accumulated while transforming records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrationStats {
  pub processed: u64,
  pub migrated:  u64,
  pub skipped:   u64,
  pub errors:    u64,
}

impl MigrationStats {
  pub fn merge(&mut self, other: MigrationStats) {
    self.processed += other.processed;
    self.migrated += other.migrated;
    self.skipped += other.skipped;
    self.errors += other.errors;
  }

  /// `errors / processed`, or 0 when nothing was processed.
  pub fn error_rate(&self) -> f64 {
    if self.processed == 0 {
      0.0
    } else {
      self.errors as f64 / self.processed as f64
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
  pub id:          Uuid,
  pub kind:        MigrationKind,
  pub status:      MigrationStatus,
  pub started_at:  DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  /// Snapshot taken before the run (forward) or restored by it (rollback).
  pub backup_id:   Option<Uuid>,
  pub stats:       MigrationStats,
  pub message:     Option<String>,
}

impl MigrationRecord {
  pub fn start(kind: MigrationKind) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      status: MigrationStatus::Pending,
      started_at: Utc::now(),
      finished_at: None,
      backup_id: None,
      stats: MigrationStats::default(),
      message: None,
    }
  }

  /// Move to a terminal status and stamp the finish time.
  pub fn finish(&mut self, status: MigrationStatus, message: Option<String>) {
    self.status = status;
    self.finished_at = Some(Utc::now());
    self.message = message;
  }
}

/// The holder of the single migration lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
  pub owner:       Uuid,
  pub acquired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_parses_snake_case() {
    assert_eq!(MigrationKind::parse("all_refs").unwrap(), MigrationKind::AllRefs);
    assert_eq!(MigrationKind::MatchRefs.to_string(), "match_refs");
    assert!(MigrationKind::parse("everything").is_err());
  }

  #[test]
  fn status_names_match_record_format() {
    assert_eq!(MigrationStatus::RolledBack.as_ref(), "rolledback");
    assert_eq!(
      serde_json::to_string(&MigrationStatus::RolledBack).unwrap(),
      "\"rolledback\""
    );
  }

  #[test]
  fn error_rate_handles_empty_runs() {
    assert_eq!(MigrationStats::default().error_rate(), 0.0);
    let stats = MigrationStats { processed: 100, migrated: 90, skipped: 0, errors: 10 };
    assert!((stats.error_rate() - 0.1).abs() < f64::EPSILON);
  }
}

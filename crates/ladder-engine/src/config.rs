//! Engine settings.
//!
//! Every section deserialises with defaults, so an empty configuration source
//! yields a working [`Settings`]. Loading from files and the environment is
//! the binary's job; this module only defines the shape.

use std::{path::PathBuf, time::Duration};

use ladder_core::calculator::TiePolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Path of the SQLite database file.
  pub store_path: PathBuf,
  /// Directory holding snapshot artifacts.
  pub backup_dir: PathBuf,
  pub migration:  MigrationConfig,
  pub backup:     BackupConfig,
  pub repair:     RepairConfig,
  pub standings:  StandingsConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("ladder.db"),
      backup_dir: PathBuf::from("backups"),
      migration:  MigrationConfig::default(),
      backup:     BackupConfig::default(),
      repair:     RepairConfig::default(),
      standings:  StandingsConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
  /// Records per atomic write during transformation.
  pub batch_size:               usize,
  /// Concurrent transform workers.
  pub workers:                  usize,
  /// Error-severity rows tolerated before transformation starts.
  pub pre_validation_tolerance: usize,
  /// `errors / processed` above which a run fails.
  pub max_error_rate:           f64,
}

impl Default for MigrationConfig {
  fn default() -> Self {
    Self {
      batch_size:               100,
      workers:                  4,
      pre_validation_tolerance: 0,
      max_error_rate:           0.05,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
  pub retention_days:     i64,
  /// Newest snapshots always kept by retention.
  pub min_keep:           usize,
  /// Fixed part of the snapshot/restore timeout, in seconds.
  pub timeout_base_secs:  u64,
  /// Per-row part of the snapshot/restore timeout, in milliseconds.
  pub timeout_per_row_ms: u64,
}

impl Default for BackupConfig {
  fn default() -> Self {
    Self {
      retention_days:     30,
      min_keep:           5,
      timeout_base_secs:  30,
      timeout_per_row_ms: 2,
    }
  }
}

impl BackupConfig {
  /// Wall-clock budget for an operation touching `rows` records.
  pub fn timeout_for(&self, rows: u64) -> Duration {
    Duration::from_secs(self.timeout_base_secs)
      + Duration::from_millis(self.timeout_per_row_ms.saturating_mul(rows))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
  /// Unfixable error-severity rows tolerated before repair refuses to run.
  pub error_tolerance: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandingsConfig {
  pub tie_policy: TiePolicy,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_yields_defaults() {
    let settings: Settings = serde_json::from_str("{}").unwrap();
    assert_eq!(settings, Settings::default());
  }

  #[test]
  fn partial_sections_keep_other_defaults() {
    let json = r#"{
      "migration": { "workers": 8 },
      "standings": { "tie_policy": "shared_at_season_start" }
    }"#;
    let settings: Settings = serde_json::from_str(json).unwrap();
    assert_eq!(settings.migration.workers, 8);
    assert_eq!(settings.migration.batch_size, 100);
    assert_eq!(settings.standings.tie_policy, TiePolicy::SharedAtSeasonStart);
  }

  #[test]
  fn timeout_grows_with_rows() {
    let cfg = BackupConfig::default();
    assert_eq!(cfg.timeout_for(0), Duration::from_secs(30));
    assert_eq!(cfg.timeout_for(1000), Duration::from_secs(32));
  }
}

//! The persisted health report.

use std::path::Path;

use chrono::{DateTime, Utc};
use ladder_core::{
  inconsistency::Severity,
  migration::{LockInfo, MigrationRecord, MigrationStatus},
  store::LeagueStore,
  validate::{CheckGroup, CheckOutcome, ValidationReport},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, backup::BackupManager};

/// Record ids listed per issue before the rest are elided.
const MAX_LISTED_RECORDS: usize = 20;

const SECTION_ORDER: [(CheckGroup, &str); 5] = [
  (CheckGroup::Structural, "structural"),
  (CheckGroup::Mathematical, "mathematical"),
  (CheckGroup::Referential, "referential"),
  (CheckGroup::Ranking, "ranking"),
  (CheckGroup::Input, "input"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
  Pass,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
  pub name:    String,
  pub status:  CheckStatus,
  pub message: String,
  pub count:   usize,
  pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
  pub name:   String,
  pub checks: Vec<CheckReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
  pub total_checks: usize,
  pub passed:       usize,
  pub warnings:     usize,
  pub errors:       usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
  pub timestamp: DateTime<Utc>,
  pub summary:   Summary,
  pub sections:  Vec<Section>,
}

/// Lock, migration and snapshot state for the operational section.
#[derive(Debug, Clone, Default)]
pub struct Operations {
  pub lock:           Option<LockInfo>,
  pub last_migration: Option<MigrationRecord>,
  pub snapshots:      usize,
}

impl Operations {
  pub async fn gather<S: LeagueStore>(
    store: &S,
    backups: &BackupManager<S>,
  ) -> Result<Self> {
    Ok(Self {
      lock:           store.migration_lock().await.map_err(Error::store)?,
      last_migration: store
        .list_migration_records(1)
        .await
        .map_err(Error::store)?
        .into_iter()
        .next(),
      snapshots:      backups.list().await?.len(),
    })
  }

  fn checks(&self) -> Vec<CheckReport> {
    let lock = match &self.lock {
      None => check("migration_lock", CheckStatus::Pass, "free", 0, Vec::new()),
      Some(l) => check(
        "migration_lock",
        CheckStatus::Warning,
        format!("held by {} since {}", l.owner, l.acquired_at),
        1,
        Vec::new(),
      ),
    };

    let last = match &self.last_migration {
      None => check(
        "last_migration",
        CheckStatus::Pass,
        "no migrations recorded",
        0,
        Vec::new(),
      ),
      Some(r) => {
        let status = match r.status {
          MigrationStatus::Failed => CheckStatus::Error,
          MigrationStatus::Pending => CheckStatus::Warning,
          _ => CheckStatus::Pass,
        };
        let mut details =
          vec![format!("id {}", r.id), format!("started {}", r.started_at)];
        if let Some(backup) = r.backup_id {
          details.push(format!("snapshot {backup}"));
        }
        if let Some(message) = &r.message {
          details.push(message.clone());
        }
        check(
          "last_migration",
          status,
          format!("{} {}", r.kind, r.status),
          r.stats.processed as usize,
          details,
        )
      }
    };

    let snapshots = check(
      "snapshots",
      if self.snapshots == 0 { CheckStatus::Warning } else { CheckStatus::Pass },
      format!("{} snapshot(s) available", self.snapshots),
      self.snapshots,
      Vec::new(),
    );

    vec![lock, last, snapshots]
  }
}

fn check(
  name: &str,
  status: CheckStatus,
  message: impl Into<String>,
  count: usize,
  details: Vec<String>,
) -> CheckReport {
  CheckReport { name: name.to_owned(), status, message: message.into(), count, details }
}

fn check_report(outcome: &CheckOutcome) -> CheckReport {
  let status = match outcome.severity() {
    None => CheckStatus::Pass,
    Some(Severity::Warning) => CheckStatus::Warning,
    Some(Severity::Error) => CheckStatus::Error,
  };
  let message = match outcome.issues.as_slice() {
    [] => "ok".to_owned(),
    [only] => only.description.clone(),
    many => format!("{} findings", many.len()),
  };
  let details = outcome
    .issues
    .iter()
    .map(|issue| {
      let listed: Vec<String> =
        issue.records.iter().take(MAX_LISTED_RECORDS).map(i64::to_string).collect();
      let more = issue.records.len().saturating_sub(MAX_LISTED_RECORDS);
      let tail = if more > 0 { format!(" (+{more} more)") } else { String::new() };
      format!("{} {}: {}{tail}", issue.kind, issue.entity, listed.join(", "))
    })
    .collect();
  check(&outcome.name, status, message, outcome.affected(), details)
}

impl Report {
  /// Build the document. The operational section is appended when given.
  pub fn build(validation: &ValidationReport, operations: Option<&Operations>) -> Self {
    let mut sections: Vec<Section> = SECTION_ORDER
      .iter()
      .map(|(group, name)| Section {
        name:   (*name).to_owned(),
        checks: validation
          .checks
          .iter()
          .filter(|c| c.group == *group)
          .map(check_report)
          .collect(),
      })
      .filter(|s| !s.checks.is_empty())
      .collect();
    if let Some(ops) = operations {
      sections.push(Section { name: "operational".to_owned(), checks: ops.checks() });
    }

    let mut summary = Summary::default();
    for c in sections.iter().flat_map(|s| &s.checks) {
      summary.total_checks += 1;
      match c.status {
        CheckStatus::Pass => summary.passed += 1,
        CheckStatus::Warning => summary.warnings += 1,
        CheckStatus::Error => summary.errors += 1,
      }
    }

    Self { timestamp: Utc::now(), summary, sections }
  }

  pub fn has_errors(&self) -> bool { self.summary.errors > 0 }

  /// Write the report as pretty JSON, creating parent directories.
  pub async fn write(&self, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(self)?;
    tokio::fs::write(path, json).await?;
    tracing::info!(
      path = %path.display(),
      errors = self.summary.errors,
      "report written"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use ladder_core::{
    calculator::TiePolicy,
    migration::MigrationKind,
    standing::Totals,
    validate::{CHECK_ARITHMETIC, ConsistencyValidator},
  };
  use tempfile::TempDir;

  use super::*;
  use crate::{config::BackupConfig, dataset::load_dataset, testing::fixture};

  #[tokio::test]
  async fn groups_checks_and_counts_statuses() {
    let fx = fixture(2).await;
    fx.play(0, 1, 1, 0).await;
    let mut broken = Totals::from_base(1, 0, 0, 1, 0);
    broken.points = 7;
    fx.standing(fx.club_ref(0), broken, 1).await;

    let data = load_dataset(&*fx.store).await.unwrap();
    let validation = ConsistencyValidator::new(TiePolicy::Sequential).validate(&data);
    let report = Report::build(&validation, None);

    let names: Vec<&str> = report.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["structural", "mathematical", "referential", "ranking", "input"]);
    assert_eq!(report.summary.total_checks, validation.checks.len());
    assert_eq!(
      report.summary.passed + report.summary.warnings + report.summary.errors,
      report.summary.total_checks
    );
    assert!(report.has_errors());

    let arithmetic = report
      .sections
      .iter()
      .flat_map(|s| &s.checks)
      .find(|c| c.name == CHECK_ARITHMETIC)
      .unwrap();
    assert_eq!(arithmetic.status, CheckStatus::Error);
    assert_eq!(arithmetic.count, 1);
    assert_eq!(arithmetic.details.len(), 1);
  }

  #[tokio::test]
  async fn operational_section_and_file_output() {
    let fx = fixture(1).await;
    let dir = TempDir::new().unwrap();
    let backups =
      BackupManager::new(fx.store.clone(), dir.path().join("b"), BackupConfig::default());
    let mut record = MigrationRecord::start(MigrationKind::MatchRefs);
    record.finish(MigrationStatus::Failed, Some("error rate too high".into()));
    fx.store.save_migration_record(&record).await.unwrap();

    let ops = Operations::gather(&*fx.store, &backups).await.unwrap();
    assert_eq!(ops.snapshots, 0);
    let report = Report::build(&ValidationReport::default(), Some(&ops));
    assert_eq!(report.sections.len(), 1);
    let checks = &report.sections[0].checks;
    assert_eq!(checks[0].status, CheckStatus::Pass);
    assert_eq!(checks[1].status, CheckStatus::Error);
    assert_eq!(checks[1].message, "match_refs failed");
    assert_eq!(checks[2].status, CheckStatus::Warning);

    let path = dir.path().join("out/report.json");
    report.write(&path).await.unwrap();
    let read: Report = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(read.summary, report.summary);
    assert_eq!(read.sections, report.sections);
  }
}

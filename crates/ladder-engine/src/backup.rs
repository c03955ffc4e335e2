//! Snapshot, verify, restore and retention of scoped record sets.
//!
//! A snapshot is an artifact pair in the backup directory:
//!
//! | file              | content                                               |
//! |-------------------|-------------------------------------------------------|
//! | `<id>.json.gz`    | gzip-compressed JSON [`CollectionData`]               |
//! | `<id>.meta.json`  | [`SnapshotMeta`], including the SHA-256 of the above  |
//!
//! Both files are written through a temporary name and renamed into place.
//! Snapshots are immutable; only [`BackupManager::retention`] deletes them.

use std::{
  future::Future,
  io::{Read as _, Write as _},
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use chrono::{DateTime, Utc};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use ladder_core::{
  audit::{AuditAction, AuditEntry},
  inconsistency::Collection,
  store::{CollectionData, LeagueStore, MatchQuery, StandingQuery, WriteOp},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::BackupConfig,
  dataset::{estimate_rows, load_collections},
};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const ACTOR: &str = "backup";

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
  /// Every record of the scoped collections.
  Full,
  /// Reference collections in full; matches and standings changed since the
  /// parent snapshot.
  Incremental,
}

/// Sidecar metadata of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
  pub version:      u32,
  pub id:           Uuid,
  pub timestamp:    DateTime<Utc>,
  pub backup_type:  SnapshotKind,
  pub tables:       Vec<Collection>,
  /// Lowercase hex SHA-256 of the compressed payload.
  pub checksum:     String,
  pub record_count: usize,
  pub parent:       Option<Uuid>,
}

impl SnapshotMeta {
  pub fn covers(&self, scope: &[Collection]) -> bool {
    scope.iter().all(|c| self.tables.contains(c))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
  pub max_age_days: i64,
  pub min_keep:     usize,
}

impl From<&BackupConfig> for RetentionPolicy {
  fn from(config: &BackupConfig) -> Self {
    Self { max_age_days: config.retention_days, min_keep: config.min_keep }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
  pub kept:    Vec<Uuid>,
  pub deleted: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
  pub snapshot_id: Uuid,
  /// Collections actually written: the requested scope intersected with the
  /// snapshot's tables.
  pub tables:      Vec<Collection>,
  pub records:     usize,
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct BackupManager<S> {
  store:  Arc<S>,
  dir:    PathBuf,
  config: BackupConfig,
}

impl<S> Clone for BackupManager<S> {
  fn clone(&self) -> Self {
    Self {
      store:  self.store.clone(),
      dir:    self.dir.clone(),
      config: self.config.clone(),
    }
  }
}

/// Collections in dependency order, without repeats.
fn normalize(scope: &[Collection]) -> Vec<Collection> {
  Collection::ALL.into_iter().filter(|c| scope.contains(c)).collect()
}

fn checksum(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

fn compress(data: &CollectionData) -> Result<Vec<u8>> {
  let json = serde_json::to_vec(data)?;
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(&json)?;
  Ok(encoder.finish()?)
}

fn decompress(bytes: &[u8]) -> Result<CollectionData> {
  let mut json = Vec::new();
  GzDecoder::new(bytes).read_to_end(&mut json)?;
  Ok(serde_json::from_slice(&json)?)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  let tmp = path.with_extension("tmp");
  tokio::fs::write(&tmp, bytes).await?;
  tokio::fs::rename(&tmp, path).await?;
  Ok(())
}

async fn remove_if_present(path: &Path) {
  if let Err(e) = tokio::fs::remove_file(path).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    tracing::warn!(path = %path.display(), "could not remove snapshot file: {e}");
  }
}

impl<S: LeagueStore> BackupManager<S> {
  pub fn new(store: Arc<S>, dir: impl Into<PathBuf>, config: BackupConfig) -> Self {
    Self { store, dir: dir.into(), config }
  }

  pub fn dir(&self) -> &Path { &self.dir }

  pub(crate) fn payload_path(&self, id: Uuid) -> PathBuf {
    self.dir.join(format!("{id}.json.gz"))
  }

  pub(crate) fn meta_path(&self, id: Uuid) -> PathBuf {
    self.dir.join(format!("{id}.meta.json"))
  }

  /// Run `fut` under the timeout budget for `rows` records.
  async fn within_budget<T>(
    &self,
    what: &str,
    rows: u64,
    fut: impl Future<Output = Result<T>>,
  ) -> Result<T> {
    let budget: Duration = self.config.timeout_for(rows);
    tokio::time::timeout(budget, fut).await.map_err(|_| {
      Error::Capacity(format!("{what} exceeded {budget:?} for ~{rows} rows"))
    })?
  }

  // ── Create ────────────────────────────────────────────────────────────────

  /// Snapshot the records of `scope`. On any failure, including the timeout,
  /// no artifact is left behind.
  pub async fn create_snapshot(
    &self,
    scope: &[Collection],
    kind: SnapshotKind,
  ) -> Result<SnapshotMeta> {
    let scope = normalize(scope);
    if scope.is_empty() {
      return Err(Error::Input("snapshot scope is empty".into()));
    }

    let id = Uuid::new_v4();
    let rows = estimate_rows(&*self.store, &scope).await?;
    let result = self
      .within_budget("snapshot", rows, self.write_snapshot(id, &scope, kind))
      .await;

    match result {
      Ok(meta) => {
        tracing::info!(
          snapshot = %meta.id,
          records = meta.record_count,
          kind = ?meta.backup_type,
          "snapshot created"
        );
        Ok(meta)
      }
      Err(e) => {
        self.discard(id).await;
        Err(e)
      }
    }
  }

  async fn write_snapshot(
    &self,
    id: Uuid,
    scope: &[Collection],
    kind: SnapshotKind,
  ) -> Result<SnapshotMeta> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let timestamp = Utc::now();

    let (data, parent) = match kind {
      SnapshotKind::Full => (load_collections(&*self.store, scope).await?, None),
      SnapshotKind::Incremental => {
        let parent = self.latest_covering(scope).await?.ok_or_else(|| {
          Error::Input("incremental snapshot needs a parent covering its scope".into())
        })?;
        (self.load_changes(scope, parent.timestamp).await?, Some(parent.id))
      }
    };

    let compressed = compress(&data)?;
    let meta = SnapshotMeta {
      version: SNAPSHOT_FORMAT_VERSION,
      id,
      timestamp,
      backup_type: kind,
      tables: scope.to_vec(),
      checksum: checksum(&compressed),
      record_count: data.len(),
      parent,
    };

    write_atomic(&self.payload_path(id), &compressed).await?;
    write_atomic(&self.meta_path(id), &serde_json::to_vec_pretty(&meta)?).await?;
    Ok(meta)
  }

  async fn load_changes(
    &self,
    scope: &[Collection],
    since: DateTime<Utc>,
  ) -> Result<CollectionData> {
    let reference: Vec<Collection> = scope
      .iter()
      .copied()
      .filter(|c| !matches!(c, Collection::Matches | Collection::Standings))
      .collect();
    let mut data = load_collections(&*self.store, &reference).await?;

    if scope.contains(&Collection::Matches) {
      let query = MatchQuery { updated_after: Some(since), ..Default::default() };
      data.matches = self.store.find_matches(&query).await.map_err(Error::store)?;
    }
    if scope.contains(&Collection::Standings) {
      let query = StandingQuery { updated_after: Some(since), ..Default::default() };
      data.standings = self.store.find_standings(&query).await.map_err(Error::store)?;
    }
    Ok(data)
  }

  async fn discard(&self, id: Uuid) {
    for path in [self.payload_path(id), self.meta_path(id)] {
      remove_if_present(&path.with_extension("tmp")).await;
      remove_if_present(&path).await;
    }
  }

  // ── Read ──────────────────────────────────────────────────────────────────

  /// Metadata of every snapshot, newest first. A missing directory is an
  /// empty list.
  pub async fn list(&self) -> Result<Vec<SnapshotMeta>> {
    let mut entries = match tokio::fs::read_dir(&self.dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let name = entry.file_name();
      if !name.to_string_lossy().ends_with(".meta.json") {
        continue;
      }
      let bytes = tokio::fs::read(entry.path()).await?;
      match serde_json::from_slice::<SnapshotMeta>(&bytes) {
        Ok(meta) => snapshots.push(meta),
        Err(e) => {
          tracing::warn!(file = ?name, "skipping unreadable snapshot metadata: {e}")
        }
      }
    }

    snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    Ok(snapshots)
  }

  pub async fn meta(&self, id: Uuid) -> Result<SnapshotMeta> {
    let bytes = match tokio::fs::read(self.meta_path(id)).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(Error::SnapshotNotFound(id));
      }
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// Newest snapshot whose tables include all of `scope`.
  pub async fn latest_covering(
    &self,
    scope: &[Collection],
  ) -> Result<Option<SnapshotMeta>> {
    Ok(self.list().await?.into_iter().find(|m| m.covers(scope)))
  }

  async fn read_verified(&self, id: Uuid) -> Result<(SnapshotMeta, Vec<u8>)> {
    let meta = self.meta(id).await?;
    let bytes = match tokio::fs::read(self.payload_path(id)).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(Error::SnapshotNotFound(id));
      }
      Err(e) => return Err(e.into()),
    };

    let actual = checksum(&bytes);
    if actual != meta.checksum {
      return Err(Error::Checksum {
        snapshot_id: id,
        expected: meta.checksum,
        actual,
      });
    }
    Ok((meta, bytes))
  }

  /// Recompute the payload checksum and compare it with the metadata.
  pub async fn verify(&self, id: Uuid) -> Result<SnapshotMeta> {
    let (meta, _) = self.read_verified(id).await?;
    Ok(meta)
  }

  /// The verified payload of a snapshot.
  pub async fn load(&self, id: Uuid) -> Result<(SnapshotMeta, CollectionData)> {
    let (meta, bytes) = self.read_verified(id).await?;
    Ok((meta, decompress(&bytes)?))
  }

  // ── Restore ───────────────────────────────────────────────────────────────

  /// Upsert the snapshot's records for `scope` by business key, in one
  /// atomic batch. Collections outside `scope` or the snapshot's tables are
  /// untouched. Nothing is written unless the checksum verifies.
  pub async fn restore(
    &self,
    id: Uuid,
    scope: &[Collection],
    migration_id: Option<Uuid>,
  ) -> Result<RestoreReport> {
    let (meta, data) = self.load(id).await?;
    let tables: Vec<Collection> =
      normalize(scope).into_iter().filter(|c| meta.tables.contains(c)).collect();

    let mut ops = data.upserts(&tables);
    let records = ops.len();
    let mut audit = AuditEntry::new(
      ACTOR,
      AuditAction::Restore,
      format!("restored {records} record(s) from snapshot {id}"),
    );
    if let Some(migration_id) = migration_id {
      audit = audit.in_migration(migration_id);
    }
    ops.push(WriteOp::AppendAudit(audit));

    self
      .within_budget("restore", records as u64, async {
        self.store.apply(ops).await.map_err(Error::store)
      })
      .await?;

    tracing::info!(snapshot = %id, records, ?tables, "snapshot restored");
    Ok(RestoreReport { snapshot_id: id, tables, records })
  }

  // ── Retention ─────────────────────────────────────────────────────────────

  /// Delete snapshots older than `policy.max_age_days`, always keeping the
  /// `policy.min_keep` newest. Refuses while a migration holds the lock.
  pub async fn retention(&self, policy: RetentionPolicy) -> Result<RetentionReport> {
    let cutoff = chrono::TimeDelta::try_days(policy.max_age_days)
      .and_then(|age| Utc::now().checked_sub_signed(age))
      .ok_or_else(|| {
        Error::Input(format!(
          "retention window of {} days is out of range",
          policy.max_age_days
        ))
      })?;

    if let Some(lock) = self.store.migration_lock().await.map_err(Error::store)? {
      return Err(Error::Concurrency(format!(
        "migration {} holds the lock; retention skipped",
        lock.owner
      )));
    }

    let mut report = RetentionReport::default();
    for (i, meta) in self.list().await?.into_iter().enumerate() {
      if i < policy.min_keep || meta.timestamp >= cutoff {
        report.kept.push(meta.id);
        continue;
      }
      tokio::fs::remove_file(self.payload_path(meta.id)).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
      })?;
      tokio::fs::remove_file(self.meta_path(meta.id)).await?;
      tracing::info!(snapshot = %meta.id, "snapshot removed by retention");
      report.deleted.push(meta.id);
    }
    Ok(report)
  }
}

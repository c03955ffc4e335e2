//! Error taxonomy for `ladder-engine`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed source data or caller input.
  #[error("input error: {0}")]
  Input(String),

  /// A broken invariant above the configured tolerance.
  #[error("integrity error: {0}")]
  Integrity(String),

  /// A dangling reference that blocks the operation.
  #[error("referential error: {0}")]
  Referential(String),

  /// Another operation holds the migration lock.
  #[error("concurrency error: {0}")]
  Concurrency(String),

  #[error("snapshot {snapshot_id} checksum mismatch: expected {expected}, got {actual}")]
  Checksum {
    snapshot_id: Uuid,
    expected:    String,
    actual:      String,
  },

  /// A timeout or size limit was exceeded.
  #[error("capacity error: {0}")]
  Capacity(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("snapshot not found: {0}")]
  SnapshotNotFound(Uuid),

  #[error("illegal migration transition: {from} -> {to}")]
  InvalidTransition { from: String, to: String },
}

impl Error {
  /// Box a backend error crossing the [`ladder_core::store::LeagueStore`]
  /// boundary.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether the error left the store untouched by construction.
  pub fn is_refusal(&self) -> bool {
    matches!(self, Self::Concurrency(_) | Self::Checksum { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

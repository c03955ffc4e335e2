//! Error types for `ladder-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown match status: {0:?}")]
  UnknownMatchStatus(String),

  #[error("unknown collection: {0:?}")]
  UnknownCollection(String),

  #[error("unknown migration kind: {0:?}")]
  UnknownMigrationKind(String),

  #[error("unknown migration status: {0:?}")]
  UnknownMigrationStatus(String),

  #[error("unknown audit action: {0:?}")]
  UnknownAuditAction(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

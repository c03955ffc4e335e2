//! Audit entries: the append-only trail of every mutating action.

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
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
  Insert,
  Update,
  Delete,
  /// A match marked cancelled instead of being deleted.
  Cancel,
  /// A migration state machine transition.
  Transition,
  /// A snapshot restored into the store.
  Restore,
}

impl AuditAction {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownAuditAction(s.to_owned()))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
  pub id:           Uuid,
  pub at:           DateTime<Utc>,
  /// Who or what performed the action, e.g. `"repair"` or `"migration"`.
  pub actor:        String,
  pub action:       AuditAction,
  pub entity:       Option<Collection>,
  pub record_id:    Option<i64>,
  pub migration_id: Option<Uuid>,
  pub before:       Option<serde_json::Value>,
  pub after:        Option<serde_json::Value>,
  pub message:      String,
}

impl AuditEntry {
  pub fn new(
    actor: impl Into<String>,
    action: AuditAction,
    message: impl Into<String>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      at: Utc::now(),
      actor: actor.into(),
      action,
      entity: None,
      record_id: None,
      migration_id: None,
      before: None,
      after: None,
      message: message.into(),
    }
  }

  pub fn on(mut self, entity: Collection, record_id: Option<i64>) -> Self {
    self.entity = Some(entity);
    self.record_id = record_id;
    self
  }

  pub fn in_migration(mut self, migration_id: Uuid) -> Self {
    self.migration_id = Some(migration_id);
    self
  }

  /// Attach the record image before the change. A value that fails to
  /// serialise is dropped; it never fails the mutation it describes.
  pub fn before<T: Serialize>(mut self, value: &T) -> Self {
    self.before = serde_json::to_value(value).ok();
    self
  }

  /// Attach the record image after the change.
  pub fn after<T: Serialize>(mut self, value: &T) -> Self {
    self.after = serde_json::to_value(value).ok();
    self
  }
}

/// Parameters for [`crate::store::LeagueStore::list_audit`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
  pub actor:        Option<String>,
  pub migration_id: Option<Uuid>,
  pub entity:       Option<Collection>,
  /// Newest entries first; defaults to 100.
  pub limit:        Option<usize>,
}

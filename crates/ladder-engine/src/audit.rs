//! Append-only audit trail over the store.
//!
//! Mutating components usually put their entries into the same
//! [`WriteOp`] batch as the change itself. [`AuditLog::append`] is for
//! entries that stand alone, such as migration state transitions.

use std::sync::Arc;

use ladder_core::{
  audit::{AuditEntry, AuditQuery},
  store::{LeagueStore, WriteOp},
};

use crate::{Error, Result};

pub struct AuditLog<S> {
  store: Arc<S>,
}

impl<S> Clone for AuditLog<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: LeagueStore> AuditLog<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub async fn append(&self, entry: AuditEntry) -> Result<()> {
    tracing::debug!(
      actor = %entry.actor,
      action = %entry.action,
      "{}",
      entry.message
    );
    self
      .store
      .apply(vec![WriteOp::AppendAudit(entry)])
      .await
      .map_err(Error::store)?;
    Ok(())
  }

  /// Entries matching `query`, newest first.
  pub async fn recent(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
    self.store.list_audit(query).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use ladder_core::audit::AuditAction;
  use ladder_store_sqlite::SqliteStore;

  use super::*;

  #[tokio::test]
  async fn appended_entries_are_listed_newest_first() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let log = AuditLog::new(store);

    log
      .append(AuditEntry::new("tester", AuditAction::Transition, "first"))
      .await
      .unwrap();
    log
      .append(AuditEntry::new("tester", AuditAction::Transition, "second"))
      .await
      .unwrap();

    let entries = log.recent(&AuditQuery::default()).await.unwrap();
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["second", "first"]);
  }
}

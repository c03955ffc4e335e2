//! Operator alerts.
//!
//! Delivery (webhooks, mail, chat) is out of scope; the engine only hands
//! alerts to a [`Notifier`]. The shipped [`TracingNotifier`] writes them to
//! the log.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
  Info,
  Warning,
  Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
  pub severity: AlertSeverity,
  pub title:    String,
  pub message:  String,
}

impl Alert {
  pub fn new(
    severity: AlertSeverity,
    title: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self { severity, title: title.into(), message: message.into() }
  }
}

/// Receiver of operator alerts. Implementations must not block.
pub trait Notifier: Send + Sync {
  fn notify(&self, alert: &Alert);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, alert: &Alert) {
    match alert.severity {
      AlertSeverity::Info => {
        tracing::info!(title = %alert.title, "{}", alert.message)
      }
      AlertSeverity::Warning => {
        tracing::warn!(title = %alert.title, "{}", alert.message)
      }
      AlertSeverity::Critical => {
        tracing::error!(title = %alert.title, "{}", alert.message)
      }
    }
  }
}

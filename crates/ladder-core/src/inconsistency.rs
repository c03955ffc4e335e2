//! Structured findings produced by the standings calculator and the
//! consistency validator.
//!
//! Inconsistencies are ephemeral: every validation run produces them afresh
//! and nothing treats a stored copy as authoritative.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ─── Collections ─────────────────────────────────────────────────────────────

/// The named record collections the engine knows about.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
  Leagues,
  Seasons,
  Participants,
  Matches,
  Standings,
}

impl Collection {
  /// All collections in dependency order (referenced before referencing).
  pub const ALL: [Collection; 5] = [
    Self::Leagues,
    Self::Seasons,
    Self::Participants,
    Self::Matches,
    Self::Standings,
  ];

  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownCollection(s.to_owned()))
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  /// Informational; never affects exit codes or gating.
  Warning,
  /// Abort-worthy.
  Error,
}

/// Which part of the error taxonomy a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
  /// Malformed source data.
  Input,
  /// A broken invariant.
  Integrity,
  /// A dangling reference.
  Referential,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InconsistencyKind {
  NegativeValues,
  ArithmeticMismatch,
  StandingsDrift,
  DuplicateStandings,
  OrphanStanding,
  OrphanMatch,
  SelfPlay,
  DuplicateRanks,
  RankGaps,
  InvalidScore,
  UnresolvedParticipant,
  ManualStanding,
}

impl InconsistencyKind {
  pub fn severity(self) -> Severity {
    match self {
      Self::RankGaps | Self::InvalidScore | Self::ManualStanding => {
        Severity::Warning
      }
      _ => Severity::Error,
    }
  }

  pub fn class(self) -> ErrorClass {
    match self {
      Self::OrphanStanding | Self::OrphanMatch | Self::UnresolvedParticipant => {
        ErrorClass::Referential
      }
      Self::InvalidScore => ErrorClass::Input,
      _ => ErrorClass::Integrity,
    }
  }

  /// Whether the repair engine has a deterministic fix for this kind.
  pub fn fixable(self) -> bool {
    matches!(
      self,
      Self::NegativeValues
        | Self::ArithmeticMismatch
        | Self::DuplicateStandings
        | Self::OrphanStanding
        | Self::OrphanMatch
        | Self::SelfPlay
    )
  }
}

// ─── Inconsistency ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
  pub kind:           InconsistencyKind,
  pub severity:       Severity,
  pub class:          ErrorClass,
  pub entity:         Collection,
  pub description:    String,
  pub affected_count: usize,
  pub fixable:        bool,
  /// Ids of the affected rows in `entity`, ascending.
  pub records:        Vec<i64>,
}

impl Inconsistency {
  /// Build a finding whose severity, class and fixability follow from `kind`.
  pub fn new(
    kind: InconsistencyKind,
    entity: Collection,
    description: impl Into<String>,
    mut records: Vec<i64>,
  ) -> Self {
    records.sort_unstable();
    records.dedup();
    Self {
      kind,
      severity: kind.severity(),
      class: kind.class(),
      entity,
      description: description.into(),
      affected_count: records.len(),
      fixable: kind.fixable(),
      records,
    }
  }

  pub fn is_error(&self) -> bool { self.severity == Severity::Error }
}

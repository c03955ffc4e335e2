//! The consistency validator: a read-only diagnostic pass over a dataset.
//!
//! Every check runs on every call, independently of the others, and the
//! validator never fails: however corrupted the input, the result is a
//! [`ValidationReport`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
  calculator::{StandingsCalculator, TiePolicy},
  fixture::{Match, MatchStatus},
  inconsistency::{Collection, Inconsistency, InconsistencyKind, Severity},
  league::{League, Participant, ParticipantDirectory, Season},
  standing::Standing,
};

// ─── Input ───────────────────────────────────────────────────────────────────

/// Everything the validator looks at.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
  pub leagues:      Vec<League>,
  pub seasons:      Vec<Season>,
  pub participants: Vec<Participant>,
  pub matches:      Vec<Match>,
  pub standings:    Vec<Standing>,
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// Report section a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckGroup {
  Structural,
  Mathematical,
  Referential,
  Ranking,
  Input,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
  pub name:   String,
  pub group:  CheckGroup,
  pub issues: Vec<Inconsistency>,
}

impl CheckOutcome {
  pub fn passed(&self) -> bool { self.issues.is_empty() }

  /// The worst severity among the issues, if any.
  pub fn severity(&self) -> Option<Severity> {
    self.issues.iter().map(|i| i.severity).max()
  }

  /// Total rows affected across the issues.
  pub fn affected(&self) -> usize {
    self.issues.iter().map(|i| i.affected_count).sum()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub checks: Vec<CheckOutcome>,
}

impl ValidationReport {
  pub fn issues(&self) -> impl Iterator<Item = &Inconsistency> {
    self.checks.iter().flat_map(|c| c.issues.iter())
  }

  pub fn errors(&self) -> impl Iterator<Item = &Inconsistency> {
    self.issues().filter(|i| i.is_error())
  }

  pub fn warnings(&self) -> impl Iterator<Item = &Inconsistency> {
    self.issues().filter(|i| !i.is_error())
  }

  pub fn error_count(&self) -> usize { self.errors().count() }

  pub fn warning_count(&self) -> usize { self.warnings().count() }

  pub fn has_errors(&self) -> bool { self.errors().next().is_some() }

  /// Sum of affected rows across error-severity findings. This is the
  /// quantity compared against tolerances.
  pub fn error_weight(&self) -> usize {
    self.errors().map(|i| i.affected_count).sum()
  }

  /// Findings the repair engine can act on.
  pub fn fixable(&self) -> Vec<Inconsistency> {
    self.issues().filter(|i| i.fixable).cloned().collect()
  }

  pub fn check(&self, name: &str) -> Option<&CheckOutcome> {
    self.checks.iter().find(|c| c.name == name)
  }
}

// ─── Validator ───────────────────────────────────────────────────────────────

pub const CHECK_NEGATIVE_VALUES: &str = "negative_values";
pub const CHECK_ARITHMETIC: &str = "arithmetic";
pub const CHECK_DRIFT: &str = "drift";
pub const CHECK_DUPLICATES: &str = "duplicates";
pub const CHECK_ORPHAN_STANDINGS: &str = "orphan_standings";
pub const CHECK_ORPHAN_MATCHES: &str = "orphan_matches";
pub const CHECK_SELF_PLAY: &str = "self_play";
pub const CHECK_RANK_SEQUENCE: &str = "rank_sequence";
pub const CHECK_INVALID_SCORES: &str = "invalid_scores";
pub const CHECK_MANUAL_STANDINGS: &str = "manual_standings";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyValidator {
  calculator: StandingsCalculator,
}

/// Lookups shared by the individual checks.
struct Context<'a> {
  data:      &'a Dataset,
  directory: ParticipantDirectory,
  leagues:   HashSet<i64>,
  seasons:   HashSet<i64>,
}

impl<'a> Context<'a> {
  fn new(data: &'a Dataset) -> Self {
    Self {
      data,
      directory: ParticipantDirectory::new(data.participants.iter().cloned()),
      leagues: data.leagues.iter().map(|l| l.id).collect(),
      seasons: data.seasons.iter().map(|s| s.id).collect(),
    }
  }
}

impl ConsistencyValidator {
  pub fn new(tie_policy: TiePolicy) -> Self {
    Self { calculator: StandingsCalculator::new(tie_policy) }
  }

  pub fn validate(&self, data: &Dataset) -> ValidationReport {
    let ctx = Context::new(data);
    let checks = vec![
      outcome(CHECK_NEGATIVE_VALUES, CheckGroup::Mathematical, negative_values(&ctx)),
      outcome(CHECK_ARITHMETIC, CheckGroup::Mathematical, arithmetic(&ctx)),
      outcome(CHECK_DRIFT, CheckGroup::Mathematical, self.drift(&ctx)),
      outcome(CHECK_DUPLICATES, CheckGroup::Structural, duplicates(&ctx)),
      outcome(CHECK_ORPHAN_STANDINGS, CheckGroup::Referential, orphan_standings(&ctx)),
      outcome(CHECK_ORPHAN_MATCHES, CheckGroup::Referential, orphan_matches(&ctx)),
      outcome(CHECK_SELF_PLAY, CheckGroup::Structural, self_play(&ctx)),
      outcome(CHECK_RANK_SEQUENCE, CheckGroup::Ranking, rank_sequence(&ctx)),
      outcome(CHECK_INVALID_SCORES, CheckGroup::Input, invalid_scores(&ctx)),
      outcome(CHECK_MANUAL_STANDINGS, CheckGroup::Input, manual_standings(&ctx)),
    ];
    ValidationReport { checks }
  }

  /// Stored auto-calculated rows that differ from a fresh calculation.
  /// Rows for participants outside the season roster are left to the
  /// orphan check; missing rows are not drift.
  fn drift(&self, ctx: &Context<'_>) -> Vec<Inconsistency> {
    let mut by_pair: HashMap<(i64, i64), Vec<Match>> = HashMap::new();
    for m in &ctx.data.matches {
      by_pair.entry((m.league_id, m.season_id)).or_default().push(m.clone());
    }

    let mut drifted = Vec::new();
    for season in &ctx.data.seasons {
      let roster: Vec<Participant> = season
        .roster
        .iter()
        .filter_map(|id| ctx.directory.get(*id).cloned())
        .collect();
      let matches = by_pair
        .get(&(season.league_id, season.id))
        .map(Vec::as_slice)
        .unwrap_or(&[]);
      let table =
        self.calculator.calculate(season.league_id, season.id, &roster, matches);

      for s in ctx.data.standings.iter().filter(|s| {
        s.auto_calculated
          && s.league_id == season.league_id
          && s.season_id == season.id
      }) {
        let Some(pid) = ctx.directory.resolve_id(&s.participant) else {
          continue;
        };
        if let Some(expected) = table.get(pid)
          && (expected.totals != s.totals || expected.rank != s.rank)
        {
          drifted.push(s.id);
        }
      }
    }

    single(
      InconsistencyKind::StandingsDrift,
      Collection::Standings,
      drifted,
      |n| format!("{n} standing(s) differ from a recalculation of their matches"),
    )
  }
}

fn outcome(name: &str, group: CheckGroup, issues: Vec<Inconsistency>) -> CheckOutcome {
  CheckOutcome { name: name.to_owned(), group, issues }
}

/// Zero or one finding covering `records`.
fn single(
  kind: InconsistencyKind,
  entity: Collection,
  records: Vec<i64>,
  describe: impl FnOnce(usize) -> String,
) -> Vec<Inconsistency> {
  if records.is_empty() {
    return Vec::new();
  }
  let description = describe(records.len());
  vec![Inconsistency::new(kind, entity, description, records)]
}

// ─── Checks ──────────────────────────────────────────────────────────────────

fn negative_values(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .standings
    .iter()
    .filter(|s| s.totals.has_negative() || s.rank < 0)
    .map(|s| s.id)
    .collect();
  single(InconsistencyKind::NegativeValues, Collection::Standings, records, |n| {
    format!("{n} standing(s) have negative counters")
  })
}

fn arithmetic(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .standings
    .iter()
    .filter(|s| !s.totals.is_consistent())
    .map(|s| s.id)
    .collect();
  single(
    InconsistencyKind::ArithmeticMismatch,
    Collection::Standings,
    records,
    |n| {
      format!(
        "{n} standing(s) violate played = W+D+L, goal_diff = GF-GA or \
         points = 3W+D"
      )
    },
  )
}

fn duplicates(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let mut groups: BTreeMap<(i64, i64, i64), Vec<i64>> = BTreeMap::new();
  for s in &ctx.data.standings {
    if let Some(pid) = ctx.directory.resolve_id(&s.participant) {
      groups.entry((pid, s.league_id, s.season_id)).or_default().push(s.id);
    }
  }
  let dup_groups: Vec<Vec<i64>> =
    groups.into_values().filter(|ids| ids.len() > 1).collect();
  let group_count = dup_groups.len();
  let records = dup_groups.into_iter().flatten().collect();
  single(
    InconsistencyKind::DuplicateStandings,
    Collection::Standings,
    records,
    |n| {
      format!(
        "{n} standing rows share {group_count} (participant, league, season) key(s)"
      )
    },
  )
}

fn orphan_standings(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .standings
    .iter()
    .filter(|s| {
      !ctx.leagues.contains(&s.league_id)
        || !ctx.seasons.contains(&s.season_id)
        || ctx.directory.resolve(&s.participant).is_none()
    })
    .map(|s| s.id)
    .collect();
  single(InconsistencyKind::OrphanStanding, Collection::Standings, records, |n| {
    format!("{n} standing(s) reference a missing participant, league or season")
  })
}

fn orphan_matches(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .matches
    .iter()
    .filter(|m| {
      !ctx.leagues.contains(&m.league_id)
        || !ctx.seasons.contains(&m.season_id)
        || ctx.directory.resolve(&m.home).is_none()
        || ctx.directory.resolve(&m.away).is_none()
    })
    .map(|m| m.id)
    .collect();
  single(InconsistencyKind::OrphanMatch, Collection::Matches, records, |n| {
    format!("{n} match(es) reference a missing participant, league or season")
  })
}

/// Whether both sides of `m` are the same participant. Cancelled matches are
/// the repaired state and are not reported again.
pub fn is_self_play(m: &Match, directory: &ParticipantDirectory) -> bool {
  if m.status == MatchStatus::Cancelled {
    return false;
  }
  match (directory.resolve_id(&m.home), directory.resolve_id(&m.away)) {
    (Some(h), Some(a)) => h == a,
    _ => !m.home.is_empty() && m.home == m.away,
  }
}

fn self_play(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .matches
    .iter()
    .filter(|m| is_self_play(m, &ctx.directory))
    .map(|m| m.id)
    .collect();
  single(InconsistencyKind::SelfPlay, Collection::Matches, records, |n| {
    format!("{n} match(es) have the same participant on both sides")
  })
}

fn rank_sequence(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let mut groups: BTreeMap<(i64, i64), Vec<&Standing>> = BTreeMap::new();
  for s in &ctx.data.standings {
    groups.entry((s.league_id, s.season_id)).or_default().push(s);
  }

  let mut duplicated = Vec::new();
  let mut out_of_range = Vec::new();
  for rows in groups.values() {
    // The season-start state where everyone shares rank 1 is allowed.
    if rows.iter().all(|s| s.totals.played == 0 && s.rank == 1) {
      continue;
    }
    let mut by_rank: HashMap<i64, Vec<i64>> = HashMap::new();
    for s in rows {
      by_rank.entry(s.rank).or_default().push(s.id);
    }
    duplicated.extend(by_rank.into_values().filter(|ids| ids.len() > 1).flatten());

    let n = rows.len() as i64;
    out_of_range.extend(
      rows
        .iter()
        .filter(|s| s.rank < 1 || s.rank > n)
        .map(|s| s.id),
    );
  }

  let mut issues = single(
    InconsistencyKind::DuplicateRanks,
    Collection::Standings,
    duplicated,
    |n| format!("{n} standing(s) share a rank with another row of their table"),
  );
  issues.extend(single(
    InconsistencyKind::RankGaps,
    Collection::Standings,
    out_of_range,
    |n| format!("{n} standing(s) have a rank outside 1..N for their table"),
  ));
  issues
}

fn invalid_scores(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .matches
    .iter()
    .filter(|m| m.has_invalid_score())
    .map(|m| m.id)
    .collect();
  single(InconsistencyKind::InvalidScore, Collection::Matches, records, |n| {
    format!("{n} finished match(es) have a missing or negative score")
  })
}

fn manual_standings(ctx: &Context<'_>) -> Vec<Inconsistency> {
  let records = ctx
    .data
    .standings
    .iter()
    .filter(|s| !s.auto_calculated)
    .map(|s| s.id)
    .collect();
  single(InconsistencyKind::ManualStanding, Collection::Standings, records, |n| {
    format!("{n} standing(s) are manual overrides and skip drift checks")
  })
}

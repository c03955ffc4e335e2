//! Integration tests for `SqliteStore` against an in-memory database.

use ladder_core::{
  audit::{AuditAction, AuditEntry, AuditQuery},
  fixture::{MatchStatus, NewMatch},
  inconsistency::Collection,
  league::{NewLeague, NewParticipant, NewSeason, ParticipantRef},
  migration::{MigrationKind, MigrationRecord, MigrationStatus},
  standing::{NewStanding, Totals},
  store::{LeagueStore, MatchQuery, StandingQuery, WriteOp},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

/// A league with one season and two enrolled clubs. Returns
/// `(store, league_id, season_id, [club_a, club_b])`.
async fn seeded() -> (SqliteStore, i64, i64, [i64; 2]) {
  let s = store().await;
  let league = s
    .create_league(NewLeague { slug: "premier".into(), name: "Premier".into() })
    .await
    .unwrap();
  let a = s
    .create_participant(NewParticipant::new("alpha", "Alpha").with_legacy_team(10))
    .await
    .unwrap();
  let b = s
    .create_participant(NewParticipant::new("beta", "Beta").with_legacy_team(20))
    .await
    .unwrap();
  let season = s
    .create_season(NewSeason {
      slug:      "premier-2025".into(),
      league_id: league.id,
      name:      "2025".into(),
      roster:    vec![b.id, a.id],
    })
    .await
    .unwrap();
  (s, league.id, season.id, [a.id, b.id])
}

// ─── Reference data ──────────────────────────────────────────────────────────

#[tokio::test]
async fn season_roster_round_trips_sorted() {
  let (s, league, season, [a, b]) = seeded().await;

  let fetched = s.get_season(season).await.unwrap().unwrap();
  assert_eq!(fetched.league_id, league);
  assert_eq!(fetched.roster, vec![a.min(b), a.max(b)]);

  assert_eq!(s.list_seasons(Some(league)).await.unwrap().len(), 1);
  assert!(s.list_seasons(Some(league + 100)).await.unwrap().is_empty());
}

#[tokio::test]
async fn season_for_missing_league_is_rejected() {
  let s = store().await;
  let err = s
    .create_season(NewSeason {
      slug:      "ghost".into(),
      league_id: 42,
      name:      "Ghost".into(),
      roster:    vec![],
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::LeagueNotFound(42)));
}

#[tokio::test]
async fn participants_keep_legacy_team_ids() {
  let (s, ..) = seeded().await;
  let all = s.list_participants().await.unwrap();
  let legacy: Vec<_> = all.iter().map(|p| p.legacy_team_id).collect();
  assert_eq!(legacy, vec![Some(10), Some(20)]);
}

// ─── Matches ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_match() {
  let (s, league, season, [a, b]) = seeded().await;
  let m = s
    .create_match(
      NewMatch::scheduled(
        league,
        season,
        1,
        ParticipantRef::club(a),
        ParticipantRef::team(20),
      )
      .finished(2, 1),
    )
    .await
    .unwrap();

  let fetched = s.get_match(m.id).await.unwrap().unwrap();
  assert_eq!(fetched, m);
  assert_eq!(fetched.away.team_id, Some(20));
  assert_eq!(fetched.home.club_id, Some(a));
  assert_ne!(a, b);
}

#[tokio::test]
async fn find_matches_filters_by_status_and_season() {
  let (s, league, season, [a, b]) = seeded().await;
  let (home, away) = (ParticipantRef::club(a), ParticipantRef::club(b));
  s.create_match(NewMatch::scheduled(league, season, 1, home, away).finished(1, 0))
    .await
    .unwrap();
  s.create_match(NewMatch::scheduled(league, season, 2, away, home))
    .await
    .unwrap();

  let finished = s
    .find_matches(&MatchQuery {
      season_id: Some(season),
      status: Some(MatchStatus::Finished),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(finished.len(), 1);
  assert_eq!(finished[0].matchday, 1);

  let other_season = s
    .find_matches(&MatchQuery { season_id: Some(season + 1), ..Default::default() })
    .await
    .unwrap();
  assert!(other_season.is_empty());
}

#[tokio::test]
async fn updated_after_is_strict() {
  let (s, league, season, [a, b]) = seeded().await;
  let m = s
    .create_match(NewMatch::scheduled(
      league,
      season,
      1,
      ParticipantRef::club(a),
      ParticipantRef::club(b),
    ))
    .await
    .unwrap();

  let none = s
    .find_matches(&MatchQuery { updated_after: Some(m.updated_at), ..Default::default() })
    .await
    .unwrap();
  assert!(none.is_empty());

  let earlier = m.updated_at - chrono::Duration::seconds(1);
  let some = s
    .find_matches(&MatchQuery { updated_after: Some(earlier), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(some.len(), 1);
}

// ─── Standings ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_find_standing() {
  let (s, league, season, [a, _]) = seeded().await;
  let created = s
    .create_standing(
      NewStanding::empty(ParticipantRef::club(a), league, season)
        .with_totals(Totals::from_base(1, 0, 0, 2, 1))
        .with_rank(1),
    )
    .await
    .unwrap();

  let fetched = s.get_standing(created.id).await.unwrap().unwrap();
  assert_eq!(fetched, created);
  assert_eq!(fetched.totals.points, 3);

  let found = s
    .find_standings(&StandingQuery { league_id: Some(league), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(s.count(Collection::Standings).await.unwrap(), 1);
}

// ─── Apply ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn apply_updates_and_audits_in_one_batch() {
  let (s, league, season, [a, b]) = seeded().await;
  let mut m = s
    .create_match(NewMatch::scheduled(
      league,
      season,
      1,
      ParticipantRef::club(a),
      ParticipantRef::club(b),
    ))
    .await
    .unwrap();
  let before = m.clone();
  m.status = MatchStatus::Cancelled;

  let audit = AuditEntry::new("test", AuditAction::Cancel, "cancelled")
    .on(Collection::Matches, Some(m.id))
    .before(&before)
    .after(&m);
  let affected = s
    .apply(vec![WriteOp::UpdateMatch(m.clone()), WriteOp::AppendAudit(audit)])
    .await
    .unwrap();
  assert_eq!(affected, 2);

  let fetched = s.get_match(m.id).await.unwrap().unwrap();
  assert_eq!(fetched.status, MatchStatus::Cancelled);

  let trail = s.list_audit(&AuditQuery::default()).await.unwrap();
  assert_eq!(trail.len(), 1);
  assert_eq!(trail[0].action, AuditAction::Cancel);
  assert_eq!(trail[0].entity, Some(Collection::Matches));
  assert!(trail[0].before.is_some() && trail[0].after.is_some());
}

#[tokio::test]
async fn apply_rolls_back_the_whole_batch_on_failure() {
  let (s, league, season, [a, _]) = seeded().await;
  let standing = s
    .create_standing(NewStanding::empty(ParticipantRef::club(a), league, season))
    .await
    .unwrap();

  // The second insert reuses the first one's uid and violates the unique
  // index, so the delete before it must not survive either.
  let first = NewStanding::empty(ParticipantRef::club(a), league, season);
  let second = first.clone();
  let result = s
    .apply(vec![
      WriteOp::DeleteStanding(standing.id),
      WriteOp::InsertStanding(first),
      WriteOp::InsertStanding(second),
    ])
    .await;
  assert!(result.is_err());

  assert!(s.get_standing(standing.id).await.unwrap().is_some());
}

#[tokio::test]
async fn upserts_match_by_business_key() {
  let (s, league, season, [a, b]) = seeded().await;
  let m = s
    .create_match(NewMatch::scheduled(
      league,
      season,
      3,
      ParticipantRef::club(a),
      ParticipantRef::club(b),
    ))
    .await
    .unwrap();

  // Same uid, different content: updated in place.
  let mut changed = m.clone();
  changed.score_home = Some(4);
  changed.score_away = Some(4);
  changed.status = MatchStatus::Finished;
  s.apply(vec![WriteOp::UpsertMatch(changed)]).await.unwrap();
  assert_eq!(s.count(Collection::Matches).await.unwrap(), 1);
  assert_eq!(s.get_match(m.id).await.unwrap().unwrap().score_home, Some(4));

  // Deleted then upserted: the original id is reused because it is free.
  s.apply(vec![WriteOp::DeleteMatch(m.id)]).await.unwrap();
  s.apply(vec![WriteOp::UpsertMatch(m.clone())]).await.unwrap();
  let restored = s.get_match(m.id).await.unwrap().unwrap();
  assert_eq!(restored.uid, m.uid);
  assert_eq!(restored.status, MatchStatus::Scheduled);
}

#[tokio::test]
async fn upsert_season_replaces_roster() {
  let (s, _, season, [a, _]) = seeded().await;
  let mut fetched = s.get_season(season).await.unwrap().unwrap();
  fetched.roster = vec![a];
  s.apply(vec![WriteOp::UpsertSeason(fetched)]).await.unwrap();

  assert_eq!(s.get_season(season).await.unwrap().unwrap().roster, vec![a]);
  assert_eq!(s.count(Collection::Seasons).await.unwrap(), 1);
}

// ─── Migration bookkeeping ───────────────────────────────────────────────────

#[tokio::test]
async fn migration_record_round_trip() {
  let s = store().await;
  let mut record = MigrationRecord::start(MigrationKind::AllRefs);
  s.save_migration_record(&record).await.unwrap();

  record.stats.processed = 12;
  record.stats.migrated = 10;
  record.stats.skipped = 2;
  record.backup_id = Some(Uuid::new_v4());
  record.finish(MigrationStatus::Committed, Some("done".into()));
  s.save_migration_record(&record).await.unwrap();

  let fetched = s.get_migration_record(record.id).await.unwrap().unwrap();
  assert_eq!(fetched.status, MigrationStatus::Committed);
  assert_eq!(fetched.stats, record.stats);
  assert_eq!(fetched.backup_id, record.backup_id);
  assert!(fetched.finished_at.is_some());

  assert_eq!(s.list_migration_records(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn migration_lock_is_exclusive() {
  let s = store().await;
  let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

  assert!(s.acquire_migration_lock(first).await.unwrap());
  assert!(!s.acquire_migration_lock(second).await.unwrap());
  // Re-entrant for the holder.
  assert!(s.acquire_migration_lock(first).await.unwrap());
  assert_eq!(s.migration_lock().await.unwrap().unwrap().owner, first);

  assert!(!s.release_migration_lock(second).await.unwrap());
  assert!(s.release_migration_lock(first).await.unwrap());
  assert!(s.migration_lock().await.unwrap().is_none());
  assert!(s.acquire_migration_lock(second).await.unwrap());
}

#[tokio::test]
async fn audit_query_filters_and_limits() {
  let s = store().await;
  let migration = Uuid::new_v4();
  s.apply(vec![
    WriteOp::AppendAudit(AuditEntry::new("repair", AuditAction::Delete, "one")),
    WriteOp::AppendAudit(
      AuditEntry::new("migration", AuditAction::Transition, "two")
        .in_migration(migration),
    ),
    WriteOp::AppendAudit(AuditEntry::new("repair", AuditAction::Update, "three")),
  ])
  .await
  .unwrap();

  let repairs = s
    .list_audit(&AuditQuery { actor: Some("repair".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(repairs.len(), 2);
  assert_eq!(repairs[0].message, "three");

  let in_run = s
    .list_audit(&AuditQuery { migration_id: Some(migration), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(in_run.len(), 1);

  let latest = s
    .list_audit(&AuditQuery { limit: Some(1), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(latest.len(), 1);
  assert_eq!(latest[0].message, "three");
}

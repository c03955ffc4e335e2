//! [`SqliteStore`], the SQLite implementation of [`LeagueStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use ladder_core::{
  audit::{AuditEntry, AuditQuery},
  fixture::{Match, NewMatch},
  inconsistency::Collection,
  league::{League, NewLeague, NewParticipant, NewSeason, Participant, Season},
  migration::{LockInfo, MigrationRecord},
  standing::{NewStanding, Standing},
  store::{LeagueStore, MatchQuery, StandingQuery, WriteOp},
};

use crate::{
  Error, Result,
  encode::{
    AUDIT_COLUMNS, AuditRow, MATCH_COLUMNS, MIGRATION_COLUMNS, MatchRow,
    MigrationRow, STANDING_COLUMNS, StandingRow, decode_dt, decode_uuid,
    encode_dt, encode_uuid, stored_precision,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Ladder store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// A [`WriteOp`] with every value already encoded, ready to cross onto the
/// database thread.
enum EncodedOp {
  UpdateMatch(MatchRow),
  UpdateStanding(StandingRow),
  InsertStanding(StandingRow),
  DeleteMatch(i64),
  DeleteStanding(i64),
  UpsertLeague(League),
  UpsertSeason(Season),
  UpsertParticipant(Participant),
  UpsertMatch(MatchRow),
  UpsertStanding(StandingRow),
  AppendAudit(AuditRow),
}

impl EncodedOp {
  fn encode(op: WriteOp) -> Result<Self> {
    Ok(match op {
      WriteOp::UpdateMatch(m) => Self::UpdateMatch(MatchRow::from_match(&m)),
      WriteOp::UpdateStanding(s) => {
        Self::UpdateStanding(StandingRow::from_standing(&s))
      }
      WriteOp::InsertStanding(n) => {
        Self::InsertStanding(StandingRow::from_standing(&materialize_standing(n)))
      }
      WriteOp::DeleteMatch(id) => Self::DeleteMatch(id),
      WriteOp::DeleteStanding(id) => Self::DeleteStanding(id),
      WriteOp::UpsertLeague(l) => Self::UpsertLeague(l),
      WriteOp::UpsertSeason(s) => Self::UpsertSeason(s),
      WriteOp::UpsertParticipant(p) => Self::UpsertParticipant(p),
      WriteOp::UpsertMatch(m) => Self::UpsertMatch(MatchRow::from_match(&m)),
      WriteOp::UpsertStanding(s) => {
        Self::UpsertStanding(StandingRow::from_standing(&s))
      }
      WriteOp::AppendAudit(e) => Self::AppendAudit(AuditRow::from_entry(&e)?),
    })
  }
}

/// A `NewStanding` as it will be stored; `id` is assigned by SQLite.
fn materialize_standing(n: NewStanding) -> Standing {
  Standing {
    id:                 0,
    uid:                n.uid,
    participant:        n.participant,
    league_id:          n.league_id,
    season_id:          n.season_id,
    totals:             n.totals,
    rank:               n.rank,
    auto_calculated:    n.auto_calculated,
    calculation_source: n.calculation_source,
    last_updated:       stored_precision(Utc::now()),
  }
}

/// Reuse the snapshot's id when it is free, otherwise let SQLite pick one.
const PRESERVE_ID: &str = "(SELECT CASE WHEN EXISTS (SELECT 1 FROM {t} WHERE id = ?1) \
                            THEN NULL ELSE ?1 END)";

fn preserve_id(table: &str) -> String { PRESERVE_ID.replace("{t}", table) }

fn table_name(collection: Collection) -> &'static str {
  match collection {
    Collection::Leagues => "leagues",
    Collection::Seasons => "seasons",
    Collection::Participants => "participants",
    Collection::Matches => "matches",
    Collection::Standings => "standings",
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// All seasons (optionally of one league) with their rosters.
  async fn load_seasons(
    &self,
    league_id: Option<i64>,
    season_id: Option<i64>,
  ) -> Result<Vec<Season>> {
    let (seasons, roster) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, slug, league_id, name FROM seasons
           WHERE (?1 IS NULL OR league_id = ?1) AND (?2 IS NULL OR id = ?2)
           ORDER BY id",
        )?;
        let seasons = stmt
          .query_map(rusqlite::params![league_id, season_id], |row| {
            Ok(Season {
              id:        row.get(0)?,
              slug:      row.get(1)?,
              league_id: row.get(2)?,
              name:      row.get(3)?,
              roster:    Vec::new(),
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
          "SELECT season_id, participant_id FROM season_participants
           ORDER BY season_id, participant_id",
        )?;
        let roster = stmt
          .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((seasons, roster))
      })
      .await?;

    let mut by_season: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (season, participant) in roster {
      by_season.entry(season).or_default().push(participant);
    }

    Ok(
      seasons
        .into_iter()
        .map(|mut s| {
          s.roster = by_season.remove(&s.id).unwrap_or_default();
          s
        })
        .collect(),
    )
  }
}

/// Execute one encoded operation inside an open transaction.
fn execute_op(tx: &rusqlite::Transaction<'_>, op: EncodedOp) -> rusqlite::Result<usize> {
  match op {
    EncodedOp::UpdateMatch(m) => tx.execute(
      "UPDATE matches SET
         uid = ?2, home_team_id = ?3, home_club_id = ?4, away_team_id = ?5,
         away_club_id = ?6, league_id = ?7, season_id = ?8, matchday = ?9,
         score_home = ?10, score_away = ?11, status = ?12, updated_at = ?13
       WHERE id = ?1",
      match_params(&m),
    ),
    EncodedOp::UpdateStanding(s) => tx.execute(
      "UPDATE standings SET
         uid = ?2, team_id = ?3, club_id = ?4, league_id = ?5, season_id = ?6,
         played = ?7, wins = ?8, draws = ?9, losses = ?10, goals_for = ?11,
         goals_against = ?12, goal_diff = ?13, points = ?14, rank = ?15,
         auto_calculated = ?16, calculation_source = ?17, last_updated = ?18
       WHERE id = ?1",
      standing_params(&s),
    ),
    EncodedOp::InsertStanding(s) => tx.execute(
      &format!(
        "INSERT INTO standings ({STANDING_COLUMNS})
         VALUES (NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18)"
      ),
      standing_params(&s),
    ),
    EncodedOp::DeleteMatch(id) => {
      tx.execute("DELETE FROM matches WHERE id = ?1", rusqlite::params![id])
    }
    EncodedOp::DeleteStanding(id) => {
      tx.execute("DELETE FROM standings WHERE id = ?1", rusqlite::params![id])
    }
    EncodedOp::UpsertLeague(l) => tx.execute(
      &format!(
        "INSERT INTO leagues (id, slug, name) VALUES ({}, ?2, ?3)
         ON CONFLICT(slug) DO UPDATE SET name = excluded.name",
        preserve_id("leagues")
      ),
      rusqlite::params![l.id, l.slug, l.name],
    ),
    EncodedOp::UpsertSeason(s) => {
      let mut n = tx.execute(
        &format!(
          "INSERT INTO seasons (id, slug, league_id, name) VALUES ({}, ?2, ?3, ?4)
           ON CONFLICT(slug) DO UPDATE SET
             league_id = excluded.league_id, name = excluded.name",
          preserve_id("seasons")
        ),
        rusqlite::params![s.id, s.slug, s.league_id, s.name],
      )?;
      let season_id: i64 = tx.query_row(
        "SELECT id FROM seasons WHERE slug = ?1",
        rusqlite::params![s.slug],
        |r| r.get(0),
      )?;
      tx.execute(
        "DELETE FROM season_participants WHERE season_id = ?1",
        rusqlite::params![season_id],
      )?;
      for participant_id in &s.roster {
        n += tx.execute(
          "INSERT OR IGNORE INTO season_participants (season_id, participant_id)
           VALUES (?1, ?2)",
          rusqlite::params![season_id, participant_id],
        )?;
      }
      Ok(n)
    }
    EncodedOp::UpsertParticipant(p) => tx.execute(
      &format!(
        "INSERT INTO participants (id, slug, name, legacy_team_id)
         VALUES ({}, ?2, ?3, ?4)
         ON CONFLICT(slug) DO UPDATE SET
           name = excluded.name, legacy_team_id = excluded.legacy_team_id",
        preserve_id("participants")
      ),
      rusqlite::params![p.id, p.slug, p.name, p.legacy_team_id],
    ),
    EncodedOp::UpsertMatch(m) => tx.execute(
      &format!(
        "INSERT INTO matches ({MATCH_COLUMNS})
         VALUES ({}, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(uid) DO UPDATE SET
           home_team_id = excluded.home_team_id,
           home_club_id = excluded.home_club_id,
           away_team_id = excluded.away_team_id,
           away_club_id = excluded.away_club_id,
           league_id    = excluded.league_id,
           season_id    = excluded.season_id,
           matchday     = excluded.matchday,
           score_home   = excluded.score_home,
           score_away   = excluded.score_away,
           status       = excluded.status,
           updated_at   = excluded.updated_at",
        preserve_id("matches")
      ),
      match_params(&m),
    ),
    EncodedOp::UpsertStanding(s) => tx.execute(
      &format!(
        "INSERT INTO standings ({STANDING_COLUMNS})
         VALUES ({}, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18)
         ON CONFLICT(uid) DO UPDATE SET
           team_id            = excluded.team_id,
           club_id            = excluded.club_id,
           league_id          = excluded.league_id,
           season_id          = excluded.season_id,
           played             = excluded.played,
           wins               = excluded.wins,
           draws              = excluded.draws,
           losses             = excluded.losses,
           goals_for          = excluded.goals_for,
           goals_against      = excluded.goals_against,
           goal_diff          = excluded.goal_diff,
           points             = excluded.points,
           rank               = excluded.rank,
           auto_calculated    = excluded.auto_calculated,
           calculation_source = excluded.calculation_source,
           last_updated       = excluded.last_updated",
        preserve_id("standings")
      ),
      standing_params(&s),
    ),
    EncodedOp::AppendAudit(a) => tx.execute(
      &format!(
        "INSERT INTO audit_log ({AUDIT_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
      ),
      rusqlite::params![
        a.id,
        a.at,
        a.actor,
        a.action,
        a.entity,
        a.record_id,
        a.migration_id,
        a.before_json,
        a.after_json,
        a.message,
      ],
    ),
  }
}

type Params<'a> = rusqlite::ParamsFromIter<Vec<&'a dyn rusqlite::ToSql>>;

fn match_params(m: &MatchRow) -> Params<'_> {
  rusqlite::params_from_iter(vec![
    &m.id as &dyn rusqlite::ToSql,
    &m.uid,
    &m.home_team_id,
    &m.home_club_id,
    &m.away_team_id,
    &m.away_club_id,
    &m.league_id,
    &m.season_id,
    &m.matchday,
    &m.score_home,
    &m.score_away,
    &m.status,
    &m.updated_at,
  ])
}

fn standing_params(s: &StandingRow) -> Params<'_> {
  rusqlite::params_from_iter(vec![
    &s.id as &dyn rusqlite::ToSql,
    &s.uid,
    &s.team_id,
    &s.club_id,
    &s.league_id,
    &s.season_id,
    &s.played,
    &s.wins,
    &s.draws,
    &s.losses,
    &s.goals_for,
    &s.goals_against,
    &s.goal_diff,
    &s.points,
    &s.rank,
    &s.auto_calculated,
    &s.calculation_source,
    &s.last_updated,
  ])
}

// ─── LeagueStore impl ────────────────────────────────────────────────────────

impl LeagueStore for SqliteStore {
  type Error = Error;

  // ── Creation ──────────────────────────────────────────────────────────────

  async fn create_league(&self, input: NewLeague) -> Result<League> {
    let (slug, name) = (input.slug.clone(), input.name.clone());
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO leagues (slug, name) VALUES (?1, ?2)",
          rusqlite::params![slug, name],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(League { id, slug: input.slug, name: input.name })
  }

  async fn create_season(&self, input: NewSeason) -> Result<Season> {
    let NewSeason { slug, league_id, name, mut roster } = input;
    roster.sort_unstable();
    roster.dedup();

    let (slug_c, name_c, roster_c) = (slug.clone(), name.clone(), roster.clone());
    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let league_exists = tx
          .query_row(
            "SELECT 1 FROM leagues WHERE id = ?1",
            rusqlite::params![league_id],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !league_exists {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO seasons (slug, league_id, name) VALUES (?1, ?2, ?3)",
          rusqlite::params![slug_c, league_id, name_c],
        )?;
        let id = tx.last_insert_rowid();
        for participant_id in &roster_c {
          tx.execute(
            "INSERT INTO season_participants (season_id, participant_id) VALUES (?1, ?2)",
            rusqlite::params![id, participant_id],
          )?;
        }
        tx.commit()?;
        Ok(Some(id))
      })
      .await?
      .ok_or(Error::LeagueNotFound(league_id))?;

    Ok(Season { id, slug, league_id, name, roster })
  }

  async fn create_participant(&self, input: NewParticipant) -> Result<Participant> {
    let NewParticipant { slug, name, legacy_team_id } = input;
    let (slug_c, name_c) = (slug.clone(), name.clone());
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO participants (slug, name, legacy_team_id) VALUES (?1, ?2, ?3)",
          rusqlite::params![slug_c, name_c, legacy_team_id],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(Participant { id, slug, name, legacy_team_id })
  }

  async fn create_match(&self, input: NewMatch) -> Result<Match> {
    let mut m = Match {
      id:         0,
      uid:        input.uid,
      home:       input.home,
      away:       input.away,
      league_id:  input.league_id,
      season_id:  input.season_id,
      matchday:   input.matchday,
      score_home: input.score_home,
      score_away: input.score_away,
      status:     input.status,
      updated_at: stored_precision(Utc::now()),
    };
    let row = MatchRow::from_match(&m);
    m.id = self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO matches ({MATCH_COLUMNS})
             VALUES (NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
          ),
          match_params(&row),
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(m)
  }

  async fn create_standing(&self, input: NewStanding) -> Result<Standing> {
    let mut s = materialize_standing(input);
    let row = StandingRow::from_standing(&s);
    s.id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        execute_op(&tx, EncodedOp::InsertStanding(row))?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
      })
      .await?;
    Ok(s)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn list_leagues(&self) -> Result<Vec<League>> {
    let leagues = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT id, slug, name FROM leagues ORDER BY id")?;
        let rows = stmt
          .query_map([], |row| {
            Ok(League { id: row.get(0)?, slug: row.get(1)?, name: row.get(2)? })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(leagues)
  }

  async fn list_seasons(&self, league_id: Option<i64>) -> Result<Vec<Season>> {
    self.load_seasons(league_id, None).await
  }

  async fn get_season(&self, id: i64) -> Result<Option<Season>> {
    Ok(self.load_seasons(None, Some(id)).await?.into_iter().next())
  }

  async fn list_participants(&self) -> Result<Vec<Participant>> {
    let participants = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, slug, name, legacy_team_id FROM participants ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(Participant {
              id:             row.get(0)?,
              slug:           row.get(1)?,
              name:           row.get(2)?,
              legacy_team_id: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(participants)
  }

  async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<Match>> {
    let league_id = query.league_id;
    let season_id = query.season_id;
    let status = query.status.map(|s| s.to_string());
    let updated_after = query.updated_after.map(encode_dt);

    let rows: Vec<MatchRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MATCH_COLUMNS} FROM matches
           WHERE (?1 IS NULL OR league_id = ?1)
             AND (?2 IS NULL OR season_id = ?2)
             AND (?3 IS NULL OR status = ?3)
             AND (?4 IS NULL OR updated_at > ?4)
           ORDER BY id"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![league_id, season_id, status, updated_after],
            MatchRow::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(MatchRow::into_match).collect()
  }

  async fn get_match(&self, id: i64) -> Result<Option<Match>> {
    let row: Option<MatchRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
              rusqlite::params![id],
              MatchRow::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    row.map(MatchRow::into_match).transpose()
  }

  async fn find_standings(&self, query: &StandingQuery) -> Result<Vec<Standing>> {
    let league_id = query.league_id;
    let season_id = query.season_id;
    let updated_after = query.updated_after.map(encode_dt);

    let rows: Vec<StandingRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {STANDING_COLUMNS} FROM standings
           WHERE (?1 IS NULL OR league_id = ?1)
             AND (?2 IS NULL OR season_id = ?2)
             AND (?3 IS NULL OR last_updated > ?3)
           ORDER BY id"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![league_id, season_id, updated_after],
            StandingRow::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(StandingRow::into_standing).collect()
  }

  async fn get_standing(&self, id: i64) -> Result<Option<Standing>> {
    let row: Option<StandingRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {STANDING_COLUMNS} FROM standings WHERE id = ?1"),
              rusqlite::params![id],
              StandingRow::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    row.map(StandingRow::into_standing).transpose()
  }

  async fn count(&self, collection: Collection) -> Result<u64> {
    let table = table_name(collection);
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
      })
      .await?;
    Ok(n.max(0) as u64)
  }

  // ── Transactional writes ──────────────────────────────────────────────────

  async fn apply(&self, ops: Vec<WriteOp>) -> Result<usize> {
    if ops.is_empty() {
      return Ok(0);
    }
    let encoded = ops
      .into_iter()
      .map(EncodedOp::encode)
      .collect::<Result<Vec<_>>>()?;

    let affected = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut affected = 0;
        for op in encoded {
          affected += execute_op(&tx, op)?;
        }
        tx.commit()?;
        Ok(affected)
      })
      .await?;
    Ok(affected)
  }

  // ── Migration bookkeeping ─────────────────────────────────────────────────

  async fn save_migration_record(&self, record: &MigrationRecord) -> Result<()> {
    let r = MigrationRow::from_record(record);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO migration_records ({MIGRATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               kind = excluded.kind, status = excluded.status,
               started_at = excluded.started_at, finished_at = excluded.finished_at,
               backup_id = excluded.backup_id, processed = excluded.processed,
               migrated = excluded.migrated, skipped = excluded.skipped,
               errors = excluded.errors, message = excluded.message"
          ),
          rusqlite::params![
            r.id,
            r.kind,
            r.status,
            r.started_at,
            r.finished_at,
            r.backup_id,
            r.processed,
            r.migrated,
            r.skipped,
            r.errors,
            r.message,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_migration_record(&self, id: Uuid) -> Result<Option<MigrationRecord>> {
    let id_str = encode_uuid(id);
    let row: Option<MigrationRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {MIGRATION_COLUMNS} FROM migration_records WHERE id = ?1"),
              rusqlite::params![id_str],
              MigrationRow::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    row.map(MigrationRow::into_record).transpose()
  }

  async fn list_migration_records(&self, limit: usize) -> Result<Vec<MigrationRecord>> {
    let limit = limit as i64;
    let rows: Vec<MigrationRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MIGRATION_COLUMNS} FROM migration_records
           ORDER BY started_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit], MigrationRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    rows.into_iter().map(MigrationRow::into_record).collect()
  }

  async fn acquire_migration_lock(&self, owner: Uuid) -> Result<bool> {
    let owner_str = encode_uuid(owner);
    let at_str = encode_dt(Utc::now());
    let acquired = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT OR IGNORE INTO migration_lock (singleton, owner, acquired_at)
           VALUES (1, ?1, ?2)",
          rusqlite::params![owner_str, at_str],
        )?;
        if inserted == 1 {
          return Ok(true);
        }
        let holder: Option<String> = conn
          .query_row("SELECT owner FROM migration_lock WHERE singleton = 1", [], |r| {
            r.get(0)
          })
          .optional()?;
        Ok(holder.as_deref() == Some(owner_str.as_str()))
      })
      .await?;
    Ok(acquired)
  }

  async fn release_migration_lock(&self, owner: Uuid) -> Result<bool> {
    let owner_str = encode_uuid(owner);
    let released = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM migration_lock WHERE owner = ?1",
          rusqlite::params![owner_str],
        )?)
      })
      .await?;
    Ok(released > 0)
  }

  async fn migration_lock(&self) -> Result<Option<LockInfo>> {
    let raw: Option<(String, String)> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT owner, acquired_at FROM migration_lock WHERE singleton = 1",
              [],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(owner, at)| {
        Ok(LockInfo { owner: decode_uuid(&owner)?, acquired_at: decode_dt(&at)? })
      })
      .transpose()
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
    let actor = query.actor.clone();
    let migration_id = query.migration_id.map(encode_uuid);
    let entity = query.entity.map(|c| c.to_string());
    let limit = query.limit.unwrap_or(100) as i64;

    let rows: Vec<AuditRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {AUDIT_COLUMNS} FROM audit_log
           WHERE (?1 IS NULL OR actor = ?1)
             AND (?2 IS NULL OR migration_id = ?2)
             AND (?3 IS NULL OR entity = ?3)
           ORDER BY seq DESC LIMIT ?4"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![actor, migration_id, entity, limit],
            AuditRow::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(AuditRow::into_entry).collect()
  }
}

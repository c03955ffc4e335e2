//! SQL schema for the Ladder SQLite store.
//!
//! Executed once at connection startup. Future schema changes will be gated
//! on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Matches and standings carry no foreign keys and no uniqueness on their
/// (participant, league, season) key: orphaned and duplicated rows must be
/// representable for the validator to report them.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS leagues (
    id    INTEGER PRIMARY KEY,
    slug  TEXT NOT NULL UNIQUE,
    name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS seasons (
    id         INTEGER PRIMARY KEY,
    slug       TEXT NOT NULL UNIQUE,
    league_id  INTEGER NOT NULL,
    name       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    id              INTEGER PRIMARY KEY,
    slug            TEXT NOT NULL UNIQUE,
    name            TEXT NOT NULL,
    legacy_team_id  INTEGER             -- id under the legacy team scheme
);

-- Which participants play in which season.
CREATE TABLE IF NOT EXISTS season_participants (
    season_id       INTEGER NOT NULL,
    participant_id  INTEGER NOT NULL,
    PRIMARY KEY (season_id, participant_id)
);

CREATE TABLE IF NOT EXISTS matches (
    id            INTEGER PRIMARY KEY,
    uid           TEXT NOT NULL UNIQUE,
    home_team_id  INTEGER,
    home_club_id  INTEGER,
    away_team_id  INTEGER,
    away_club_id  INTEGER,
    league_id     INTEGER NOT NULL,
    season_id     INTEGER NOT NULL,
    matchday      INTEGER NOT NULL,
    score_home    INTEGER,
    score_away    INTEGER,
    status        TEXT NOT NULL,    -- 'scheduled' | 'live' | 'finished' | 'cancelled'
    updated_at    TEXT NOT NULL     -- RFC 3339 UTC, fixed precision
);

CREATE TABLE IF NOT EXISTS standings (
    id                  INTEGER PRIMARY KEY,
    uid                 TEXT NOT NULL UNIQUE,
    team_id             INTEGER,
    club_id             INTEGER,
    league_id           INTEGER NOT NULL,
    season_id           INTEGER NOT NULL,
    played              INTEGER NOT NULL DEFAULT 0,
    wins                INTEGER NOT NULL DEFAULT 0,
    draws               INTEGER NOT NULL DEFAULT 0,
    losses              INTEGER NOT NULL DEFAULT 0,
    goals_for           INTEGER NOT NULL DEFAULT 0,
    goals_against       INTEGER NOT NULL DEFAULT 0,
    goal_diff           INTEGER NOT NULL DEFAULT 0,
    points              INTEGER NOT NULL DEFAULT 0,
    rank                INTEGER NOT NULL DEFAULT 0,
    auto_calculated     INTEGER NOT NULL DEFAULT 1,
    calculation_source  TEXT NOT NULL DEFAULT 'auto',
    last_updated        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS migration_records (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    status       TEXT NOT NULL,    -- 'pending' | 'committed' | 'failed' | 'rolledback'
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    backup_id    TEXT,
    processed    INTEGER NOT NULL DEFAULT 0,
    migrated     INTEGER NOT NULL DEFAULT 0,
    skipped      INTEGER NOT NULL DEFAULT 0,
    errors       INTEGER NOT NULL DEFAULT 0,
    message      TEXT
);

-- At most one row: the holder of the migration lock.
CREATE TABLE IF NOT EXISTS migration_lock (
    singleton    INTEGER PRIMARY KEY CHECK (singleton = 1),
    owner        TEXT NOT NULL,
    acquired_at  TEXT NOT NULL
);

-- Strictly append-only.
CREATE TABLE IF NOT EXISTS audit_log (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    at            TEXT NOT NULL,
    actor         TEXT NOT NULL,
    action        TEXT NOT NULL,
    entity        TEXT,
    record_id     INTEGER,
    migration_id  TEXT,
    before_json   TEXT,
    after_json    TEXT,
    message       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS matches_pair_idx    ON matches(league_id, season_id);
CREATE INDEX IF NOT EXISTS standings_pair_idx  ON standings(league_id, season_id);
CREATE INDEX IF NOT EXISTS audit_migration_idx ON audit_log(migration_id);

PRAGMA user_version = 1;
";

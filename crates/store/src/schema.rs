/// All DDL for the commitstreak SQLite schema.
/// Run in order; all statements are idempotent (IF NOT EXISTS).
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS credentials (
    user_id      TEXT PRIMARY KEY,
    access_token TEXT NOT NULL,
    updated_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS streak_snapshots (
    user_id          TEXT PRIMARY KEY,
    current_streak   INTEGER NOT NULL DEFAULT 0,
    longest_streak   INTEGER NOT NULL DEFAULT 0,
    last_commit_date TEXT,
    today_commits    INTEGER NOT NULL DEFAULT 0,
    weekly_commits   TEXT NOT NULL DEFAULT '[0,0,0,0,0,0,0]',
    total_commits    INTEGER NOT NULL DEFAULT 0,
    yearly_commits   INTEGER NOT NULL DEFAULT 0,
    updated_at       INTEGER NOT NULL
);

-- Append-only: rows are removed only by account deletion.
CREATE TABLE IF NOT EXISTS earned_badges (
    user_id   TEXT NOT NULL,
    badge_id  TEXT NOT NULL,
    earned_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, badge_id)
);
"#;

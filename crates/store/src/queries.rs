use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use commitstreak_types::{
    AggregateStore, BadgeLedger, Credential, CredentialStore, Result, StreakSnapshot,
};

use crate::SqliteStore;

// ── Helpers ───────────────────────────────────────────────────────────────

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Raw column values of one `streak_snapshots` row.
struct SnapshotRow {
    current_streak: u32,
    longest_streak: u32,
    last_commit_date: Option<NaiveDate>,
    today_commits: u32,
    weekly_commits: String,
    total_commits: i64,
    yearly_commits: i64,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<StreakSnapshot> {
        let weekly_commits: [u32; 7] = serde_json::from_str(&self.weekly_commits)?;
        Ok(StreakSnapshot {
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            last_commit_date: self.last_commit_date,
            today_commits: self.today_commits,
            weekly_commits,
            total_commits: from_sql_count(self.total_commits),
            yearly_commits: from_sql_count(self.yearly_commits),
        })
    }
}

// ── impl CredentialStore ──────────────────────────────────────────────────

impl CredentialStore for SqliteStore {
    fn get_credential(&self, user_id: &str) -> Result<Option<Credential>> {
        let conn = self.lock()?;
        let token: Option<String> = conn
            .query_row(
                "SELECT access_token FROM credentials WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.map(Credential::new))
    }

    fn set_credential(&self, user_id: &str, credential: &Credential) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO credentials (user_id, access_token, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                updated_at   = excluded.updated_at",
            params![user_id, credential.access_token, now_ts()],
        )?;
        Ok(())
    }

    fn delete_credential(&self, user_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM credentials WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}

// ── impl AggregateStore ───────────────────────────────────────────────────

impl AggregateStore for SqliteStore {
    fn get_snapshot(&self, user_id: &str) -> Result<StreakSnapshot> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT current_streak, longest_streak, last_commit_date, today_commits,
                        weekly_commits, total_commits, yearly_commits
                 FROM streak_snapshots WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SnapshotRow {
                        current_streak: row.get(0)?,
                        longest_streak: row.get(1)?,
                        last_commit_date: row.get(2)?,
                        today_commits: row.get(3)?,
                        weekly_commits: row.get(4)?,
                        total_commits: row.get(5)?,
                        yearly_commits: row.get(6)?,
                    })
                },
            )
            .optional()?;

        match row {
            Some(row) => row.into_snapshot(),
            None => Ok(StreakSnapshot::default()),
        }
    }

    fn set_snapshot(&self, user_id: &str, snapshot: &StreakSnapshot) -> Result<()> {
        let weekly_json = serde_json::to_string(&snapshot.weekly_commits)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO streak_snapshots
                (user_id, current_streak, longest_streak, last_commit_date, today_commits,
                 weekly_commits, total_commits, yearly_commits, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                snapshot.current_streak,
                snapshot.longest_streak,
                snapshot.last_commit_date,
                snapshot.today_commits,
                weekly_json,
                to_sql_count(snapshot.total_commits),
                to_sql_count(snapshot.yearly_commits),
                now_ts(),
            ],
        )?;
        debug!(user_id, longest = snapshot.longest_streak, "snapshot saved");
        Ok(())
    }

    fn get_badges(&self, user_id: &str) -> Result<BadgeLedger> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT badge_id FROM earned_badges WHERE user_id = ?1 ORDER BY badge_id",
        )?;
        let ids: rusqlite::Result<Vec<String>> = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect();
        Ok(ids?.into_iter().collect())
    }

    fn record_badges(&self, user_id: &str, badge_ids: &[String]) -> Result<()> {
        if badge_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let earned_at = now_ts();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO earned_badges (user_id, badge_id, earned_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for badge_id in badge_ids {
                stmt.execute(params![user_id, badge_id, earned_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM streak_snapshots WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.execute(
            "DELETE FROM earned_badges WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

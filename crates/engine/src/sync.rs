use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use commitstreak_collect::Collector;
use commitstreak_types::{
    AggregateStore, BadgeLedger, CommitHost, CoverageReport, Credential, CredentialStore,
    Identity, Lookback, NotificationSink, Result, StreakError, StreakSnapshot, SyncConfig,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::bucket::bucketize;
use crate::level::{level_for, LevelProgress};
use crate::milestone::{announcement, newly_earned};
use crate::streak::{self, merge_longest};

/// Result of one [`SyncEngine::sync`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub snapshot: StreakSnapshot,
    pub newly_earned_badges: Vec<String>,
    pub coverage: CoverageReport,
    /// Set when the snapshot or badges could not be saved. The snapshot above
    /// is still what this run computed.
    pub persist_error: Option<String>,
}

/// Orchestrates collect, bucket, compute, evaluate and persist for one user
/// at a time. Collaborators are injected so the whole pipeline runs against
/// stubs in tests.
pub struct SyncEngine {
    host: Arc<dyn CommitHost>,
    credentials: Arc<dyn CredentialStore>,
    aggregates: Arc<dyn AggregateStore>,
    notifier: Arc<dyn NotificationSink>,
    config: SyncConfig,
    offset: FixedOffset,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        host: Arc<dyn CommitHost>,
        credentials: Arc<dyn CredentialStore>,
        aggregates: Arc<dyn AggregateStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            host,
            credentials,
            aggregates,
            notifier,
            config: SyncConfig::default(),
            offset: Utc.fix(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Local offset used to assign commits to calendar days.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(Utc::now())
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    fn local_midnight(&self, day: NaiveDate) -> DateTime<Utc> {
        let naive = day.and_time(NaiveTime::MIN);
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc())
    }

    // ── Credentials ─────────────────────────────────────────────────────────

    /// Verifies `credential` against the host, then stores it for `user_id`.
    pub fn login(&self, user_id: &str, credential: &Credential) -> Result<Identity> {
        let identity = self.host.get_identity(credential)?;
        self.credentials.set_credential(user_id, credential)?;
        info!(user_id, login = %identity.login, "credential stored");
        Ok(identity)
    }

    pub fn logout(&self, user_id: &str) -> Result<()> {
        self.credentials.delete_credential(user_id)
    }

    // ── Sync ────────────────────────────────────────────────────────────────

    pub fn sync(&self, user_id: &str) -> Result<SyncReport> {
        self.sync_at(user_id, Utc::now())
    }

    /// Full recompute as of `now`.
    ///
    /// Fails on a missing or rejected credential, when prior state cannot be
    /// loaded, when every repository failed, or while another sync for the
    /// same user is running. Persisted state is untouched in all of those
    /// cases.
    pub fn sync_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<SyncReport> {
        let _guard = InFlight::acquire(&self.in_flight, user_id)?;

        let credential = self.credentials.get_credential(user_id)?.ok_or_else(|| {
            StreakError::Unauthenticated(format!("no credential stored for user '{user_id}'"))
        })?;

        // Monotonic fields cannot be honoured without the prior state.
        let previous = self.aggregates.get_snapshot(user_id)?;
        let ledger = self.aggregates.get_badges(user_id)?;

        let today = self.local_date(now);
        let window_start = self.config.lookback.window_start(today);
        let since = self.local_midnight(window_start);

        let collector = Collector::new(self.host.as_ref(), &self.config);
        let collection = collector.collect(&credential, since)?;
        let totals = collector.aggregate_totals(&credential, &collection.identity, today);

        let buckets = bucketize(&collection.events, &self.offset);
        let stats = streak::compute(&buckets, today, window_start);

        let covers_year = window_start <= Lookback::YearToDate.window_start(today);
        let snapshot = StreakSnapshot {
            current_streak: stats.current_streak,
            longest_streak: merge_longest(previous.longest_streak, stats.longest_streak),
            last_commit_date: stats.last_commit_date.max(previous.last_commit_date),
            today_commits: stats.today_commits,
            weekly_commits: stats.weekly_commits,
            total_commits: totals.all_time.unwrap_or(previous.total_commits),
            yearly_commits: if covers_year {
                stats.yearly_commits
            } else {
                totals.current_year.unwrap_or(previous.yearly_commits)
            },
        };

        let earned = newly_earned(&ledger, snapshot.longest_streak);
        let newly_earned_badges: Vec<String> = earned.iter().map(|b| b.id.to_string()).collect();

        let persist_error = self.persist(user_id, &snapshot, &newly_earned_badges);

        if let Some(note) = announcement(&earned) {
            if let Err(e) = self.notifier.notify(&note.title, &note.body) {
                warn!(user_id, error = %e, "badge notification failed");
            }
        }

        info!(
            user_id,
            current = snapshot.current_streak,
            longest = snapshot.longest_streak,
            new_badges = newly_earned_badges.len(),
            failed_repos = collection.coverage.failed(),
            "sync complete"
        );

        Ok(SyncReport {
            snapshot,
            newly_earned_badges,
            coverage: collection.coverage,
            persist_error,
        })
    }

    fn persist(
        &self,
        user_id: &str,
        snapshot: &StreakSnapshot,
        badges: &[String],
    ) -> Option<String> {
        let mut errors = Vec::new();
        if let Err(e) = self.aggregates.set_snapshot(user_id, snapshot) {
            warn!(user_id, error = %e, "failed to save snapshot");
            errors.push(e.to_string());
        }
        if let Err(e) = self.aggregates.record_badges(user_id, badges) {
            warn!(user_id, error = %e, "failed to record badges");
            errors.push(e.to_string());
        }
        (!errors.is_empty()).then(|| errors.join("; "))
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Last persisted snapshot; may be stale while a sync is running.
    pub fn snapshot(&self, user_id: &str) -> Result<StreakSnapshot> {
        self.aggregates.get_snapshot(user_id)
    }

    pub fn badges(&self, user_id: &str) -> Result<BadgeLedger> {
        self.aggregates.get_badges(user_id)
    }

    pub fn level(&self, user_id: &str) -> Result<LevelProgress> {
        Ok(level_for(self.aggregates.get_snapshot(user_id)?.total_commits))
    }

    /// Removes the credential and every aggregate stored for `user_id`.
    pub fn delete_account(&self, user_id: &str) -> Result<()> {
        let _guard = InFlight::acquire(&self.in_flight, user_id)?;
        self.credentials.delete_credential(user_id)?;
        self.aggregates.delete_user(user_id)?;
        info!(user_id, "account deleted");
        Ok(())
    }
}

/// Marks a user as syncing until dropped.
struct InFlight<'a> {
    users: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(users: &'a Mutex<HashSet<String>>, user_id: &str) -> Result<Self> {
        let mut set = users.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(user_id.to_string()) {
            warn!(user_id, "sync already in progress");
            return Err(StreakError::SyncInProgress(user_id.to_string()));
        }
        Ok(Self {
            users,
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.user_id);
    }
}

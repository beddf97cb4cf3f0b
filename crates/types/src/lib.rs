use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────

/// Failure reported by a [`CommitHost`]. Only `Unauthorized` is fatal for a
/// sync; everything else degrades coverage for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("credential rejected by host")]
    Unauthorized,
    #[error("rate limit exhausted")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl HostError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, HostError::Unauthorized)
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum StreakError {
    #[cfg(feature = "rusqlite-errors")]
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("all {attempted} repositories failed to fetch")]
    AllRepositoriesFailed { attempted: usize },
    #[error("a sync is already running for user '{0}'")]
    SyncInProgress(String),
    #[error("host error: {0}")]
    Host(HostError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("notification error: {0}")]
    Notify(String),
}

impl From<HostError> for StreakError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Unauthorized => {
                StreakError::Unauthenticated("credential rejected by host".into())
            }
            other => StreakError::Host(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreakError>;

// ── Host-side types ───────────────────────────────────────────────────────

/// Opaque access credential produced by the OAuth handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// The account the credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    pub id: u64,
    pub login: String,
    /// Verified account email, when the host exposes one.
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteRepo {
    pub id: u64,
    pub full_name: String,
    pub fork: bool,
}

/// A commit as listed by the host, before authorship filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommit {
    pub sha: String,
    /// Host account linked to the commit author, if any.
    pub author_id: Option<u64>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Raw ISO-8601 instant exactly as reported by the host.
    pub authored_at: String,
}

/// Opaque continuation token for paginated listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    pub commits: Vec<RemoteCommit>,
    pub next: Option<PageCursor>,
}

/// Inclusive author-date range for aggregate counts. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all_time() -> Self {
        Self::default()
    }

    pub fn year_of(day: NaiveDate) -> Self {
        Self {
            from: NaiveDate::from_ymd_opt(day.year(), 1, 1),
            to: Some(day),
        }
    }
}

// ── Engine-side types ─────────────────────────────────────────────────────

/// One commit attributed to the tracked identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub sha: String,
    pub repository: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-user aggregate persisted after every successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreakSnapshot {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_commit_date: Option<NaiveDate>,
    pub today_commits: u32,
    /// Monday-first counts for the last seven local days.
    pub weekly_commits: [u32; 7],
    /// All-time count from the aggregate search query (display only).
    pub total_commits: u64,
    /// Year-to-date count from the day buckets.
    pub yearly_commits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakStatus {
    /// No commit has ever been observed.
    Empty,
    /// At least one commit today.
    Active,
    /// Streak alive through yesterday, nothing yet today.
    AtRisk,
    Broken,
}

impl StreakSnapshot {
    pub fn is_empty(&self) -> bool {
        self.last_commit_date.is_none() && self.total_commits == 0 && self.yearly_commits == 0
    }

    pub fn has_committed_today(&self, today: NaiveDate) -> bool {
        self.last_commit_date == Some(today)
    }

    /// The stored streak as seen on `today`, which may be later than the
    /// day the snapshot was computed.
    pub fn effective_current_streak(&self, today: NaiveDate) -> u32 {
        match self.last_commit_date {
            Some(last) if today - last <= Duration::days(1) => self.current_streak,
            _ => 0,
        }
    }

    pub fn status(&self, today: NaiveDate) -> StreakStatus {
        if self.is_empty() {
            return StreakStatus::Empty;
        }
        if self.has_committed_today(today) {
            return StreakStatus::Active;
        }
        if self.effective_current_streak(today) > 0 {
            StreakStatus::AtRisk
        } else {
            StreakStatus::Broken
        }
    }
}

/// Badge ids a user has earned. There is deliberately no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BadgeLedger {
    earned: BTreeSet<String>,
}

impl BadgeLedger {
    pub fn contains(&self, badge_id: &str) -> bool {
        self.earned.contains(badge_id)
    }

    /// Adds ids, returning the ones that were not already present.
    pub fn extend<I, S>(&mut self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .map(|id| -> String { id.into() })
            .filter(|id| self.earned.insert(id.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.earned.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.earned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.earned.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for BadgeLedger {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut ledger = BadgeLedger::default();
        ledger.extend(iter);
        ledger
    }
}

// ── Coverage reporting ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepoStatus {
    Complete,
    /// Stopped early (page ceiling or deadline); commits seen so far are kept.
    Truncated { reason: String },
    /// Nothing from this repository is used in this run.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RepoOutcome {
    pub repository: String,
    pub status: RepoStatus,
    pub pages: usize,
    pub commits_seen: usize,
    pub commits_matched: usize,
}

impl RepoOutcome {
    pub fn failed(repository: &str, reason: impl Into<String>) -> Self {
        Self {
            repository: repository.to_string(),
            status: RepoStatus::Failed {
                reason: reason.into(),
            },
            pages: 0,
            commits_seen: 0,
            commits_matched: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RepoStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoverageReport {
    pub repositories: Vec<RepoOutcome>,
    /// Matching commits dropped because their timestamp could not be parsed.
    pub commits_skipped: usize,
    /// Commits seen in more than one repository (forks), counted once.
    pub duplicates: usize,
}

impl CoverageReport {
    pub fn attempted(&self) -> usize {
        self.repositories.len()
    }

    pub fn failed(&self) -> usize {
        self.repositories.iter().filter(|r| r.is_failed()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted() - self.failed()
    }

    /// True only when there was something to fetch and none of it worked.
    pub fn all_failed(&self) -> bool {
        self.attempted() > 0 && self.succeeded() == 0
    }
}

// ── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// January 1 of the current local year through today.
    YearToDate,
    /// The last `n` local days including today, never starting before 1970.
    RollingDays(u32),
}

impl Lookback {
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        match *self {
            Lookback::YearToDate => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
            Lookback::RollingDays(n) => {
                let floor = DateTime::UNIX_EPOCH.date_naive();
                today
                    .checked_sub_signed(Duration::days(i64::from(n.max(1)) - 1))
                    .map_or(floor, |start| start.max(floor))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub lookback: Lookback,
    pub include_forks: bool,
    pub per_page: u32,
    pub max_pages_per_repo: usize,
    /// Wall-clock budget for one collection run.
    pub deadline: std::time::Duration,
    /// Concurrent repository fetches; 1 fetches sequentially.
    pub parallelism: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback: Lookback::YearToDate,
            include_forks: true,
            per_page: 100,
            max_pages_per_repo: 50,
            deadline: std::time::Duration::from_secs(120),
            parallelism: 4,
        }
    }
}

// ── Core traits ───────────────────────────────────────────────────────────

/// Remote version-control host.
pub trait CommitHost: Send + Sync {
    fn get_identity(&self, credential: &Credential) -> HostResult<Identity>;

    /// Every repository the credential can see, pagination already followed.
    fn list_repositories(
        &self,
        credential: &Credential,
        include_forks: bool,
    ) -> HostResult<Vec<RemoteRepo>>;

    fn list_commits(
        &self,
        credential: &Credential,
        repo: &RemoteRepo,
        since: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        per_page: u32,
    ) -> HostResult<CommitPage>;

    fn aggregate_commit_count(
        &self,
        credential: &Credential,
        author: &str,
        range: &DateRange,
    ) -> HostResult<u64>;

    /// Domain of the host's generated no-reply author addresses.
    fn noreply_domain(&self) -> &str {
        "users.noreply.github.com"
    }
}

pub trait CredentialStore: Send + Sync {
    fn get_credential(&self, user_id: &str) -> Result<Option<Credential>>;
    fn set_credential(&self, user_id: &str, credential: &Credential) -> Result<()>;
    fn delete_credential(&self, user_id: &str) -> Result<()>;
}

pub trait AggregateStore: Send + Sync {
    /// Returns the default (empty) snapshot for unknown users.
    fn get_snapshot(&self, user_id: &str) -> Result<StreakSnapshot>;
    fn set_snapshot(&self, user_id: &str, snapshot: &StreakSnapshot) -> Result<()>;
    fn get_badges(&self, user_id: &str) -> Result<BadgeLedger>;
    /// Appends to the ledger; ids already present are ignored.
    fn record_badges(&self, user_id: &str, badge_ids: &[String]) -> Result<()>;
    /// Account deletion: drops snapshot and badges.
    fn delete_user(&self, user_id: &str) -> Result<()>;
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<()>;
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_unauthorized_maps_to_unauthenticated() {
        let err: StreakError = HostError::Unauthorized.into();
        assert!(matches!(err, StreakError::Unauthenticated(_)));

        let err: StreakError = HostError::RateLimited.into();
        assert!(matches!(err, StreakError::Host(HostError::RateLimited)));
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let cred = Credential::new("ghp_secret");
        let shown = format!("{cred:?}");
        assert!(!shown.contains("ghp_secret"));
    }

    #[test]
    fn test_badge_ledger_extend_reports_only_new() {
        let mut ledger: BadgeLedger = ["first-commit"].into_iter().collect();
        let added = ledger.extend(["first-commit", "week-streak"]);
        assert_eq!(added, vec!["week-streak".to_string()]);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("first-commit"));
    }

    #[test]
    fn test_snapshot_status() {
        let today = day(2024, 6, 4);

        let empty = StreakSnapshot::default();
        assert_eq!(empty.status(today), StreakStatus::Empty);

        let active = StreakSnapshot {
            current_streak: 3,
            last_commit_date: Some(today),
            yearly_commits: 5,
            ..Default::default()
        };
        assert_eq!(active.status(today), StreakStatus::Active);

        let at_risk = StreakSnapshot {
            current_streak: 2,
            last_commit_date: Some(day(2024, 6, 3)),
            yearly_commits: 2,
            ..Default::default()
        };
        assert_eq!(at_risk.status(today), StreakStatus::AtRisk);

        let broken = StreakSnapshot {
            current_streak: 4,
            last_commit_date: Some(day(2024, 6, 1)),
            yearly_commits: 9,
            ..Default::default()
        };
        assert_eq!(broken.status(today), StreakStatus::Broken);
        assert_eq!(broken.effective_current_streak(today), 0);
    }

    #[test]
    fn test_lookback_window_start() {
        let today = day(2024, 6, 4);
        assert_eq!(Lookback::YearToDate.window_start(today), day(2024, 1, 1));
        assert_eq!(Lookback::RollingDays(30).window_start(today), day(2024, 5, 6));
        assert_eq!(Lookback::RollingDays(1).window_start(today), today);
    }

    #[test]
    fn test_huge_rolling_window_clamps_to_epoch() {
        let today = day(2024, 6, 4);
        assert_eq!(Lookback::RollingDays(200_000_000).window_start(today), day(1970, 1, 1));
        assert_eq!(Lookback::RollingDays(u32::MAX).window_start(today), day(1970, 1, 1));
        assert_eq!(Lookback::RollingDays(0).window_start(today), today);
    }

    #[test]
    fn test_coverage_all_failed() {
        let mut report = CoverageReport::default();
        assert!(!report.all_failed(), "nothing attempted is not a failure");

        report.repositories.push(RepoOutcome::failed("a/one", "boom"));
        assert!(report.all_failed());

        report.repositories.push(RepoOutcome {
            repository: "a/two".into(),
            status: RepoStatus::Complete,
            pages: 1,
            commits_seen: 3,
            commits_matched: 2,
        });
        assert!(!report.all_failed());
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = StreakSnapshot {
            current_streak: 2,
            longest_streak: 9,
            last_commit_date: Some(day(2024, 3, 1)),
            weekly_commits: [1, 0, 0, 2, 0, 0, 4],
            ..Default::default()
        };
        let json = serde_json::to_string(&snap).expect("serialize");
        assert!(json.contains("\"last_commit_date\":\"2024-03-01\""));
        let back: StreakSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, snap);
    }
}

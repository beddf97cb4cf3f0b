use chrono::{DateTime, NaiveDate, Utc};
use commitstreak_types::{
    CommitEvent, CommitHost, CoverageReport, Credential, DateRange, Identity, PageCursor,
    RemoteCommit, RemoteRepo, RepoOutcome, RepoStatus, Result, StreakError, SyncConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::authorship::match_author;

/// Commits attributed to the tracked identity, plus what was (not) covered.
#[derive(Debug, Clone)]
pub struct Collection {
    pub identity: Identity,
    pub events: Vec<CommitEvent>,
    pub coverage: CoverageReport,
}

/// Counts from the host's aggregate search. `None` when the query failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CommitTotals {
    pub all_time: Option<u64>,
    pub current_year: Option<u64>,
}

/// Shared, read-only state of one collection run.
struct Run<'a> {
    identity: &'a Identity,
    credential: &'a Credential,
    since: DateTime<Utc>,
    deadline: Instant,
    /// Set once the host rejects the credential; other workers stop early.
    abort: AtomicBool,
}

struct RepoFetch {
    outcome: RepoOutcome,
    events: Vec<CommitEvent>,
    skipped: usize,
}

impl RepoFetch {
    fn new(repo: &RemoteRepo) -> Self {
        Self {
            outcome: RepoOutcome {
                repository: repo.full_name.clone(),
                status: RepoStatus::Complete,
                pages: 0,
                commits_seen: 0,
                commits_matched: 0,
            },
            events: Vec::new(),
            skipped: 0,
        }
    }

    fn failed(repo: &RemoteRepo, reason: impl Into<String>) -> Self {
        Self {
            outcome: RepoOutcome::failed(&repo.full_name, reason),
            events: Vec::new(),
            skipped: 0,
        }
    }

    /// Ends the fetch early, keeping whatever complete pages were read.
    fn stop(mut self, repo: &RemoteRepo, reason: &str) -> Self {
        if self.outcome.pages == 0 {
            return Self::failed(repo, reason);
        }
        self.outcome.status = RepoStatus::Truncated {
            reason: reason.to_string(),
        };
        self
    }
}

pub struct Collector<'a> {
    host: &'a dyn CommitHost,
    config: &'a SyncConfig,
}

impl<'a> Collector<'a> {
    pub fn new(host: &'a dyn CommitHost, config: &'a SyncConfig) -> Self {
        Self { host, config }
    }

    /// Collects every commit authored by the credential's identity at or
    /// after `since`, across all visible repositories.
    ///
    /// Per-repository failures only reduce coverage. Errors are returned for
    /// a rejected credential, a failed repository listing, or when every
    /// repository failed.
    pub fn collect(&self, credential: &Credential, since: DateTime<Utc>) -> Result<Collection> {
        let identity = self.host.get_identity(credential)?;
        let repos = self
            .host
            .list_repositories(credential, self.config.include_forks)?;

        info!(
            login = %identity.login,
            repos = repos.len(),
            since = %since,
            "collecting commits"
        );

        let (fetches, aborted) = {
            let run = Run {
                identity: &identity,
                credential,
                since,
                deadline: Instant::now() + self.config.deadline,
                abort: AtomicBool::new(false),
            };
            let fetches = self.fetch_all(&run, &repos);
            (fetches, run.abort.into_inner())
        };

        if aborted {
            return Err(StreakError::Unauthenticated(
                "credential rejected while listing commits".into(),
            ));
        }

        let mut coverage = CoverageReport::default();
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for fetch in fetches {
            coverage.commits_skipped += fetch.skipped;
            for event in fetch.events {
                if seen.insert(event.sha.clone()) {
                    events.push(event);
                } else {
                    coverage.duplicates += 1;
                }
            }
            coverage.repositories.push(fetch.outcome);
        }

        if coverage.all_failed() {
            warn!(attempted = coverage.attempted(), "every repository failed");
            return Err(StreakError::AllRepositoriesFailed {
                attempted: coverage.attempted(),
            });
        }
        if coverage.failed() > 0 {
            warn!(
                failed = coverage.failed(),
                attempted = coverage.attempted(),
                "partial coverage"
            );
        }

        info!(
            events = events.len(),
            duplicates = coverage.duplicates,
            skipped = coverage.commits_skipped,
            "collection finished"
        );

        Ok(Collection {
            identity,
            events,
            coverage,
        })
    }

    /// All-time and current-year counts from the cheap aggregate query.
    /// Independent of [`Collector::collect`] and allowed to disagree with it.
    pub fn aggregate_totals(
        &self,
        credential: &Credential,
        identity: &Identity,
        today: NaiveDate,
    ) -> CommitTotals {
        CommitTotals {
            all_time: self.count(credential, identity, &DateRange::all_time()),
            current_year: self.count(credential, identity, &DateRange::year_of(today)),
        }
    }

    fn count(
        &self,
        credential: &Credential,
        identity: &Identity,
        range: &DateRange,
    ) -> Option<u64> {
        match self
            .host
            .aggregate_commit_count(credential, &identity.login, range)
        {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(login = %identity.login, error = %e, "aggregate commit count failed");
                None
            }
        }
    }

    fn fetch_all(&self, run: &Run<'_>, repos: &[RemoteRepo]) -> Vec<RepoFetch> {
        let workers = self.config.parallelism.clamp(1, repos.len().max(1));
        if workers == 1 {
            return repos.iter().map(|r| self.fetch_repo(run, r)).collect();
        }

        let next = AtomicUsize::new(0);
        let next = &next;
        let mut results: Vec<Option<RepoFetch>> = repos.iter().map(|_| None).collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(repo) = repos.get(i) else { break };
                            done.push((i, self.fetch_repo(run, repo)));
                        }
                        done
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, fetch) in done {
                            results[i] = Some(fetch);
                        }
                    }
                    Err(_) => warn!("repository worker panicked"),
                }
            }
        });

        results
            .into_iter()
            .zip(repos)
            .map(|(fetch, repo)| {
                fetch.unwrap_or_else(|| RepoFetch::failed(repo, "worker panicked"))
            })
            .collect()
    }

    fn fetch_repo(&self, run: &Run<'_>, repo: &RemoteRepo) -> RepoFetch {
        let max_pages = self.config.max_pages_per_repo.max(1);
        let mut fetch = RepoFetch::new(repo);
        let mut cursor: Option<PageCursor> = None;

        loop {
            if run.abort.load(Ordering::Relaxed) {
                return RepoFetch::failed(repo, "aborted after credential rejection");
            }
            if Instant::now() >= run.deadline {
                warn!(repo = %repo.full_name, "deadline exceeded");
                return fetch.stop(repo, "deadline exceeded");
            }
            if fetch.outcome.pages >= max_pages {
                warn!(repo = %repo.full_name, pages = fetch.outcome.pages, "page ceiling reached");
                return fetch.stop(repo, "page ceiling reached");
            }

            let page = match self.host.list_commits(
                run.credential,
                repo,
                run.since,
                cursor.as_ref(),
                self.config.per_page,
            ) {
                Ok(page) => page,
                Err(e) => {
                    if e.is_fatal() {
                        run.abort.store(true, Ordering::Relaxed);
                    }
                    warn!(repo = %repo.full_name, error = %e, "repository fetch failed");
                    return RepoFetch::failed(repo, e.to_string());
                }
            };

            fetch.outcome.pages += 1;
            for commit in page.commits {
                self.accept(run, &mut fetch, repo, commit);
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            repo = %repo.full_name,
            pages = fetch.outcome.pages,
            matched = fetch.outcome.commits_matched,
            "repository complete"
        );
        fetch
    }

    fn accept(
        &self,
        run: &Run<'_>,
        fetch: &mut RepoFetch,
        repo: &RemoteRepo,
        commit: RemoteCommit,
    ) {
        fetch.outcome.commits_seen += 1;

        if match_author(run.identity, &commit, self.host.noreply_domain()).is_none() {
            return;
        }

        let timestamp = match DateTime::parse_from_rfc3339(&commit.authored_at) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    repo = %repo.full_name,
                    sha = %commit.sha,
                    value = %commit.authored_at,
                    error = %e,
                    "skipping commit with malformed timestamp"
                );
                fetch.skipped += 1;
                return;
            }
        };

        // Listing is filtered on committer date; the author date can be older.
        if timestamp < run.since {
            return;
        }

        fetch.outcome.commits_matched += 1;
        fetch.events.push(CommitEvent {
            sha: commit.sha,
            repository: repo.full_name.clone(),
            timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitstreak_types::{CommitPage, HostError, HostResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ── StubHost ─────────────────────────────────────────────────────────────

    type Pages = std::result::Result<Vec<Vec<RemoteCommit>>, HostError>;

    struct StubHost {
        identity: HostResult<Identity>,
        repos: Vec<RemoteRepo>,
        pages: HashMap<String, Pages>,
        calls: Mutex<Vec<String>>,
    }

    impl StubHost {
        fn new() -> Self {
            StubHost {
                identity: Ok(Identity {
                    id: 7,
                    login: "octocat".into(),
                    email: Some("octo@example.com".into()),
                }),
                repos: Vec::new(),
                pages: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_repo(mut self, name: &str, pages: Pages) -> Self {
            self.repos.push(RemoteRepo {
                id: self.repos.len() as u64 + 1,
                full_name: name.into(),
                fork: false,
            });
            self.pages.insert(name.into(), pages);
            self
        }
    }

    impl CommitHost for StubHost {
        fn get_identity(&self, _credential: &Credential) -> HostResult<Identity> {
            self.identity.clone()
        }

        fn list_repositories(
            &self,
            _credential: &Credential,
            _include_forks: bool,
        ) -> HostResult<Vec<RemoteRepo>> {
            Ok(self.repos.clone())
        }

        fn list_commits(
            &self,
            _credential: &Credential,
            repo: &RemoteRepo,
            _since: DateTime<Utc>,
            cursor: Option<&PageCursor>,
            _per_page: u32,
        ) -> HostResult<CommitPage> {
            let index: usize = cursor.map(|c| c.0.parse().unwrap()).unwrap_or(0);
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}#{}", repo.full_name, index));
            let pages = self.pages[&repo.full_name].clone()?;
            let commits = pages.get(index).cloned().unwrap_or_default();
            let next = (index + 1 < pages.len()).then(|| PageCursor((index + 1).to_string()));
            Ok(CommitPage { commits, next })
        }

        fn aggregate_commit_count(
            &self,
            _credential: &Credential,
            _author: &str,
            range: &DateRange,
        ) -> HostResult<u64> {
            if range.from.is_none() {
                Ok(1234)
            } else {
                Err(HostError::RateLimited)
            }
        }
    }

    fn mine(sha: &str, at: &str) -> RemoteCommit {
        RemoteCommit {
            sha: sha.into(),
            author_id: Some(7),
            author_name: Some("Octo".into()),
            author_email: Some("octo@example.com".into()),
            authored_at: at.into(),
        }
    }

    fn theirs(sha: &str, at: &str) -> RemoteCommit {
        RemoteCommit {
            sha: sha.into(),
            author_id: Some(99),
            author_name: Some("octocat".into()),
            author_email: Some("someone@else.example".into()),
            authored_at: at.into(),
        }
    }

    fn since() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sequential() -> SyncConfig {
        SyncConfig {
            parallelism: 1,
            ..SyncConfig::default()
        }
    }

    fn cred() -> Credential {
        Credential::new("token")
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn test_one_failing_repo_does_not_abort_sync() {
        let host = StubHost::new()
            .with_repo("me/a", Ok(vec![vec![mine("a1", "2024-06-01T10:00:00Z")]]))
            .with_repo(
                "me/b",
                Err(HostError::Status {
                    status: 500,
                    message: "boom".into(),
                }),
            )
            .with_repo("me/c", Ok(vec![vec![mine("c1", "2024-06-02T10:00:00Z")]]));
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("partial failure is recoverable");

        let shas: Vec<&str> = collection.events.iter().map(|e| e.sha.as_str()).collect();
        assert_eq!(shas, vec!["a1", "c1"]);
        assert_eq!(collection.coverage.attempted(), 3);
        assert_eq!(collection.coverage.failed(), 1);
        assert!(collection.coverage.repositories[1].is_failed());
    }

    #[test]
    fn test_all_repos_failing_is_an_error() {
        let host = StubHost::new()
            .with_repo("me/a", Err(HostError::RateLimited))
            .with_repo("me/b", Err(HostError::Transport("reset".into())));
        let config = sequential();

        let err = Collector::new(&host, &config)
            .collect(&cred(), since())
            .unwrap_err();
        assert!(matches!(err, StreakError::AllRepositoriesFailed { attempted: 2 }));
    }

    #[test]
    fn test_no_repositories_is_not_a_failure() {
        let host = StubHost::new();
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("empty account");
        assert!(collection.events.is_empty());
        assert_eq!(collection.coverage.attempted(), 0);
    }

    #[test]
    fn test_rejected_credential_is_fatal() {
        let host = StubHost::new()
            .with_repo("me/a", Ok(vec![vec![mine("a1", "2024-06-01T10:00:00Z")]]))
            .with_repo("me/b", Err(HostError::Unauthorized));
        let config = sequential();

        let err = Collector::new(&host, &config)
            .collect(&cred(), since())
            .unwrap_err();
        assert!(matches!(err, StreakError::Unauthenticated(_)));
    }

    #[test]
    fn test_identity_rejection_is_fatal() {
        let mut host = StubHost::new();
        host.identity = Err(HostError::Unauthorized);
        let config = sequential();

        let err = Collector::new(&host, &config)
            .collect(&cred(), since())
            .unwrap_err();
        assert!(matches!(err, StreakError::Unauthenticated(_)));
    }

    #[test]
    fn test_follows_pagination_and_filters_authors() {
        let host = StubHost::new().with_repo(
            "me/a",
            Ok(vec![
                vec![mine("p1", "2024-06-01T10:00:00Z"), theirs("x1", "2024-06-01T11:00:00Z")],
                vec![mine("p2", "2024-06-02T10:00:00Z")],
                vec![mine("p3", "2024-06-03T10:00:00Z")],
            ]),
        );
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("collect");

        assert_eq!(collection.events.len(), 3);
        let outcome = &collection.coverage.repositories[0];
        assert_eq!(outcome.status, RepoStatus::Complete);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.commits_seen, 4);
        assert_eq!(outcome.commits_matched, 3);
        assert_eq!(host.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_page_ceiling_truncates_but_keeps_commits() {
        let host = StubHost::new().with_repo(
            "me/big",
            Ok(vec![
                vec![mine("p1", "2024-06-01T10:00:00Z")],
                vec![mine("p2", "2024-06-02T10:00:00Z")],
                vec![mine("p3", "2024-06-03T10:00:00Z")],
            ]),
        );
        let config = SyncConfig {
            max_pages_per_repo: 2,
            ..sequential()
        };

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("truncation is not fatal");

        assert_eq!(collection.events.len(), 2);
        assert!(matches!(
            collection.coverage.repositories[0].status,
            RepoStatus::Truncated { .. }
        ));
        assert_eq!(collection.coverage.failed(), 0);
    }

    #[test]
    fn test_exhausted_deadline_fails_every_repo() {
        let host = StubHost::new()
            .with_repo("me/a", Ok(vec![vec![mine("a1", "2024-06-01T10:00:00Z")]]));
        let config = SyncConfig {
            deadline: std::time::Duration::ZERO,
            ..sequential()
        };

        let err = Collector::new(&host, &config)
            .collect(&cred(), since())
            .unwrap_err();
        assert!(matches!(err, StreakError::AllRepositoriesFailed { attempted: 1 }));
    }

    #[test]
    fn test_malformed_timestamp_is_skipped_and_counted() {
        let host = StubHost::new().with_repo(
            "me/a",
            Ok(vec![vec![
                mine("ok", "2024-06-01T10:00:00Z"),
                mine("bad", "yesterday-ish"),
            ]]),
        );
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("collect");
        assert_eq!(collection.events.len(), 1);
        assert_eq!(collection.coverage.commits_skipped, 1);
    }

    #[test]
    fn test_commits_before_cutoff_are_dropped() {
        let host = StubHost::new().with_repo(
            "me/a",
            Ok(vec![vec![
                mine("old", "2023-12-31T23:59:59Z"),
                mine("new", "2024-01-01T00:00:00Z"),
            ]]),
        );
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("collect");
        let shas: Vec<&str> = collection.events.iter().map(|e| e.sha.as_str()).collect();
        assert_eq!(shas, vec!["new"]);
    }

    #[test]
    fn test_fork_duplicates_counted_once() {
        let shared = mine("shared", "2024-06-01T10:00:00Z");
        let host = StubHost::new()
            .with_repo("me/origin", Ok(vec![vec![shared.clone()]]))
            .with_repo("me/fork", Ok(vec![vec![shared]]));
        let config = sequential();

        let collection = Collector::new(&host, &config)
            .collect(&cred(), since())
            .expect("collect");
        assert_eq!(collection.events.len(), 1);
        assert_eq!(collection.events[0].repository, "me/origin");
        assert_eq!(collection.coverage.duplicates, 1);
    }

    #[test]
    fn test_parallel_fetch_matches_sequential() {
        let build = || {
            let mut host = StubHost::new();
            for i in 0..8 {
                let at = format!("2024-06-{:02}T10:00:00Z", i + 1);
                let page = vec![mine(&format!("s{i}"), &at)];
                host = host.with_repo(&format!("me/r{i}"), Ok(vec![page]));
            }
            host
        };

        let seq_host = build();
        let seq_config = sequential();
        let seq = Collector::new(&seq_host, &seq_config)
            .collect(&cred(), since())
            .expect("sequential");

        let par_host = build();
        let par_config = SyncConfig {
            parallelism: 4,
            ..SyncConfig::default()
        };
        let par = Collector::new(&par_host, &par_config)
            .collect(&cred(), since())
            .expect("parallel");

        assert_eq!(seq.events, par.events);
        assert_eq!(seq.coverage, par.coverage);
    }

    #[test]
    fn test_aggregate_totals_tolerate_failures() {
        let host = StubHost::new();
        let config = sequential();
        let collector = Collector::new(&host, &config);
        let identity = host.identity.clone().unwrap();

        let totals = collector.aggregate_totals(
            &cred(),
            &identity,
            NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(),
        );
        assert_eq!(totals.all_time, Some(1234));
        assert_eq!(totals.current_year, None);
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use commitstreak_types::{
    CommitHost, CommitPage, Credential, DateRange, HostError, HostResult, Identity, PageCursor,
    RemoteCommit, RemoteRepo, Result, StreakError,
};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("commitstreak/", env!("CARGO_PKG_VERSION"));
const MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// [`CommitHost`] backed by the GitHub REST API.
pub struct GitHubHost {
    client: Client,
    api_base: Url,
}

impl GitHubHost {
    pub fn new(api_base: &str) -> Result<Self> {
        let mut base = Url::parse(api_base)
            .map_err(|e| StreakError::Config(format!("invalid API base '{api_base}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StreakError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: base,
        })
    }

    fn endpoint(&self, path: &str) -> HostResult<Url> {
        self.api_base
            .join(path)
            .map_err(|e| HostError::Decode(format!("bad endpoint '{path}': {e}")))
    }

    fn get(&self, credential: &Credential, url: Url) -> HostResult<Response> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .bearer_auth(&credential.access_token)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .map_err(|e| HostError::Transport(e.to_string()))?;
        check(response)
    }

    /// Decoded body plus the `rel="next"` link, if any.
    fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: Url,
    ) -> HostResult<(T, Option<String>)> {
        let response = self.get(credential, url)?;
        let next = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        let body = response
            .json::<T>()
            .map_err(|e| HostError::Decode(e.to_string()))?;
        Ok((body, next))
    }

    fn primary_email(&self, credential: &Credential) -> HostResult<Option<String>> {
        let url = self.endpoint("user/emails")?;
        let (emails, _) = self.get_json::<Vec<WireEmail>>(credential, url)?;
        let verified = || emails.iter().filter(|e| e.verified);
        Ok(verified()
            .find(|e| e.primary)
            .or_else(|| verified().next())
            .map(|e| e.email.clone()))
    }
}

impl CommitHost for GitHubHost {
    fn get_identity(&self, credential: &Credential) -> HostResult<Identity> {
        let (user, _) = self.get_json::<WireUser>(credential, self.endpoint("user")?)?;

        // The emails endpoint needs an extra scope; fall back to the public email.
        let email = match self.primary_email(credential) {
            Ok(Some(email)) => Some(email),
            Ok(None) => user.email,
            Err(HostError::Unauthorized) => return Err(HostError::Unauthorized),
            Err(e) => {
                warn!(login = %user.login, error = %e, "could not read account emails");
                user.email
            }
        };

        Ok(Identity {
            id: user.id,
            login: user.login,
            email,
        })
    }

    fn list_repositories(
        &self,
        credential: &Credential,
        include_forks: bool,
    ) -> HostResult<Vec<RemoteRepo>> {
        let mut url = self.endpoint("user/repos")?;
        url.query_pairs_mut()
            .append_pair("affiliation", "owner,collaborator,organization_member")
            .append_pair("per_page", "100");

        let mut repos = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let (page, link) = self.get_json::<Vec<WireRepo>>(credential, url)?;
            repos.extend(
                page.into_iter()
                    .filter(|r| include_forks || !r.fork)
                    .map(|r| RemoteRepo {
                        id: r.id,
                        full_name: r.full_name,
                        fork: r.fork,
                    }),
            );
            next = match link {
                Some(link) => Some(
                    Url::parse(&link)
                        .map_err(|e| HostError::Decode(format!("bad link '{link}': {e}")))?,
                ),
                None => None,
            };
        }
        Ok(repos)
    }

    fn list_commits(
        &self,
        credential: &Credential,
        repo: &RemoteRepo,
        since: DateTime<Utc>,
        cursor: Option<&PageCursor>,
        per_page: u32,
    ) -> HostResult<CommitPage> {
        let url = match cursor {
            Some(cursor) => Url::parse(&cursor.0)
                .map_err(|e| HostError::Decode(format!("bad cursor '{}': {e}", cursor.0)))?,
            None => {
                let mut url = self.endpoint(&format!("repos/{}/commits", repo.full_name))?;
                url.query_pairs_mut()
                    .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .append_pair("per_page", &per_page.clamp(1, 100).to_string());
                url
            }
        };

        match self.get_json::<Vec<WireCommit>>(credential, url) {
            Ok((commits, next)) => Ok(CommitPage {
                commits: commits.into_iter().map(WireCommit::into_remote).collect(),
                next: next.map(PageCursor),
            }),
            // An empty repository answers 409.
            Err(HostError::Status { status: 409, .. }) => Ok(CommitPage::default()),
            Err(e) => Err(e),
        }
    }

    fn aggregate_commit_count(
        &self,
        credential: &Credential,
        author: &str,
        range: &DateRange,
    ) -> HostResult<u64> {
        let mut url = self.endpoint("search/commits")?;
        url.query_pairs_mut()
            .append_pair("q", &search_query(author, range))
            .append_pair("per_page", "1");
        let (result, _) = self.get_json::<WireSearch>(credential, url)?;
        Ok(result.total_count)
    }
}

// ── HTTP helpers ──────────────────────────────────────────────────────────

fn check(response: Response) -> HostResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let url = response.url().to_string();
    let message = response.text().unwrap_or_default();
    Err(classify(status.as_u16(), remaining.as_deref(), &url, &message))
}

pub(crate) fn classify(
    status: u16,
    ratelimit_remaining: Option<&str>,
    url: &str,
    message: &str,
) -> HostError {
    match status {
        401 => HostError::Unauthorized,
        429 => HostError::RateLimited,
        403 if ratelimit_remaining == Some("0") => HostError::RateLimited,
        404 => HostError::NotFound(url.to_string()),
        _ => HostError::Status {
            status,
            message: message.chars().take(200).collect(),
        },
    }
}

/// Target of the `rel="next"` entry of an RFC 8288 `Link` header.
pub(crate) fn next_link(header: &str) -> Option<String> {
    header.split('<').skip(1).find_map(|chunk| {
        let (target, params) = chunk.split_once('>')?;
        params
            .split(';')
            .map(|p| p.trim().trim_end_matches(',').trim())
            .any(|p| p == "rel=\"next\"" || p == "rel=next")
            .then(|| target.to_string())
    })
}

pub(crate) fn search_query(author: &str, range: &DateRange) -> String {
    let mut q = format!("author:{author}");
    match (range.from, range.to) {
        (Some(from), Some(to)) => q.push_str(&format!(" author-date:{from}..{to}")),
        (Some(from), None) => q.push_str(&format!(" author-date:>={from}")),
        (None, Some(to)) => q.push_str(&format!(" author-date:<={to}")),
        (None, None) => {}
    }
    q
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u64,
    login: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct WireRepo {
    id: u64,
    full_name: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireCommitBody,
    /// Linked account; null when the author email is not tied to one.
    author: Option<WireAccount>,
}

#[derive(Debug, Deserialize)]
struct WireCommitBody {
    author: Option<WireSignature>,
}

#[derive(Debug, Deserialize)]
struct WireSignature {
    name: Option<String>,
    email: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireSearch {
    total_count: u64,
}

impl WireCommit {
    fn into_remote(self) -> RemoteCommit {
        let signature = self.commit.author;
        let (author_name, author_email, authored_at) = match signature {
            Some(s) => (s.name, s.email, s.date.unwrap_or_default()),
            None => (None, None, String::new()),
        };
        RemoteCommit {
            sha: self.sha,
            author_id: self.author.map(|a| a.id),
            author_name,
            author_email,
            authored_at,
        }
    }
}

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Local, Offset};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use commitstreak_collect::{GitHubHost, DEFAULT_API_BASE};
use commitstreak_engine::{level_for, milestone, SyncEngine, SyncReport, TracingNotifier};
use commitstreak_store::SqliteStore;
use commitstreak_types::{
    AggregateStore, Credential, CredentialStore, Lookback, RepoStatus, SyncConfig,
};

#[derive(Parser)]
#[command(name = "commitstreak", about = "GitHub commit streak tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct UserArgs {
    #[arg(long)]
    db: Option<PathBuf>,
    /// Local user id the credential and aggregates are stored under.
    #[arg(long)]
    user: Option<String>,
}

#[derive(Args)]
struct HostArgs {
    #[arg(long = "api-base")]
    api_base: Option<String>,
    /// Local offset such as `-05:00`; defaults to this machine's offset.
    #[arg(long = "utc-offset", allow_hyphen_values = true)]
    utc_offset: Option<String>,
    /// Only look back this many days instead of the whole year.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=36_600))]
    days: Option<u32>,
    #[arg(long = "no-forks")]
    no_forks: bool,
    /// Concurrent repository fetches.
    #[arg(long, default_value_t = 4)]
    jobs: usize,
}

#[derive(Subcommand)]
enum Commands {
    Init {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Store a GitHub token (argument, $GITHUB_TOKEN, or first line of stdin).
    Login {
        token: Option<String>,
        #[command(flatten)]
        user: UserArgs,
        #[arg(long = "api-base")]
        api_base: Option<String>,
    },
    Logout {
        #[command(flatten)]
        user: UserArgs,
    },
    Sync {
        #[command(flatten)]
        user: UserArgs,
        #[command(flatten)]
        host: HostArgs,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[command(flatten)]
        user: UserArgs,
        #[arg(long = "utc-offset", allow_hyphen_values = true)]
        utc_offset: Option<String>,
    },
    Badges {
        #[command(flatten)]
        user: UserArgs,
    },
    DeleteAccount {
        #[command(flatten)]
        user: UserArgs,
        #[arg(long)]
        yes: bool,
    },
    Serve {
        #[command(flatten)]
        user: UserArgs,
        #[command(flatten)]
        host: HostArgs,
    },
}

// ── Configuration ─────────────────────────────────────────────────────────

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(p) = flag {
        return p;
    }
    if let Ok(v) = std::env::var("COMMITSTREAK_DB") {
        return PathBuf::from(v);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".commitstreak").join("db.sqlite3")
}

fn resolve_api_base(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("COMMITSTREAK_API_BASE").ok())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

fn resolve_user(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("COMMITSTREAK_USER").ok())
        .unwrap_or_else(|| "default".to_string())
}

fn resolve_offset(flag: Option<&str>) -> Result<FixedOffset> {
    match flag {
        Some(s) => parse_utc_offset(s),
        None => Ok(Local::now().offset().fix()),
    }
}

/// `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `±HHMM`.
fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).context("zero offset");
    }
    s.parse::<FixedOffset>()
        .with_context(|| format!("UTC offset must look like +HH:MM: {s}"))
}

fn sync_config(host: &HostArgs) -> SyncConfig {
    SyncConfig {
        lookback: match host.days {
            Some(n) => Lookback::RollingDays(n),
            None => Lookback::YearToDate,
        },
        include_forks: !host.no_forks,
        parallelism: host.jobs.max(1),
        ..SyncConfig::default()
    }
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>> {
    let db_path = resolve_db_path(db);
    if !db_path.exists() {
        bail!(
            "No database at {}. Run `commitstreak init` first.",
            db_path.display()
        );
    }
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn build_engine(
    store: Arc<SqliteStore>,
    api_base: Option<String>,
    config: SyncConfig,
    offset: FixedOffset,
) -> Result<SyncEngine> {
    let api_base = resolve_api_base(api_base);
    let host = GitHubHost::new(&api_base)
        .with_context(|| format!("Failed to set up GitHub client for {api_base}"))?;
    Ok(SyncEngine::new(
        Arc::new(host),
        store.clone(),
        store,
        Arc::new(TracingNotifier),
    )
    .with_config(config)
    .with_offset(offset))
}

fn read_token(arg: Option<String>) -> Result<String> {
    if let Some(token) = arg.or_else(|| std::env::var("GITHUB_TOKEN").ok()) {
        return Ok(token);
    }
    eprintln!("Paste a GitHub token and press enter:");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read token from stdin")?;
    let token = line.trim().to_string();
    if token.is_empty() {
        bail!("No token provided");
    }
    Ok(token)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("commitstreak=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ── Output ────────────────────────────────────────────────────────────────

fn print_report(report: &SyncReport) {
    let s = &report.snapshot;
    println!("Current streak:  {} days", s.current_streak);
    println!("Longest streak:  {} days", s.longest_streak);
    println!(
        "Last commit:     {}",
        s.last_commit_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Today:           {} commits", s.today_commits);
    println!("This week:       {:?} (Mon..Sun)", s.weekly_commits);
    println!("This year:       {} commits", s.yearly_commits);
    println!("All time:        {} commits", s.total_commits);

    for badge_id in &report.newly_earned_badges {
        let name = milestone::badge(badge_id).map(|b| b.name).unwrap_or(badge_id.as_str());
        println!("New badge:       {name}");
    }

    let coverage = &report.coverage;
    println!(
        "Repositories:    {} synced, {} failed",
        coverage.succeeded(),
        coverage.failed()
    );
    for outcome in &coverage.repositories {
        match &outcome.status {
            RepoStatus::Complete => {}
            RepoStatus::Truncated { reason } => {
                eprintln!("  warning: '{}' truncated: {}", outcome.repository, reason)
            }
            RepoStatus::Failed { reason } => {
                eprintln!("  warning: '{}' skipped: {}", outcome.repository, reason)
            }
        }
    }
    if let Some(err) = &report.persist_error {
        eprintln!("warning: results were not saved: {err}");
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db } => {
            let db_path = resolve_db_path(db);
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
            info!(path = %db_path.display(), "database initialized");
            println!("Initialized commitstreak database at {}", db_path.display());
        }

        Commands::Login {
            token,
            user,
            api_base,
        } => {
            let user_id = resolve_user(user.user);
            let store = open_store(user.db)?;
            let offset = resolve_offset(None)?;
            let engine = build_engine(store, api_base, SyncConfig::default(), offset)?;
            let token = read_token(token)?;
            let identity = engine
                .login(&user_id, &Credential::new(token))
                .context("GitHub rejected the token")?;
            println!("Logged in as {} (user '{}')", identity.login, user_id);
        }

        Commands::Logout { user } => {
            let user_id = resolve_user(user.user);
            let store = open_store(user.db)?;
            store
                .delete_credential(&user_id)
                .context("Failed to remove credential")?;
            println!("Logged out user '{user_id}'");
        }

        Commands::Sync { user, host, json } => {
            let user_id = resolve_user(user.user);
            let offset = resolve_offset(host.utc_offset.as_deref())?;
            let store = open_store(user.db)?;
            let config = sync_config(&host);
            let engine = build_engine(store, host.api_base, config, offset)?;

            let report = engine
                .sync(&user_id)
                .with_context(|| format!("Sync failed for user '{user_id}'"))?;
            if json {
                let out = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize sync report")?;
                println!("{out}");
            } else {
                print_report(&report);
            }
        }

        Commands::Status { user, utc_offset } => {
            let user_id = resolve_user(user.user);
            let offset = resolve_offset(utc_offset.as_deref())?;
            let store = open_store(user.db)?;
            let snapshot = store
                .get_snapshot(&user_id)
                .context("Failed to read snapshot")?;
            let today = chrono::Utc::now().with_timezone(&offset).date_naive();

            if snapshot.is_empty() {
                println!("No commits recorded yet. Run `commitstreak sync` first.");
                return Ok(());
            }

            let level = level_for(snapshot.total_commits);
            println!("Status:          {:?}", snapshot.status(today));
            println!("Current streak:  {} days", snapshot.effective_current_streak(today));
            println!("Longest streak:  {} days", snapshot.longest_streak);
            println!(
                "Level:           {} ({}/{} to next, {}%)",
                level.level,
                level.into_level,
                level.level_span,
                level.percent()
            );
        }

        Commands::Badges { user } => {
            let user_id = resolve_user(user.user);
            let store = open_store(user.db)?;
            let ledger = store
                .get_badges(&user_id)
                .context("Failed to read badges")?;
            let snapshot = store
                .get_snapshot(&user_id)
                .context("Failed to read snapshot")?;

            println!("{:<14} {:<18} {:>6}  EARNED", "BADGE", "NAME", "DAYS");
            for badge in milestone::BADGE_LADDER {
                let earned = if ledger.contains(badge.id) { "yes" } else { "" };
                println!(
                    "{:<14} {:<18} {:>6}  {}",
                    badge.id, badge.name, badge.threshold, earned
                );
            }
            if let Some(next) = milestone::next_badge(snapshot.longest_streak) {
                println!(
                    "\nNext: {} in {} more days of streak",
                    next.badge.name, next.days_remaining
                );
            }
        }

        Commands::DeleteAccount { user, yes } => {
            let user_id = resolve_user(user.user);
            if !yes {
                bail!("Refusing to delete '{user_id}' without --yes");
            }
            let store = open_store(user.db)?;
            let engine = build_engine(store, None, SyncConfig::default(), resolve_offset(None)?)?;
            engine
                .delete_account(&user_id)
                .with_context(|| format!("Failed to delete account '{user_id}'"))?;
            println!("Deleted all data for user '{user_id}'");
        }

        Commands::Serve { user, host } => {
            let user_id = resolve_user(user.user);
            let offset = resolve_offset(host.utc_offset.as_deref())?;
            let store = open_store(user.db)?;
            let config = sync_config(&host);
            let engine = build_engine(store, host.api_base, config, offset)?;
            info!(user = %user_id, %offset, "serving MCP on stdio");
            commitstreak_mcp::run_mcp_server(Arc::new(engine), &user_id)
                .context("MCP server error")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(
            parse_utc_offset("-05:00").unwrap(),
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
        assert_eq!(
            parse_utc_offset("+0530").unwrap(),
            FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
        );
        assert_eq!(parse_utc_offset("Z").unwrap(), FixedOffset::east_opt(0).unwrap());
        assert!(parse_utc_offset("05:00").is_err());
        assert!(parse_utc_offset("+5").is_err());
        assert!(parse_utc_offset("+01:75").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn test_db_flag_wins() {
        let p = resolve_db_path(Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(p, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_sync_config_from_flags() {
        let host = HostArgs {
            api_base: None,
            utc_offset: None,
            days: Some(30),
            no_forks: true,
            jobs: 0,
        };
        let config = sync_config(&host);
        assert_eq!(config.lookback, Lookback::RollingDays(30));
        assert!(!config.include_forks);
        assert_eq!(config.parallelism, 1);
    }

    #[test]
    fn test_cli_parses_negative_offset() {
        let cli = Cli::try_parse_from(["commitstreak", "sync", "--utc-offset", "-05:00", "--json"])
            .expect("parse");
        match cli.command {
            Commands::Sync { host, json, .. } => {
                assert_eq!(host.utc_offset.as_deref(), Some("-05:00"));
                assert!(json);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_cli_rejects_out_of_range_days() {
        assert!(Cli::try_parse_from(["commitstreak", "sync", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["commitstreak", "sync", "--days", "200000000"]).is_err());

        let cli = Cli::try_parse_from(["commitstreak", "sync", "--days", "30"]).expect("parse");
        match cli.command {
            Commands::Sync { host, .. } => {
                assert_eq!(sync_config(&host).lookback, Lookback::RollingDays(30));
            }
            _ => panic!("expected sync"),
        }
    }
}

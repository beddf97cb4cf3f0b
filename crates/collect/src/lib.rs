//! Commit collection: pulls the tracked identity's commits from a
//! [`commitstreak_types::CommitHost`] and reports per-repository coverage.

mod authorship;
mod collector;
mod github;

pub use authorship::{match_author, AuthorMatch};
pub use collector::{Collection, Collector, CommitTotals};
pub use github::{GitHubHost, DEFAULT_API_BASE};

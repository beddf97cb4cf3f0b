use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::bucket::DayBuckets;

/// Everything derived from one bucket map on one local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakStats {
    pub current_streak: u32,
    /// Longest run inside the lookback window only.
    pub longest_streak: u32,
    pub last_commit_date: Option<NaiveDate>,
    pub today_commits: u32,
    pub weekly_commits: [u32; 7],
    pub yearly_commits: u64,
}

/// Consecutive committed days ending today or yesterday.
///
/// Today counts when it has commits but never breaks the walk; every earlier
/// day must have commits or the walk stops there.
pub fn current_streak(buckets: &DayBuckets, today: NaiveDate) -> u32 {
    let mut streak = u32::from(buckets.has_commits(today));
    let mut day = today;
    while let Some(prev) = day.pred_opt() {
        if !buckets.has_commits(prev) {
            break;
        }
        streak += 1;
        day = prev;
    }
    streak
}

/// Longest run of consecutive committed days in `window_start..=today`.
pub fn longest_streak(buckets: &DayBuckets, window_start: NaiveDate, today: NaiveDate) -> u32 {
    let mut best = 0;
    let mut run = 0;
    for day in window_start.iter_days().take_while(|d| *d <= today) {
        if buckets.has_commits(day) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

/// Counts for today and the six days before, indexed Monday-first.
pub fn weekly_histogram(buckets: &DayBuckets, today: NaiveDate) -> [u32; 7] {
    let mut week = [0; 7];
    for offset in 0..7 {
        let day = today - Duration::days(offset);
        week[day.weekday().num_days_from_monday() as usize] = buckets.count(day);
    }
    week
}

/// A recomputation over a bounded window must never lower the stored best.
pub fn merge_longest(stored: u32, computed: u32) -> u32 {
    stored.max(computed)
}

pub fn compute(buckets: &DayBuckets, today: NaiveDate, window_start: NaiveDate) -> StreakStats {
    StreakStats {
        current_streak: current_streak(buckets, today),
        longest_streak: longest_streak(buckets, window_start, today),
        last_commit_date: buckets.last_commit_date(),
        today_commits: buckets.count(today),
        weekly_commits: weekly_histogram(buckets, today),
        yearly_commits: buckets.total_in_year(today.year()),
    }
}

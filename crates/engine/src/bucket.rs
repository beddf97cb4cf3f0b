use chrono::{Datelike, NaiveDate, TimeZone};
use commitstreak_types::CommitEvent;
use std::collections::BTreeMap;

/// Commit counts keyed by local calendar day. Days without commits are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayBuckets {
    days: BTreeMap<NaiveDate, u32>,
}

impl DayBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, day: NaiveDate) {
        let count = self.days.entry(day).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn count(&self, day: NaiveDate) -> u32 {
        self.days.get(&day).copied().unwrap_or(0)
    }

    pub fn has_commits(&self, day: NaiveDate) -> bool {
        self.count(day) > 0
    }

    /// Latest day with at least one commit.
    pub fn last_commit_date(&self) -> Option<NaiveDate> {
        self.days
            .iter()
            .rev()
            .find(|(_, count)| **count > 0)
            .map(|(day, _)| *day)
    }

    pub fn total_in_year(&self, year: i32) -> u64 {
        self.days
            .iter()
            .filter(|(day, _)| day.year() == year)
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(|c| *c == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.days.iter().map(|(d, c)| (*d, *c))
    }
}

impl FromIterator<(NaiveDate, u32)> for DayBuckets {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, u32)>>(iter: I) -> Self {
        let mut buckets = DayBuckets::new();
        for (day, count) in iter {
            if count > 0 {
                let slot = buckets.days.entry(day).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
        buckets
    }
}

/// Buckets each event by its calendar date in `tz`, the consuming device's
/// zone, never the host's.
pub fn bucketize<Tz: TimeZone>(events: &[CommitEvent], tz: &Tz) -> DayBuckets {
    let mut buckets = DayBuckets::new();
    for event in events {
        buckets.add(event.timestamp.with_timezone(tz).date_naive());
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, Utc};

    fn event(sha: &str, at: &str) -> CommitEvent {
        CommitEvent {
            sha: sha.into(),
            repository: "me/repo".into(),
            timestamp: DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_late_evening_stays_on_local_day() {
        let utc_minus_5 = FixedOffset::west_opt(5 * 3600).unwrap();
        let events = [
            event("a", "2024-03-01T23:50:00Z"),
            event("b", "2024-03-02T03:50:00Z"),
        ];

        let buckets = bucketize(&events, &utc_minus_5);
        assert_eq!(buckets.count(day(2024, 3, 1)), 2);
        assert_eq!(buckets.count(day(2024, 3, 2)), 0);
    }

    #[test]
    fn test_same_instant_differs_by_zone() {
        let events = [event("a", "2024-03-01T23:50:00Z")];
        let utc = bucketize(&events, &Utc);
        let tokyo = bucketize(&events, &FixedOffset::east_opt(9 * 3600).unwrap());

        assert!(utc.has_commits(day(2024, 3, 1)));
        assert!(tokyo.has_commits(day(2024, 3, 2)));
    }

    #[test]
    fn test_last_commit_date_and_yearly_total() {
        let buckets: DayBuckets = [
            (day(2023, 12, 31), 4),
            (day(2024, 6, 1), 2),
            (day(2024, 6, 4), 3),
            (day(2024, 6, 9), 0),
        ]
        .into_iter()
        .collect();

        assert_eq!(buckets.last_commit_date(), Some(day(2024, 6, 4)));
        assert_eq!(buckets.total_in_year(2024), 5);
        assert_eq!(buckets.total_in_year(2023), 4);
        assert!(DayBuckets::new().last_commit_date().is_none());
        assert!(DayBuckets::new().is_empty());
    }
}

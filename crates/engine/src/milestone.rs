//! Badge ladder and the evaluation of newly crossed thresholds.
//!
//! Badges are awarded on the longest streak, never the current one, so an
//! earned badge stays valid after the streak breaks.

use commitstreak_types::BadgeLedger;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub id: &'static str,
    pub name: &'static str,
    /// Streak length in days needed to earn the badge.
    pub threshold: u32,
}

/// Ordered by ascending threshold.
pub const BADGE_LADDER: &[Badge] = &[
    Badge {
        id: "first-commit",
        name: "Getting Started",
        threshold: 1,
    },
    Badge {
        id: "week-streak",
        name: "Week Warrior",
        threshold: 7,
    },
    Badge {
        id: "two-weeks",
        name: "Fortnight Force",
        threshold: 14,
    },
    Badge {
        id: "month-streak",
        name: "Monthly Master",
        threshold: 30,
    },
    Badge {
        id: "hundred-days",
        name: "Centurion",
        threshold: 100,
    },
    Badge {
        id: "six-months",
        name: "Half-Year Hero",
        threshold: 180,
    },
    Badge {
        id: "full-year",
        name: "Year Warrior",
        threshold: 365,
    },
];

pub fn badge(id: &str) -> Option<&'static Badge> {
    BADGE_LADDER.iter().find(|b| b.id == id)
}

/// Badges whose threshold `longest_streak` meets but that `ledger` lacks.
pub fn newly_earned(ledger: &BadgeLedger, longest_streak: u32) -> Vec<&'static Badge> {
    BADGE_LADDER
        .iter()
        .filter(|b| longest_streak >= b.threshold && !ledger.contains(b.id))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextBadge {
    pub badge: &'static Badge,
    pub days_remaining: u32,
}

/// The first rung above `longest_streak`, or `None` at the top of the ladder.
pub fn next_badge(longest_streak: u32) -> Option<NextBadge> {
    BADGE_LADDER
        .iter()
        .find(|b| b.threshold > longest_streak)
        .map(|badge| NextBadge {
            badge,
            days_remaining: badge.threshold - longest_streak,
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub title: String,
    pub body: String,
}

/// One notification per batch of newly earned badges.
pub fn announcement(badges: &[&Badge]) -> Option<Announcement> {
    match badges {
        [] => None,
        [only] => Some(Announcement {
            title: "New badge earned!".into(),
            body: format!(
                "You earned \"{}\" for a {}-day streak.",
                only.name, only.threshold
            ),
        }),
        many => {
            let names: Vec<String> = many.iter().map(|b| format!("\"{}\"", b.name)).collect();
            Some(Announcement {
                title: format!("{} new badges earned!", many.len()),
                body: format!("You earned {}.", names.join(", ")),
            })
        }
    }
}

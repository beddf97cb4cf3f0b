use serde::Serialize;

/// Levels per tier; the per-level cost rises once per tier.
pub const TIER_SIZE: u32 = 5;
/// Per-level cost in the first tier, and the increment between tiers.
pub const TIER_COST_STEP: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: u32,
    /// Commits past the start of the current level.
    pub into_level: u64,
    /// Commits the current level spans.
    pub level_span: u64,
    /// Total commits at which the next level starts.
    pub next_level_at: u64,
}

impl LevelProgress {
    pub fn percent(&self) -> u64 {
        self.into_level * 100 / self.level_span
    }
}

/// Commits needed to go from `level` to `level + 1`.
pub fn level_cost(level: u32) -> u64 {
    let tier = (level.max(1) - 1) / TIER_SIZE + 1;
    TIER_COST_STEP * u64::from(tier)
}

/// Total commits required to reach `level`. Level 1 needs none.
pub fn cumulative(level: u32) -> u64 {
    (1..level.max(1)).map(level_cost).sum()
}

/// Commits needed to finish the first `tiers` tiers.
fn tier_floor(tiers: u64) -> u128 {
    let tiers = u128::from(tiers);
    u128::from(TIER_SIZE) * u128::from(TIER_COST_STEP) * tiers * (tiers + 1) / 2
}

pub fn level_for(total_commits: u64) -> LevelProgress {
    let total = u128::from(total_commits);
    let mut tiers = (total_commits as f64 / 25.0).sqrt() as u64;
    while tiers > 0 && tier_floor(tiers) > total {
        tiers -= 1;
    }
    while tier_floor(tiers + 1) <= total {
        tiers += 1;
    }

    let span = TIER_COST_STEP * (tiers + 1);
    let rem = total_commits - (tier_floor(tiers) as u64);
    let steps = rem / span;
    let level = u64::from(TIER_SIZE) * tiers + steps + 1;
    let next_level_at = tier_floor(tiers) + u128::from((steps + 1) * span);

    LevelProgress {
        level: u32::try_from(level).unwrap_or(u32::MAX),
        into_level: rem - steps * span,
        level_span: span,
        next_level_at: u64::try_from(next_level_at).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_costs() {
        assert_eq!(level_cost(1), 10);
        assert_eq!(level_cost(5), 10);
        assert_eq!(level_cost(6), 20);
        assert_eq!(level_cost(11), 30);
        assert_eq!(cumulative(1), 0);
        assert_eq!(cumulative(6), 50);
        assert_eq!(cumulative(11), 150);
    }

    #[test]
    fn test_twenty_five_commits_is_level_three_halfway() {
        let p = level_for(25);
        assert_eq!(p.level, 3);
        assert_eq!(p.into_level, 5);
        assert_eq!(p.level_span, 10);
        assert_eq!(p.next_level_at, 30);
        assert_eq!(p.percent(), 50);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(level_for(0).level, 1);
        assert_eq!(level_for(9).level, 1);
        assert_eq!(level_for(10).level, 2);

        let six = level_for(50);
        assert_eq!(six.level, 6);
        assert_eq!(six.into_level, 0);
        assert_eq!(six.level_span, 20);
    }

    #[test]
    fn test_level_matches_cumulative_definition() {
        for total in 0..600u64 {
            let p = level_for(total);
            assert!(cumulative(p.level) <= total);
            assert!(cumulative(p.level + 1) > total);
            assert_eq!(p.into_level, total - cumulative(p.level));
        }
    }

    #[test]
    fn test_large_totals_stay_consistent() {
        for total in [49_999u64, 50_000, 1_234_567, 10_000_000] {
            let p = level_for(total);
            assert!(cumulative(p.level) <= total, "{total}");
            assert!(cumulative(p.level + 1) > total, "{total}");
            assert_eq!(p.next_level_at, cumulative(p.level + 1));
        }

        let top = level_for(u64::MAX);
        assert!(top.level > 1);
        assert!(top.into_level < top.level_span);
    }
}

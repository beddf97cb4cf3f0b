pub mod bucket;
pub mod level;
pub mod milestone;
mod notify;
pub mod streak;
mod sync;

pub use bucket::{bucketize, DayBuckets};
pub use level::{level_for, LevelProgress};
pub use milestone::{Announcement, Badge, NextBadge, BADGE_LADDER};
pub use notify::TracingNotifier;
pub use streak::StreakStats;
pub use sync::{SyncEngine, SyncReport};

//! Row types shared across the sync engine.

use serde::Serialize;
use sqlx::FromRow;

/// An active user-to-platform-account binding.
#[derive(Debug, Clone, FromRow)]
pub struct BindingRow {
    pub platform_id: i64,
    pub platform_user_id: String,
}

/// Derived cross-platform library summary, one row per user.
///
/// `total_games_owned` counts ownership rows, so a title owned on two
/// platforms contributes twice; `games_played` deduplicates by canonical
/// game id. Playtime sums across platforms.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct LibrarySummary {
    pub user_id: i64,
    pub total_games_owned: i64,
    pub games_played: i64,
    pub total_playtime_minutes: i64,
    pub total_achievements: i64,
    pub unlocked_achievements: i64,
    pub recently_played_count: i64,
    pub recent_playtime_minutes: i64,
}

//! Cross-platform library aggregation.
//!
//! The summary row is a full recompute from base tables on every call,
//! never an incremental adjustment, so manual edits to ownership or
//! unlock rows are reflected the next time it runs.

use crate::db::Db;
use crate::model::LibrarySummary;
use crate::sync::achievements::count_unlocked;
use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::{debug, instrument};

const RECENT_WINDOW_DAYS: i64 = 30;

/// Recompute and persist one user's cross-platform summary.
#[instrument(skip(db))]
pub async fn recompute_library(db: &Db, user_id: i64) -> Result<LibrarySummary> {
    let recent_cutoff = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);

    // Ownership rows reachable through the user's active bindings. The
    // same canonical game on two platforms contributes two owned rows;
    // the played count deduplicates by canonical id.
    let row = sqlx::query(
        "SELECT \
           COUNT(*) AS total_games_owned, \
           COUNT(DISTINCT l.game_id) AS games_played, \
           COALESCE(SUM(l.playtime_minutes), 0) AS total_playtime_minutes, \
           COUNT(DISTINCT CASE WHEN l.last_played >= $2 THEN l.game_id END) \
             AS recently_played_count, \
           COALESCE(SUM(CASE WHEN l.last_played >= $2 THEN l.playtime_minutes ELSE 0 END), 0) \
             AS recent_playtime_minutes \
         FROM user_platform_bindings b \
         JOIN user_platform_library l \
           ON l.platform_user_id = b.platform_user_id AND l.platform_id = b.platform_id \
         WHERE b.user_id = $1 AND b.bound = 1",
    )
    .bind(user_id)
    .bind(recent_cutoff)
    .fetch_one(&db.pool)
    .await?;

    // Achievement figures come from unlock state, not from the per-row
    // platform self-reported counters, which may be stale.
    let total_achievements: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT achievement_id) FROM user_achievements WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&db.pool)
    .await?;
    let unlocked_achievements = count_unlocked(db, user_id, None, None).await?;

    let summary = LibrarySummary {
        user_id,
        total_games_owned: row.get("total_games_owned"),
        games_played: row.get("games_played"),
        total_playtime_minutes: row.get("total_playtime_minutes"),
        total_achievements,
        unlocked_achievements,
        recently_played_count: row.get("recently_played_count"),
        recent_playtime_minutes: row.get("recent_playtime_minutes"),
    };

    sqlx::query(
        "INSERT INTO user_game_library \
         (user_id, total_games_owned, games_played, total_playtime_minutes, \
          total_achievements, unlocked_achievements, recently_played_count, \
          recent_playtime_minutes, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (user_id) DO UPDATE SET \
           total_games_owned = excluded.total_games_owned, \
           games_played = excluded.games_played, \
           total_playtime_minutes = excluded.total_playtime_minutes, \
           total_achievements = excluded.total_achievements, \
           unlocked_achievements = excluded.unlocked_achievements, \
           recently_played_count = excluded.recently_played_count, \
           recent_playtime_minutes = excluded.recent_playtime_minutes, \
           updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(summary.total_games_owned)
    .bind(summary.games_played)
    .bind(summary.total_playtime_minutes)
    .bind(summary.total_achievements)
    .bind(summary.unlocked_achievements)
    .bind(summary.recently_played_count)
    .bind(summary.recent_playtime_minutes)
    .bind(Utc::now())
    .execute(&db.pool)
    .await?;

    debug!(
        user_id,
        games = summary.total_games_owned,
        unlocked = summary.unlocked_achievements,
        "library summary recomputed"
    );
    Ok(summary)
}

/// Load the stored summary row, if one has been computed.
pub async fn load_summary(db: &Db, user_id: i64) -> Result<Option<LibrarySummary>> {
    let summary = sqlx::query_as::<_, LibrarySummary>(
        "SELECT user_id, total_games_owned, games_played, total_playtime_minutes, \
         total_achievements, unlocked_achievements, recently_played_count, \
         recent_playtime_minutes \
         FROM user_game_library WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(summary)
}

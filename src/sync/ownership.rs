//! Ownership and account-state writes.
//!
//! `game_platforms` is first-write-wins: the platform-native id recorded
//! for a canonical game is never overwritten by later syncs. Everything
//! else here is last-write-wins snapshot state.

use crate::db::Db;
use crate::model::BindingRow;
use crate::platform::{OwnedGame, PlatformProfile};
use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use tracing::{debug, instrument};

/// Record the platform-native id for a canonical game. A mapping that
/// already exists is left untouched, even if the native id differs.
pub async fn ensure_mapping(
    db: &Db,
    game_id: i64,
    platform_id: i64,
    platform_game_id: &str,
    store_url: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO game_platforms (game_id, platform_id, platform_game_id, store_url) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (game_id, platform_id) DO NOTHING",
    )
    .bind(game_id)
    .bind(platform_id)
    .bind(platform_game_id)
    .bind(store_url)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Canonical game currently mapped to a platform-native id, if any.
pub async fn lookup_game_by_native(
    db: &Db,
    platform_id: i64,
    platform_game_id: &str,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        "SELECT game_id FROM game_platforms WHERE platform_id = $1 AND platform_game_id = $2",
    )
    .bind(platform_id)
    .bind(platform_game_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row.map(|r| r.get("game_id")))
}

/// Overwrite the ownership fact for one (account, platform, game) with the
/// snapshot's current values.
pub async fn upsert_ownership(
    db: &Db,
    platform_user_id: &str,
    platform_id: i64,
    game_id: i64,
    game: &OwnedGame,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_platform_library \
         (platform_user_id, platform_id, game_id, playtime_minutes, last_played, \
          achievements_total, achievements_unlocked) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (platform_user_id, platform_id, game_id) DO UPDATE SET \
           playtime_minutes = excluded.playtime_minutes, \
           last_played = excluded.last_played, \
           achievements_total = excluded.achievements_total, \
           achievements_unlocked = excluded.achievements_unlocked",
    )
    .bind(platform_user_id)
    .bind(platform_id)
    .bind(game_id)
    .bind(game.playtime_minutes)
    .bind(game.last_played)
    .bind(game.achievements_total)
    .bind(game.achievements_unlocked)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Overwrite the account profile snapshot for one platform account.
pub async fn upsert_player_profile(
    db: &Db,
    platform_user_id: &str,
    platform_id: i64,
    profile: &PlatformProfile,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO player_platforms \
         (platform_user_id, platform_id, profile_name, profile_url, avatar_url, \
          country, account_created) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (platform_user_id, platform_id) DO UPDATE SET \
           profile_name = excluded.profile_name, \
           profile_url = excluded.profile_url, \
           avatar_url = excluded.avatar_url, \
           country = excluded.country, \
           account_created = excluded.account_created",
    )
    .bind(platform_user_id)
    .bind(platform_id)
    .bind(&profile.display_name)
    .bind(&profile.profile_url)
    .bind(profile.avatar_url.as_deref())
    .bind(profile.country.as_deref())
    .bind(profile.account_created)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Bind a user to a platform account. Re-binding replaces the account id
/// and refreshes `bound_at`.
#[instrument(skip(db))]
pub async fn ensure_binding(
    db: &Db,
    user_id: i64,
    platform_id: i64,
    platform_user_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_platform_bindings \
         (user_id, platform_id, platform_user_id, bound, bound_at) \
         VALUES ($1, $2, $3, 1, $4) \
         ON CONFLICT (user_id, platform_id) DO UPDATE SET \
           platform_user_id = excluded.platform_user_id, \
           bound = 1, \
           bound_at = excluded.bound_at",
    )
    .bind(user_id)
    .bind(platform_id)
    .bind(platform_user_id)
    .bind(Utc::now())
    .execute(&db.pool)
    .await?;
    debug!(user_id, platform_id, "platform binding ensured");
    Ok(())
}

/// Active bindings for a user, the set of accounts a sync walks.
pub async fn active_bindings(db: &Db, user_id: i64) -> Result<Vec<BindingRow>> {
    let rows = sqlx::query_as::<_, BindingRow>(
        "SELECT platform_id, platform_user_id FROM user_platform_bindings \
         WHERE user_id = $1 AND bound = 1 ORDER BY platform_id",
    )
    .bind(user_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

/// Stamp a binding's last successful sync time.
pub async fn mark_synced(db: &Db, user_id: i64, platform_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE user_platform_bindings SET last_sync_at = $1 \
         WHERE user_id = $2 AND platform_id = $3",
    )
    .bind(Utc::now())
    .bind(user_id)
    .bind(platform_id)
    .execute(&db.pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::sync::identity::ensure_game;

    fn owned(playtime: i64) -> OwnedGame {
        OwnedGame {
            name: "Portal 2".to_string(),
            platform_game_id: "620".to_string(),
            store_url: Some("https://store.steampowered.com/app/620".to_string()),
            playtime_minutes: playtime,
            last_played: None,
            achievements_total: Some(51),
            achievements_unlocked: Some(3),
            detail: None,
        }
    }

    #[tokio::test]
    async fn mapping_is_first_write_wins() {
        let db = Db::connect_memory().await.unwrap();
        let game_id = ensure_game(&db, "Portal 2", None).await.unwrap();
        ensure_mapping(&db, game_id, 1, "620", None).await.unwrap();
        ensure_mapping(&db, game_id, 1, "999", None).await.unwrap();
        assert_eq!(
            lookup_game_by_native(&db, 1, "620").await.unwrap(),
            Some(game_id)
        );
        assert_eq!(lookup_game_by_native(&db, 1, "999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ownership_is_last_write_wins() {
        let db = Db::connect_memory().await.unwrap();
        let game_id = ensure_game(&db, "Portal 2", None).await.unwrap();
        upsert_ownership(&db, "acct", 1, game_id, &owned(10))
            .await
            .unwrap();
        upsert_ownership(&db, "acct", 1, game_id, &owned(25))
            .await
            .unwrap();
        let (count, playtime): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), MAX(playtime_minutes) FROM user_platform_library \
             WHERE platform_user_id = 'acct'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(playtime, 25);
    }

    #[tokio::test]
    async fn rebinding_replaces_the_account_id() {
        let db = Db::connect_memory().await.unwrap();
        sqlx::query("INSERT INTO users (username) VALUES ('alice')")
            .execute(&db.pool)
            .await
            .unwrap();
        ensure_binding(&db, 1, 1, "old-account").await.unwrap();
        ensure_binding(&db, 1, 1, "new-account").await.unwrap();
        let bindings = active_bindings(&db, 1).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].platform_user_id, "new-account");
    }
}

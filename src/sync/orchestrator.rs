//! Per-user sync driver.
//!
//! Walks every bound platform account, pulls its snapshot through the
//! registered client, and runs the per-game pipeline: identity, mapping,
//! ownership, achievements. A failing platform or game never takes down
//! the rest of the sync; the library summary is recomputed at the end
//! regardless of partial failures.

use crate::db::Db;
use crate::error::SyncError;
use crate::model::BindingRow;
use crate::platform::{OwnedGame, PlatformClient, PlatformRegistry};
use crate::sync::achievements::{count_unlocked, reconcile_achievements};
use crate::sync::aggregate::recompute_library;
use crate::sync::identity::ensure_game;
use crate::sync::ownership::{
    active_bindings, ensure_mapping, mark_synced, upsert_ownership, upsert_player_profile,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Narrowing filters for a sync run. `platform` restricts the run to one
/// bound platform; `game` restricts it to titles whose platform-native id
/// or exact canonical name matches.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub platform: Option<i64>,
    pub game: Option<String>,
}

impl SyncOptions {
    fn wants_game(&self, game: &OwnedGame) -> bool {
        match &self.game {
            None => true,
            Some(filter) => game.platform_game_id == *filter || game.name == *filter,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub synced_games: i64,
    pub new_unlocks: i64,
    pub total_unlocked: i64,
    pub sync_time: DateTime<Utc>,
}

/// Sync one user across their bound platforms.
///
/// Fails loudly only for an unknown user or an explicitly requested
/// platform with no binding; everything else degrades per platform or
/// per game.
#[instrument(skip(db, registry))]
pub async fn sync_user(
    db: &Db,
    registry: &PlatformRegistry,
    user_id: i64,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let user = sqlx::query("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&db.pool)
        .await?;
    if user.is_none() {
        return Err(SyncError::UnknownUser(user_id).into());
    }

    let mut bindings = active_bindings(db, user_id).await?;
    if let Some(platform_id) = options.platform {
        bindings.retain(|b| b.platform_id == platform_id);
        if bindings.is_empty() {
            return Err(SyncError::UnknownPlatform(platform_id).into());
        }
    }

    let mut synced_games = 0i64;
    let mut new_unlocks = 0i64;
    for binding in &bindings {
        let Some(client) = registry.get(binding.platform_id) else {
            warn!(
                platform_id = binding.platform_id,
                "no client registered for bound platform; skipping"
            );
            continue;
        };
        match sync_platform(db, client, user_id, binding, options).await {
            Ok(outcome) => {
                synced_games += outcome.synced_games;
                new_unlocks += outcome.new_unlocks;
                mark_synced(db, user_id, binding.platform_id).await?;
            }
            Err(e) => {
                // Platform isolation: one failing platform must not stop
                // the others.
                warn!(
                    platform_id = binding.platform_id,
                    error = %e,
                    "platform sync failed; continuing with remaining platforms"
                );
            }
        }
    }

    let summary = recompute_library(db, user_id).await?;
    let report = SyncReport {
        synced_games,
        new_unlocks,
        total_unlocked: summary.unlocked_achievements,
        sync_time: Utc::now(),
    };
    info!(
        user_id,
        synced_games = report.synced_games,
        new_unlocks = report.new_unlocks,
        total_unlocked = report.total_unlocked,
        "sync complete"
    );
    Ok(report)
}

struct PlatformOutcome {
    synced_games: i64,
    new_unlocks: i64,
}

async fn sync_platform(
    db: &Db,
    client: &Arc<dyn PlatformClient>,
    user_id: i64,
    binding: &BindingRow,
    options: &SyncOptions,
) -> Result<PlatformOutcome> {
    let platform_id = binding.platform_id;
    let account = binding.platform_user_id.as_str();

    let pre_unlocked = count_unlocked(db, user_id, Some(platform_id), None).await?;

    let profile = client.fetch_profile(account).await?;
    upsert_player_profile(db, account, platform_id, &profile).await?;

    let games = client.fetch_owned_games(account).await?;
    info!(platform_id, games = games.len(), "platform snapshot fetched");

    let mut synced_games = 0i64;
    let mut new_unlocks = 0i64;
    for game in &games {
        if !options.wants_game(game) {
            continue;
        }
        let game_id = ensure_game(db, &game.name, game.detail.as_ref()).await?;
        ensure_mapping(db, game_id, platform_id, &game.platform_game_id, game.store_url.as_deref())
            .await?;
        upsert_ownership(db, account, platform_id, game_id, game).await?;

        match client.fetch_achievements(account, &game.platform_game_id).await {
            Ok(entries) => {
                new_unlocks +=
                    reconcile_achievements(db, user_id, platform_id, game_id, &entries).await?;
            }
            Err(e) if e.is_game_scoped() => {
                // Ownership already landed; only this title's achievements
                // are missing.
                warn!(
                    platform_id,
                    platform_game_id = %game.platform_game_id,
                    error = %e,
                    "achievement fetch failed for one game; skipping its achievements"
                );
            }
            Err(e) => return Err(e.into()),
        }
        synced_games += 1;
    }

    let post_unlocked = count_unlocked(db, user_id, Some(platform_id), None).await?;
    Ok(PlatformOutcome {
        synced_games,
        new_unlocks: corrected_new_unlocks(new_unlocks, pre_unlocked, post_unlocked),
    })
}

/// Undercount correction: when the batch diff saw nothing but the
/// platform-scoped unlocked count still grew, the growth is the
/// trustworthy number.
fn corrected_new_unlocks(batch_sum: i64, pre_unlocked: i64, post_unlocked: i64) -> i64 {
    if batch_sum == 0 && post_unlocked > pre_unlocked {
        post_unlocked - pre_unlocked
    } else {
        batch_sum
    }
}

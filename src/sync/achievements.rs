//! Achievement reconciliation.
//!
//! Two passes over a snapshot batch. The definition pass pins every entry
//! to an achievement definition, creating missing ones in a single batched
//! insert (descriptive fields are write-once). The state pass diffs unlock
//! state against what is stored, counts lock-to-unlock transitions, and
//! overwrites every row with the snapshot's values in one batched upsert.

use crate::db::Db;
use crate::platform::AchievementEntry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, instrument};

async fn load_definitions(db: &Db, game_id: i64) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT id, name FROM achievements WHERE game_id = $1")
        .bind(game_id)
        .fetch_all(&db.pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("name"), r.get::<i64, _>("id")))
        .collect())
}

/// Reconcile one game's snapshot batch for one user on one platform.
/// Returns the number of achievements that transitioned to unlocked in
/// this run. Entries without a stable name are skipped; they cannot be
/// pinned to a definition.
#[instrument(skip(db, entries), fields(batch = entries.len()))]
pub async fn reconcile_achievements(
    db: &Db,
    user_id: i64,
    platform_id: i64,
    game_id: i64,
    entries: &[AchievementEntry],
) -> Result<i64> {
    // Last occurrence wins when a snapshot repeats a name.
    let mut order: Vec<&str> = Vec::with_capacity(entries.len());
    let mut by_name: HashMap<&str, &AchievementEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        let Some(name) = entry.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
        else {
            debug!(game_id, "achievement entry without a stable name; skipping");
            continue;
        };
        if by_name.insert(name, entry).is_none() {
            order.push(name);
        }
    }
    if order.is_empty() {
        return Ok(0);
    }

    // Definition pass.
    let mut definitions = load_definitions(db, game_id).await?;
    let missing: Vec<&str> = order
        .iter()
        .copied()
        .filter(|name| !definitions.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO achievements \
             (game_id, name, display_name, description, hidden, icon_unlocked, icon_locked) ",
        );
        qb.push_values(missing.iter(), |mut b, name| {
            let entry = by_name[name];
            b.push_bind(game_id)
                .push_bind(*name)
                .push_bind(entry.display_name.as_deref().unwrap_or(name))
                .push_bind(entry.description.as_deref())
                .push_bind(entry.hidden)
                .push_bind(entry.icon_unlocked.as_deref().unwrap_or(""))
                .push_bind(entry.icon_locked.as_deref().unwrap_or(""));
        });
        qb.push(" ON CONFLICT (game_id, name) DO NOTHING");
        qb.build().execute(&db.pool).await?;
        // Pick up the assigned ids.
        definitions = load_definitions(db, game_id).await?;
    }

    // State pass.
    let existing: HashMap<i64, bool> = sqlx::query(
        "SELECT ua.achievement_id, ua.unlocked FROM user_achievements ua \
         JOIN achievements a ON a.id = ua.achievement_id \
         WHERE ua.user_id = $1 AND ua.platform_id = $2 AND a.game_id = $3",
    )
    .bind(user_id)
    .bind(platform_id)
    .bind(game_id)
    .fetch_all(&db.pool)
    .await?
    .into_iter()
    .map(|r| (r.get::<i64, _>("achievement_id"), r.get::<bool, _>("unlocked")))
    .collect();

    let mut new_unlocks = 0i64;
    let mut writes: Vec<(i64, bool, Option<DateTime<Utc>>)> = Vec::with_capacity(order.len());
    for name in &order {
        let entry = by_name[name];
        let Some(&achievement_id) = definitions.get(*name) else {
            continue;
        };
        match existing.get(&achievement_id) {
            Some(&was_unlocked) => {
                if entry.achieved && !was_unlocked {
                    new_unlocks += 1;
                }
                // Relock overwrites without adjusting the counter.
            }
            None => {
                if entry.achieved {
                    new_unlocks += 1;
                }
            }
        }
        writes.push((achievement_id, entry.achieved, entry.unlock_time()));
    }

    if !writes.is_empty() {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO user_achievements \
             (user_id, achievement_id, platform_id, unlocked, unlock_time) ",
        );
        qb.push_values(writes.iter(), |mut b, (achievement_id, unlocked, unlock_time)| {
            b.push_bind(user_id)
                .push_bind(*achievement_id)
                .push_bind(platform_id)
                .push_bind(*unlocked)
                .push_bind(*unlock_time);
        });
        qb.push(
            " ON CONFLICT (user_id, achievement_id, platform_id) DO UPDATE SET \
             unlocked = excluded.unlocked, unlock_time = excluded.unlock_time",
        );
        qb.build().execute(&db.pool).await?;
    }

    if new_unlocks > 0 {
        debug!(user_id, platform_id, game_id, new_unlocks, "recorded new unlocks");
    }
    Ok(new_unlocks)
}

/// Count a user's unlocked achievements, optionally scoped to a platform
/// and/or a canonical game.
pub async fn count_unlocked(
    db: &Db,
    user_id: i64,
    platform_id: Option<i64>,
    game_id: Option<i64>,
) -> Result<i64> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(*) AS n FROM user_achievements ua \
         JOIN achievements a ON a.id = ua.achievement_id \
         WHERE ua.unlocked = 1 AND ua.user_id = ",
    );
    qb.push_bind(user_id);
    if let Some(platform_id) = platform_id {
        qb.push(" AND ua.platform_id = ");
        qb.push_bind(platform_id);
    }
    if let Some(game_id) = game_id {
        qb.push(" AND a.game_id = ");
        qb.push_bind(game_id);
    }
    let row = qb.build().fetch_one(&db.pool).await?;
    Ok(row.get("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::sync::identity::ensure_game;

    fn entry(name: &str, achieved: bool, ts: Option<i64>) -> AchievementEntry {
        AchievementEntry {
            name: Some(name.to_string()),
            display_name: Some(name.to_string()),
            achieved,
            unlock_timestamp: ts,
            ..Default::default()
        }
    }

    async fn seeded() -> (Db, i64) {
        let db = Db::connect_memory().await.unwrap();
        sqlx::query("INSERT INTO users (username) VALUES ('alice')")
            .execute(&db.pool)
            .await
            .unwrap();
        let game_id = ensure_game(&db, "Portal 2", None).await.unwrap();
        (db, game_id)
    }

    #[tokio::test]
    async fn first_snapshot_counts_every_unlocked_entry() {
        let (db, game_id) = seeded().await;
        let batch = vec![
            entry("ACH_A", true, Some(1000)),
            entry("ACH_B", false, None),
            entry("ACH_C", true, Some(2000)),
        ];
        let new = reconcile_achievements(&db, 1, 1, game_id, &batch)
            .await
            .unwrap();
        assert_eq!(new, 2);
        assert_eq!(count_unlocked(&db, 1, None, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn repeat_snapshot_counts_only_the_transition() {
        let (db, game_id) = seeded().await;
        let first = vec![entry("ACH_A", true, Some(1000)), entry("ACH_B", false, None)];
        reconcile_achievements(&db, 1, 1, game_id, &first)
            .await
            .unwrap();
        // Same snapshot plus one newly earned achievement.
        let second = vec![entry("ACH_A", true, Some(1000)), entry("ACH_B", true, Some(3000))];
        let new = reconcile_achievements(&db, 1, 1, game_id, &second)
            .await
            .unwrap();
        assert_eq!(new, 1);
    }

    #[tokio::test]
    async fn identical_snapshot_reports_zero_new_unlocks() {
        let (db, game_id) = seeded().await;
        let batch = vec![entry("ACH_A", true, Some(1000))];
        reconcile_achievements(&db, 1, 1, game_id, &batch)
            .await
            .unwrap();
        let new = reconcile_achievements(&db, 1, 1, game_id, &batch)
            .await
            .unwrap();
        assert_eq!(new, 0);
        assert_eq!(count_unlocked(&db, 1, None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn relock_overwrites_without_counter_adjustment() {
        let (db, game_id) = seeded().await;
        reconcile_achievements(&db, 1, 1, game_id, &[entry("ACH_A", true, Some(1000))])
            .await
            .unwrap();
        let relock = reconcile_achievements(&db, 1, 1, game_id, &[entry("ACH_A", false, None)])
            .await
            .unwrap();
        assert_eq!(relock, 0);
        assert_eq!(count_unlocked(&db, 1, None, None).await.unwrap(), 0);
        // Earning it again counts as a fresh transition.
        let again = reconcile_achievements(&db, 1, 1, game_id, &[entry("ACH_A", true, Some(9000))])
            .await
            .unwrap();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn definitions_are_write_once() {
        let (db, game_id) = seeded().await;
        let mut first = entry("ACH_A", false, None);
        first.description = Some("original text".to_string());
        reconcile_achievements(&db, 1, 1, game_id, &[first])
            .await
            .unwrap();
        let mut second = entry("ACH_A", true, Some(1000));
        second.description = Some("rewritten text".to_string());
        reconcile_achievements(&db, 1, 1, game_id, &[second])
            .await
            .unwrap();
        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM achievements WHERE name = 'ACH_A'")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(description.as_deref(), Some("original text"));
    }

    #[tokio::test]
    async fn nameless_entries_do_not_abort_the_batch() {
        let (db, game_id) = seeded().await;
        let batch = vec![
            AchievementEntry {
                achieved: true,
                unlock_timestamp: Some(500),
                ..Default::default()
            },
            entry("ACH_A", true, Some(1000)),
        ];
        let new = reconcile_achievements(&db, 1, 1, game_id, &batch)
            .await
            .unwrap();
        assert_eq!(new, 1);
    }

    #[tokio::test]
    async fn definitions_are_shared_but_unlocks_are_per_platform() {
        let (db, game_id) = seeded().await;
        reconcile_achievements(&db, 1, 1, game_id, &[entry("ACH_A", true, Some(1000))])
            .await
            .unwrap();
        reconcile_achievements(&db, 1, 5, game_id, &[entry("ACH_A", false, None)])
            .await
            .unwrap();
        let definitions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM achievements")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(definitions, 1);
        assert_eq!(count_unlocked(&db, 1, Some(1), None).await.unwrap(), 1);
        assert_eq!(count_unlocked(&db, 1, Some(5), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scoped_counts_filter_by_platform_and_game() {
        let (db, game_id) = seeded().await;
        let other = ensure_game(&db, "Half-Life", None).await.unwrap();
        reconcile_achievements(&db, 1, 1, game_id, &[entry("ACH_A", true, Some(1000))])
            .await
            .unwrap();
        reconcile_achievements(&db, 1, 1, other, &[entry("ACH_X", true, Some(2000))])
            .await
            .unwrap();
        assert_eq!(count_unlocked(&db, 1, None, None).await.unwrap(), 2);
        assert_eq!(
            count_unlocked(&db, 1, Some(1), Some(game_id)).await.unwrap(),
            1
        );
        assert_eq!(count_unlocked(&db, 1, Some(5), None).await.unwrap(), 0);
    }
}

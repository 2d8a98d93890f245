//! Canonical game identity. The exact trimmed name is the sole dedup key;
//! the first platform to report a name creates the canonical row and its
//! descriptive metadata, later platforms attach to it untouched.

use crate::db::Db;
use crate::platform::GameDetail;
use anyhow::{bail, Result};
use sqlx::Row;
use tracing::{debug, instrument, warn};

const MAX_COMPANY_NAME_LEN: usize = 20;

pub(crate) fn clamp_to_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out = String::with_capacity(max_chars.min(input.len()));
    let mut count = 0;
    for ch in input.chars() {
        if count == max_chars {
            break;
        }
        out.push(ch);
        count += 1;
    }
    out
}

fn normalize_company_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let char_len = trimmed.chars().count();
    if char_len > MAX_COMPANY_NAME_LEN {
        warn!(
            original_len = char_len,
            max_len = MAX_COMPANY_NAME_LEN,
            "company name exceeded column length; truncating"
        );
    }
    Some(clamp_to_chars(trimmed, MAX_COMPANY_NAME_LEN))
}

/// Resolve a reported title to a canonical game id, creating the row on
/// first sight. Matching is exact on the name as reported; names differing
/// in case or whitespace create distinct games. Existing games are never
/// updated here.
#[instrument(skip(db, detail))]
pub async fn ensure_game(db: &Db, name: &str, detail: Option<&GameDetail>) -> Result<i64> {
    if name.trim().is_empty() {
        bail!("game name is empty");
    }

    if let Some(row) = sqlx::query("SELECT id FROM games WHERE name = $1")
        .bind(name)
        .fetch_optional(&db.pool)
        .await?
    {
        let game_id: i64 = row.get("id");
        debug!(game_id, "game exists via name");
        return Ok(game_id);
    }

    let empty = GameDetail::default();
    let d = detail.unwrap_or(&empty);
    let inserted = sqlx::query(
        "INSERT INTO games (name, is_free, required_age, short_description, \
         detailed_description, header_image, windows, mac, linux, release_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
    )
    .bind(name)
    .bind(d.is_free)
    .bind(d.required_age)
    .bind(d.short_description.as_deref())
    .bind(d.detailed_description.as_deref())
    .bind(d.header_image.as_deref())
    .bind(d.windows)
    .bind(d.mac)
    .bind(d.linux)
    .bind(d.release_date.as_deref())
    .fetch_one(&db.pool)
    .await?;
    let game_id: i64 = inserted.get("id");
    debug!(game_id, "game inserted");

    for developer in &d.developers {
        if let Some(company) = normalize_company_name(developer) {
            let developer_id = ensure_developer(db, &company).await?;
            sqlx::query(
                "INSERT INTO game_developers (game_id, developer_id) VALUES ($1, $2) \
                 ON CONFLICT (game_id, developer_id) DO NOTHING",
            )
            .bind(game_id)
            .bind(developer_id)
            .execute(&db.pool)
            .await?;
        }
    }
    for publisher in &d.publishers {
        if let Some(company) = normalize_company_name(publisher) {
            let publisher_id = ensure_publisher(db, &company).await?;
            sqlx::query(
                "INSERT INTO game_publishers (game_id, publisher_id) VALUES ($1, $2) \
                 ON CONFLICT (game_id, publisher_id) DO NOTHING",
            )
            .bind(game_id)
            .bind(publisher_id)
            .execute(&db.pool)
            .await?;
        }
    }

    Ok(game_id)
}

pub async fn ensure_developer(db: &Db, name: &str) -> Result<i64> {
    if let Some(row) = sqlx::query("SELECT id FROM developers WHERE name = $1")
        .bind(name)
        .fetch_optional(&db.pool)
        .await?
    {
        return Ok(row.get("id"));
    }
    let inserted = sqlx::query("INSERT INTO developers (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(&db.pool)
        .await?;
    Ok(inserted.get("id"))
}

pub async fn ensure_publisher(db: &Db, name: &str) -> Result<i64> {
    if let Some(row) = sqlx::query("SELECT id FROM publishers WHERE name = $1")
        .bind(name)
        .fetch_optional(&db.pool)
        .await?
    {
        return Ok(row.get("id"));
    }
    let inserted = sqlx::query("INSERT INTO publishers (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(&db.pool)
        .await?;
    Ok(inserted.get("id"))
}

//! GOG Galaxy client.
//!
//! Env: GOG_ACCESS_TOKEN (required), GOG_API_BASE / GOG_GAMEPLAY_BASE
//! (overrides). Library rows come from the account endpoint; per-game
//! achievements from the gameplay endpoint's `items` list.

use crate::error::PlatformError;
use crate::platform::{
    AchievementEntry, OwnedGame, PlatformClient, PlatformKind, PlatformProfile,
};
use crate::util::env::env_opt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://embed.gog.com";
const DEFAULT_GAMEPLAY_BASE: &str = "https://gameplay.gog.com";

pub struct GogClient {
    client: Client,
    access_token: String,
    api_base: String,
    gameplay_base: String,
}

impl GogClient {
    pub fn new(access_token: String) -> Self {
        Self {
            client: Client::new(),
            access_token,
            api_base: DEFAULT_API_BASE.to_string(),
            gameplay_base: DEFAULT_GAMEPLAY_BASE.to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let access_token = env_opt("GOG_ACCESS_TOKEN")?;
        let mut client = Self::new(access_token);
        if let Some(base) = env_opt("GOG_API_BASE") {
            client.api_base = base;
        }
        if let Some(base) = env_opt("GOG_GAMEPLAY_BASE") {
            client.gameplay_base = base;
        }
        Some(client)
    }

    async fn get_json(&self, url: &str) -> Result<Value, PlatformError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth(
                "gog access token rejected".to_string(),
            ));
        }
        Ok(resp.error_for_status()?.json().await?)
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn owned_games_from(body: &Value) -> Vec<OwnedGame> {
    let games = body
        .get("games")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = Vec::with_capacity(games.len());
    for game in games {
        let game_id = game
            .get("gameId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| game.get("gameId").and_then(Value::as_i64).map(|id| id.to_string()));
        let Some(game_id) = game_id else {
            debug!("gog game without gameId; skipping");
            continue;
        };
        let details = game.get("details");
        let Some(name) = details.and_then(|d| str_field(d, "title")) else {
            debug!(%game_id, "gog game without title; skipping");
            continue;
        };
        out.push(OwnedGame {
            name,
            platform_game_id: game_id.clone(),
            store_url: details.and_then(|d| str_field(d, "url")),
            playtime_minutes: game
                .get("playTimeMinutes")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            last_played: str_field(game, "lastPlayed")
                .as_deref()
                .and_then(parse_rfc3339),
            achievements_total: None,
            achievements_unlocked: None,
            detail: None,
        });
    }
    out
}

fn achievements_from(body: &Value) -> Vec<AchievementEntry> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    items
        .iter()
        .map(|item| {
            let unlock_timestamp = str_field(item, "date_unlocked")
                .as_deref()
                .and_then(parse_rfc3339)
                .map(|dt| dt.timestamp());
            AchievementEntry {
                name: str_field(item, "achievement_key"),
                display_name: str_field(item, "name"),
                description: str_field(item, "description"),
                hidden: !item
                    .get("visible")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                icon_unlocked: str_field(item, "image_url_unlocked"),
                icon_locked: str_field(item, "image_url_locked"),
                // GOG signals an unlock by a non-null date only.
                achieved: unlock_timestamp.is_some(),
                unlock_timestamp,
            }
        })
        .collect()
}

#[async_trait]
impl PlatformClient for GogClient {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Gog
    }

    async fn fetch_profile(&self, _account_id: &str) -> Result<PlatformProfile, PlatformError> {
        let url = format!("{}/userData.json", self.api_base);
        let body = self.get_json(&url).await?;
        let display_name = str_field(&body, "username")
            .ok_or_else(|| PlatformError::Payload("gog userData has no username".to_string()))?;
        Ok(PlatformProfile {
            profile_url: format!("https://www.gog.com/u/{display_name}"),
            display_name,
            avatar_url: str_field(&body, "avatar"),
            country: str_field(&body, "country"),
            account_created: None,
        })
    }

    async fn fetch_owned_games(&self, account_id: &str) -> Result<Vec<OwnedGame>, PlatformError> {
        let url = format!(
            "{}/account/gameDetails/{}.json",
            self.api_base,
            urlencoding::encode(account_id)
        );
        let body = self.get_json(&url).await?;
        Ok(owned_games_from(&body))
    }

    async fn fetch_achievements(
        &self,
        account_id: &str,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementEntry>, PlatformError> {
        let url = format!(
            "{}/clients/{}/users/{}/achievements",
            self.gameplay_base,
            urlencoding::encode(platform_game_id),
            urlencoding::encode(account_id)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth(
                "gog access token rejected".to_string(),
            ));
        }
        if !resp.status().is_success() {
            // Titles with no Galaxy achievement set answer 404 here.
            return Err(PlatformError::Game {
                platform_game_id: platform_game_id.to_string(),
                reason: format!("status {}", resp.status()),
            });
        }
        let body: Value = resp.json().await?;
        Ok(achievements_from(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn game_details_map_to_owned_games() {
        let body = json!({
            "games": [{
                "gameId": 1207658924,
                "playTimeMinutes": 95,
                "lastPlayed": "2024-01-15T20:00:00Z",
                "details": { "title": "The Witcher 3", "url": "/game/the_witcher_3" }
            }, {
                "gameId": "no-title"
            }]
        });
        let games = owned_games_from(&body);
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].platform_game_id, "1207658924");
        assert_eq!(games[0].name, "The Witcher 3");
        assert_eq!(games[0].playtime_minutes, 95);
        assert!(games[0].last_played.is_some());
    }

    #[test]
    fn unlock_date_alone_marks_an_achievement_earned() {
        let body = json!({
            "items": [{
                "achievement_key": "witcher_contract",
                "name": "Contract Complete",
                "description": "Finish a contract",
                "visible": true,
                "image_url_unlocked": "https://example.com/u.png",
                "image_url_locked": "https://example.com/l.png",
                "date_unlocked": "2024-01-15T20:00:00Z"
            }, {
                "achievement_key": "secret_ending",
                "name": "???",
                "visible": false,
                "date_unlocked": null
            }]
        });
        let entries = achievements_from(&body);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].achieved);
        assert!(entries[0].unlock_timestamp.is_some());
        assert!(!entries[1].achieved);
        assert!(entries[1].hidden);
    }
}

//! Xbox Live client (OpenXBL-style gateway).
//!
//! Env: XBOX_API_KEY (required), XBOX_API_BASE (override). Title history
//! supplies ownership; achievement progress uses `progressState` rather
//! than a numeric flag.

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

const DEFAULT_API_BASE: &str = "https://xbl.io/api/v2";

pub struct XboxClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl XboxClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = env_opt("XBOX_API_KEY")?;
        let mut client = Self::new(api_key);
        if let Some(base) = env_opt("XBOX_API_BASE") {
            client.api_base = base;
        }
        Some(client)
    }

    async fn get_json(&self, url: &str) -> Result<Value, PlatformError> {
        let resp = self
            .client
            .get(url)
            .header("X-Authorization", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth("xbox api key rejected".to_string()));
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
    let titles = body
        .get("titles")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = Vec::with_capacity(titles.len());
    for title in titles {
        let title_id = title
            .get("titleId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| title.get("titleId").and_then(Value::as_i64).map(|id| id.to_string()));
        let Some(title_id) = title_id else {
            debug!("xbox title without titleId; skipping");
            continue;
        };
        let Some(name) = str_field(title, "name") else {
            debug!(%title_id, "xbox title without name; skipping");
            continue;
        };
        let achievement = title.get("achievement");
        let detail = title.get("detail");
        out.push(OwnedGame {
            name,
            platform_game_id: title_id,
            store_url: None,
            playtime_minutes: detail
                .and_then(|d| d.get("minutesPlayed"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            last_played: title
                .get("titleHistory")
                .and_then(|h| h.get("lastTimePlayed"))
                .and_then(Value::as_str)
                .and_then(parse_rfc3339),
            achievements_total: achievement
                .and_then(|a| a.get("totalAchievements"))
                .and_then(Value::as_i64),
            achievements_unlocked: achievement
                .and_then(|a| a.get("currentAchievements"))
                .and_then(Value::as_i64),
            detail: None,
        });
    }
    out
}

fn achievements_from(body: &Value) -> Vec<AchievementEntry> {
    let achievements = body
        .get("achievements")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    achievements
        .iter()
        .map(|ach| {
            let achieved = ach
                .get("progressState")
                .and_then(Value::as_str)
                .map(|state| state.eq_ignore_ascii_case("Achieved"))
                .unwrap_or(false);
            let unlock_timestamp = ach
                .get("progression")
                .and_then(|p| p.get("timeUnlocked"))
                .and_then(Value::as_str)
                .and_then(parse_rfc3339)
                .map(|dt| dt.timestamp())
                // Unachieved entries carry a zeroed sentinel time.
                .filter(|ts| achieved && *ts > 0);
            AchievementEntry {
                name: str_field(ach, "name"),
                display_name: str_field(ach, "name"),
                description: str_field(ach, "description")
                    .or_else(|| str_field(ach, "lockedDescription")),
                hidden: ach
                    .get("isSecret")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                achieved,
                unlock_timestamp,
                ..Default::default()
            }
        })
        .collect()
}

#[async_trait]
impl PlatformClient for XboxClient {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Xbox
    }

    async fn fetch_profile(&self, account_id: &str) -> Result<PlatformProfile, PlatformError> {
        let url = format!(
            "{}/account/{}",
            self.api_base,
            urlencoding::encode(account_id)
        );
        let body = self.get_json(&url).await?;
        let user = body
            .get("profileUsers")
            .and_then(Value::as_array)
            .and_then(|users| users.first())
            .ok_or_else(|| PlatformError::Auth(format!("xbox profile {account_id} not found")))?;
        let mut gamertag = None;
        let mut avatar_url = None;
        if let Some(settings) = user.get("settings").and_then(Value::as_array) {
            for setting in settings {
                match setting.get("id").and_then(Value::as_str) {
                    Some("Gamertag") => gamertag = str_field(setting, "value"),
                    Some("GameDisplayPicRaw") => avatar_url = str_field(setting, "value"),
                    _ => {}
                }
            }
        }
        let display_name = gamertag
            .ok_or_else(|| PlatformError::Payload("xbox profile has no gamertag".to_string()))?;
        Ok(PlatformProfile {
            profile_url: format!("https://www.xbox.com/play/user/{display_name}"),
            display_name,
            avatar_url,
            country: None,
            account_created: None,
        })
    }

    async fn fetch_owned_games(&self, account_id: &str) -> Result<Vec<OwnedGame>, PlatformError> {
        let url = format!(
            "{}/player/titleHistory/{}",
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
            "{}/achievements/player/{}/{}",
            self.api_base,
            urlencoding::encode(account_id),
            urlencoding::encode(platform_game_id)
        );
        let resp = self
            .client
            .get(&url)
            .header("X-Authorization", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth("xbox api key rejected".to_string()));
        }
        if !resp.status().is_success() {
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
    fn title_history_yields_ownership_counters() {
        let body = json!({
            "titles": [{
                "titleId": "1144039928",
                "name": "Halo Infinite",
                "detail": { "minutesPlayed": 340 },
                "achievement": { "currentAchievements": 10, "totalAchievements": 119 },
                "titleHistory": { "lastTimePlayed": "2024-03-09T21:11:00Z" }
            }, {
                "name": "no title id"
            }]
        });
        let games = owned_games_from(&body);
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].platform_game_id, "1144039928");
        assert_eq!(games[0].playtime_minutes, 340);
        assert_eq!(games[0].achievements_total, Some(119));
        assert_eq!(games[0].achievements_unlocked, Some(10));
        assert!(games[0].last_played.is_some());
    }

    #[test]
    fn numeric_title_ids_are_accepted() {
        let body = json!({ "titles": [{ "titleId": 42, "name": "Numeric" }] });
        let games = owned_games_from(&body);
        assert_eq!(games[0].platform_game_id, "42");
    }

    #[test]
    fn progress_state_drives_the_achieved_flag() {
        let body = json!({
            "achievements": [{
                "name": "First Step",
                "description": "Finish the tutorial",
                "progressState": "Achieved",
                "progression": { "timeUnlocked": "2024-03-09T21:11:00Z" }
            }, {
                "name": "Long Haul",
                "lockedDescription": "Keep going",
                "isSecret": true,
                "progressState": "NotStarted",
                "progression": { "timeUnlocked": "0001-01-01T00:00:00Z" }
            }]
        });
        let entries = achievements_from(&body);
        assert!(entries[0].achieved);
        assert!(entries[0].unlock_timestamp.is_some());
        assert!(!entries[1].achieved);
        // The zeroed sentinel must not register as an unlock time.
        assert_eq!(entries[1].unlock_timestamp, None);
        assert!(entries[1].hidden);
        assert_eq!(entries[1].description.as_deref(), Some("Keep going"));
    }
}

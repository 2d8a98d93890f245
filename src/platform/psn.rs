//! PlayStation Network trophy client.
//!
//! Env: PSN_ACCESS_TOKEN (required), PSN_API_BASE (override). Trophies map
//! onto the achievement snapshot; a title's defined/earned trophy sums feed
//! the ownership counters.

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

const DEFAULT_API_BASE: &str = "https://m.np.playstation.com/api";

pub struct PsnClient {
    client: Client,
    access_token: String,
    api_base: String,
}

impl PsnClient {
    pub fn new(access_token: String) -> Self {
        Self {
            client: Client::new(),
            access_token,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let access_token = env_opt("PSN_ACCESS_TOKEN")?;
        let mut client = Self::new(access_token);
        if let Some(base) = env_opt("PSN_API_BASE") {
            client.api_base = base;
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
                "psn access token rejected".to_string(),
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

fn trophy_sum(v: &Value, key: &str) -> i64 {
    v.get(key)
        .and_then(Value::as_object)
        .map(|counts| counts.values().filter_map(Value::as_i64).sum())
        .unwrap_or(0)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn owned_games_from(body: &Value) -> Vec<OwnedGame> {
    let titles = body
        .get("trophyTitles")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = Vec::with_capacity(titles.len());
    for title in titles {
        let Some(np_communication_id) = str_field(title, "npCommunicationId") else {
            debug!("psn trophy title without npCommunicationId; skipping");
            continue;
        };
        let Some(name) = str_field(title, "trophyTitleName") else {
            debug!(%np_communication_id, "psn trophy title without name; skipping");
            continue;
        };
        out.push(OwnedGame {
            name,
            platform_game_id: np_communication_id,
            store_url: None,
            // Trophy titles carry no playtime.
            playtime_minutes: 0,
            last_played: str_field(title, "lastUpdatedDateTime")
                .as_deref()
                .and_then(parse_rfc3339),
            achievements_total: Some(trophy_sum(title, "definedTrophies")),
            achievements_unlocked: Some(trophy_sum(title, "earnedTrophies")),
            detail: None,
        });
    }
    out
}

fn achievements_from(body: &Value) -> Vec<AchievementEntry> {
    let trophies = body
        .get("trophies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    trophies
        .iter()
        .map(|trophy| AchievementEntry {
            name: trophy
                .get("trophyId")
                .and_then(Value::as_i64)
                .map(|id| format!("trophy_{id}")),
            display_name: str_field(trophy, "trophyName"),
            description: str_field(trophy, "trophyDetail"),
            hidden: trophy
                .get("trophyHidden")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            icon_unlocked: str_field(trophy, "trophyIconUrl"),
            achieved: trophy
                .get("earned")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            unlock_timestamp: str_field(trophy, "earnedDateTime")
                .as_deref()
                .and_then(parse_rfc3339)
                .map(|dt| dt.timestamp()),
            ..Default::default()
        })
        .collect()
}

#[async_trait]
impl PlatformClient for PsnClient {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Psn
    }

    async fn fetch_profile(&self, account_id: &str) -> Result<PlatformProfile, PlatformError> {
        let url = format!(
            "{}/userProfile/v1/internal/users/{}/profiles",
            self.api_base,
            urlencoding::encode(account_id)
        );
        let body = self.get_json(&url).await?;
        let display_name = str_field(&body, "onlineId")
            .ok_or_else(|| PlatformError::Payload("psn profile has no onlineId".to_string()))?;
        let avatar_url = body
            .get("avatars")
            .and_then(Value::as_array)
            .and_then(|avatars| avatars.last())
            .and_then(|avatar| str_field(avatar, "url"));
        Ok(PlatformProfile {
            profile_url: format!("https://psnprofiles.com/{display_name}"),
            display_name,
            avatar_url,
            country: None,
            account_created: None,
        })
    }

    async fn fetch_owned_games(&self, account_id: &str) -> Result<Vec<OwnedGame>, PlatformError> {
        let url = format!(
            "{}/trophy/v1/users/{}/trophyTitles?limit=800",
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
            "{}/trophy/v1/users/{}/npCommunicationIds/{}/trophyGroups/all/trophies",
            self.api_base,
            urlencoding::encode(account_id),
            urlencoding::encode(platform_game_id)
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
                "psn access token rejected".to_string(),
            ));
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
    fn trophy_titles_sum_defined_and_earned_counts() {
        let body = json!({
            "trophyTitles": [{
                "npCommunicationId": "NPWR20188_00",
                "trophyTitleName": "Ghost of Tsushima",
                "lastUpdatedDateTime": "2024-05-01T18:30:00Z",
                "definedTrophies": { "bronze": 40, "silver": 9, "gold": 2, "platinum": 1 },
                "earnedTrophies": { "bronze": 12, "silver": 3, "gold": 0, "platinum": 0 }
            }, {
                "trophyTitleName": "orphan without id"
            }]
        });
        let games = owned_games_from(&body);
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].platform_game_id, "NPWR20188_00");
        assert_eq!(games[0].achievements_total, Some(52));
        assert_eq!(games[0].achievements_unlocked, Some(15));
        assert_eq!(games[0].playtime_minutes, 0);
        assert!(games[0].last_played.is_some());
    }

    #[test]
    fn trophies_map_to_achievement_entries() {
        let body = json!({
            "trophies": [{
                "trophyId": 1,
                "trophyName": "A New Wind",
                "trophyDetail": "Complete the prologue",
                "trophyHidden": false,
                "trophyIconUrl": "https://example.com/t1.png",
                "earned": true,
                "earnedDateTime": "2024-05-01T18:30:00Z"
            }, {
                "trophyId": 2,
                "trophyName": "Hidden One",
                "trophyHidden": true,
                "earned": false
            }]
        });
        let entries = achievements_from(&body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("trophy_1"));
        assert!(entries[0].achieved);
        assert!(entries[0].unlock_timestamp.is_some());
        assert!(entries[1].hidden);
        assert!(!entries[1].achieved);
        assert_eq!(entries[1].unlock_timestamp, None);
    }
}

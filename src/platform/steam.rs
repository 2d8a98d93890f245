//! Steam Web API client.
//!
//! Env: STEAM_API_KEY (required), STEAM_API_BASE / STEAM_STORE_BASE
//! (overrides), STEAM_FETCH_DETAILS (default on; per-title appdetails
//! enrichment for canonical-game creation).

use crate::error::PlatformError;
use crate::platform::{
    AchievementEntry, GameDetail, OwnedGame, PlatformClient, PlatformKind, PlatformProfile,
};
use crate::util::env::{env_flag, env_opt};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.steampowered.com";
const DEFAULT_STORE_BASE: &str = "https://store.steampowered.com";

pub struct SteamClient {
    client: Client,
    api_key: String,
    api_base: String,
    store_base: String,
    fetch_details: bool,
}

#[derive(Debug, Deserialize)]
struct OwnedGamesResp {
    response: Option<OwnedGamesBody>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnedGamesBody {
    #[serde(default)]
    games: Vec<RawOwnedGame>,
}

#[derive(Debug, Deserialize)]
struct RawOwnedGame {
    appid: i64,
    name: Option<String>,
    #[serde(default)]
    playtime_forever: i64,
    #[serde(default)]
    rtime_last_played: i64,
}

#[derive(Debug, Deserialize)]
struct PlayerAchievementsResp {
    playerstats: Option<PlayerStats>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerStats {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    achievements: Option<Vec<RawAchievement>>,
}

#[derive(Debug, Deserialize)]
struct RawAchievement {
    apiname: Option<String>,
    #[serde(default)]
    achieved: i64,
    #[serde(default)]
    unlocktime: i64,
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummariesResp {
    response: SummariesBody,
}

#[derive(Debug, Default, Deserialize)]
struct SummariesBody {
    #[serde(default)]
    players: Vec<RawPlayer>,
}

#[derive(Debug, Deserialize)]
struct RawPlayer {
    personaname: Option<String>,
    profileurl: Option<String>,
    avatarfull: Option<String>,
    timecreated: Option<i64>,
    loccountrycode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Default, Deserialize)]
struct AppData {
    #[serde(default)]
    is_free: bool,
    // Steam serves this as either a number or a string.
    required_age: Option<Value>,
    short_description: Option<String>,
    detailed_description: Option<String>,
    header_image: Option<String>,
    platforms: Option<AppPlatforms>,
    release_date: Option<AppReleaseDate>,
    #[serde(default)]
    developers: Vec<String>,
    #[serde(default)]
    publishers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppPlatforms {
    #[serde(default)]
    windows: bool,
    #[serde(default)]
    mac: bool,
    #[serde(default)]
    linux: bool,
}

#[derive(Debug, Deserialize)]
struct AppReleaseDate {
    date: Option<String>,
}

impl SteamClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            store_base: DEFAULT_STORE_BASE.to_string(),
            fetch_details: true,
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = env_opt("STEAM_API_KEY")?;
        let mut client = Self::new(api_key);
        if let Some(base) = env_opt("STEAM_API_BASE") {
            client.api_base = base;
        }
        if let Some(base) = env_opt("STEAM_STORE_BASE") {
            client.store_base = base;
        }
        client.fetch_details = env_flag("STEAM_FETCH_DETAILS", true);
        Some(client)
    }

    /// Best-effort appdetails enrichment; any failure degrades to None.
    async fn app_detail(&self, appid: i64) -> Option<GameDetail> {
        let url = format!("{}/api/appdetails?appids={}", self.store_base, appid);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(appid, error = %e, "steam appdetails request failed");
                return None;
            }
        };
        let body: HashMap<String, AppDetailsWrapper> = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(appid, error = %e, "steam appdetails payload unreadable");
                return None;
            }
        };
        let data = body
            .get(&appid.to_string())
            .filter(|w| w.success)
            .and_then(|w| w.data.as_ref())?;
        Some(detail_from_app_data(data))
    }
}

fn detail_from_app_data(data: &AppData) -> GameDetail {
    let required_age = data.required_age.as_ref().and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });
    let platforms = data.platforms.as_ref();
    GameDetail {
        is_free: data.is_free,
        required_age,
        short_description: data.short_description.clone(),
        detailed_description: data.detailed_description.clone(),
        header_image: data.header_image.clone(),
        windows: platforms.map(|p| p.windows).unwrap_or(false),
        mac: platforms.map(|p| p.mac).unwrap_or(false),
        linux: platforms.map(|p| p.linux).unwrap_or(false),
        release_date: data.release_date.as_ref().and_then(|r| r.date.clone()),
        developers: data.developers.clone(),
        publishers: data.publishers.clone(),
    }
}

fn owned_games_from(resp: OwnedGamesResp, store_base: &str) -> Vec<OwnedGame> {
    let body = resp.response.unwrap_or_default();
    let mut out = Vec::with_capacity(body.games.len());
    for raw in body.games {
        let Some(name) = raw.name.filter(|n| !n.trim().is_empty()) else {
            debug!(appid = raw.appid, "steam game without appinfo name; skipping");
            continue;
        };
        let last_played = Some(raw.rtime_last_played)
            .filter(|ts| *ts > 0)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        out.push(OwnedGame {
            name,
            platform_game_id: raw.appid.to_string(),
            store_url: Some(format!("{}/app/{}", store_base, raw.appid)),
            playtime_minutes: raw.playtime_forever,
            last_played,
            achievements_total: None,
            achievements_unlocked: None,
            detail: None,
        });
    }
    out
}

fn achievements_from(
    resp: PlayerAchievementsResp,
    platform_game_id: &str,
) -> Result<Vec<AchievementEntry>, PlatformError> {
    let stats = resp.playerstats.ok_or_else(|| PlatformError::Game {
        platform_game_id: platform_game_id.to_string(),
        reason: "payload has no playerstats".to_string(),
    })?;
    if stats.success == Some(false) {
        return Err(PlatformError::Game {
            platform_game_id: platform_game_id.to_string(),
            reason: "playerstats reported failure".to_string(),
        });
    }
    let entries = stats
        .achievements
        .unwrap_or_default()
        .into_iter()
        .map(|raw| AchievementEntry {
            display_name: raw.name.clone(),
            description: raw.description,
            achieved: raw.achieved == 1,
            unlock_timestamp: Some(raw.unlocktime).filter(|ts| *ts > 0),
            name: raw.apiname,
            ..Default::default()
        })
        .collect();
    Ok(entries)
}

fn profile_from(resp: SummariesResp, account_id: &str) -> Result<PlatformProfile, PlatformError> {
    let player = resp
        .response
        .players
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::Auth(format!("steam profile {account_id} not found")))?;
    let account_created = player
        .timecreated
        .filter(|ts| *ts > 0)
        .and_then(|ts| DateTime::from_timestamp(ts, 0));
    Ok(PlatformProfile {
        display_name: player.personaname.unwrap_or_default(),
        profile_url: player
            .profileurl
            .unwrap_or_else(|| format!("https://steamcommunity.com/profiles/{account_id}")),
        avatar_url: player.avatarfull,
        country: player.loccountrycode,
        account_created,
    })
}

#[async_trait]
impl PlatformClient for SteamClient {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Steam
    }

    async fn fetch_profile(&self, account_id: &str) -> Result<PlatformProfile, PlatformError> {
        let url = format!(
            "{}/ISteamUser/GetPlayerSummaries/v2/?key={}&steamids={}",
            self.api_base,
            self.api_key,
            urlencoding::encode(account_id)
        );
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth("steam api key rejected".to_string()));
        }
        let body: SummariesResp = resp.error_for_status()?.json().await?;
        profile_from(body, account_id)
    }

    async fn fetch_owned_games(&self, account_id: &str) -> Result<Vec<OwnedGame>, PlatformError> {
        let url = format!(
            "{}/IPlayerService/GetOwnedGames/v1/?key={}&steamid={}&include_appinfo=true&include_played_free_games=true",
            self.api_base,
            self.api_key,
            urlencoding::encode(account_id)
        );
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PlatformError::Auth("steam api key rejected".to_string()));
        }
        let body: OwnedGamesResp = resp.error_for_status()?.json().await?;
        let mut games = owned_games_from(body, &self.store_base);

        if self.fetch_details {
            for game in &mut games {
                if let Ok(appid) = game.platform_game_id.parse::<i64>() {
                    game.detail = self.app_detail(appid).await;
                }
            }
        }
        Ok(games)
    }

    async fn fetch_achievements(
        &self,
        account_id: &str,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementEntry>, PlatformError> {
        let url = format!(
            "{}/ISteamUserStats/GetPlayerAchievements/v1/?key={}&steamid={}&appid={}",
            self.api_base,
            self.api_key,
            urlencoding::encode(account_id),
            urlencoding::encode(platform_game_id)
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            // Steam answers 400 for titles without achievement schemas;
            // that only skips the title.
            return Err(PlatformError::Game {
                platform_game_id: platform_game_id.to_string(),
                reason: format!("status {}", resp.status()),
            });
        }
        let body: PlayerAchievementsResp = resp.json().await?;
        achievements_from(body, platform_game_id)
    }
}

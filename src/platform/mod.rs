//! Platform clients: one conforming implementation per storefront/network,
//! all normalizing to the same snapshot types consumed by the sync engine.

pub mod gog;
pub mod psn;
pub mod steam;
pub mod xbox;

use crate::error::PlatformError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// The platforms this engine ships a client for. Ids match the seeded
/// `platforms` rows and are stable across databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformKind {
    Steam,
    Gog,
    Psn,
    Xbox,
}

impl PlatformKind {
    pub fn id(self) -> i64 {
        match self {
            PlatformKind::Steam => 1,
            PlatformKind::Gog => 5,
            PlatformKind::Psn => 6,
            PlatformKind::Xbox => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlatformKind::Steam => "Steam",
            PlatformKind::Gog => "GOG",
            PlatformKind::Psn => "PSN",
            PlatformKind::Xbox => "Xbox",
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(PlatformKind::Steam),
            5 => Some(PlatformKind::Gog),
            6 => Some(PlatformKind::Psn),
            7 => Some(PlatformKind::Xbox),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steam" => Ok(PlatformKind::Steam),
            "gog" => Ok(PlatformKind::Gog),
            "psn" | "playstation" => Ok(PlatformKind::Psn),
            "xbox" => Ok(PlatformKind::Xbox),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Account profile as reported by the platform. Overwrites the stored
/// profile on every sync.
#[derive(Debug, Clone, Default)]
pub struct PlatformProfile {
    pub display_name: String,
    pub profile_url: String,
    pub avatar_url: Option<String>,
    pub country: Option<String>,
    pub account_created: Option<DateTime<Utc>>,
}

/// Descriptive fields a platform may supply for canonical-game creation.
/// Only consulted the first time a name is seen; existing games keep their
/// original metadata.
#[derive(Debug, Clone, Default)]
pub struct GameDetail {
    pub is_free: bool,
    pub required_age: Option<i64>,
    pub short_description: Option<String>,
    pub detailed_description: Option<String>,
    pub header_image: Option<String>,
    pub windows: bool,
    pub mac: bool,
    pub linux: bool,
    pub release_date: Option<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
}

/// One owned title from a platform snapshot.
#[derive(Debug, Clone)]
pub struct OwnedGame {
    pub name: String,
    pub platform_game_id: String,
    pub store_url: Option<String>,
    pub playtime_minutes: i64,
    pub last_played: Option<DateTime<Utc>>,
    pub achievements_total: Option<i64>,
    pub achievements_unlocked: Option<i64>,
    pub detail: Option<GameDetail>,
}

/// One achievement entry from a platform snapshot.
///
/// `name` is the platform's stable api name; `None` models a malformed
/// entry, which the reconciler skips without aborting the game.
#[derive(Debug, Clone, Default)]
pub struct AchievementEntry {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub hidden: bool,
    pub icon_unlocked: Option<String>,
    pub icon_locked: Option<String>,
    pub achieved: bool,
    /// Epoch seconds; only positive values count as an unlock time.
    pub unlock_timestamp: Option<i64>,
}

impl AchievementEntry {
    /// Unlock time per the snapshot contract: absent or non-positive
    /// timestamps mean "never unlocked", not "unlocked now".
    pub fn unlock_time(&self) -> Option<DateTime<Utc>> {
        self.unlock_timestamp
            .filter(|ts| *ts > 0)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }
}

/// Normalized read-only view over one platform's account state. Snapshots
/// are full current state, never deltas.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> PlatformKind;

    async fn fetch_profile(&self, account_id: &str) -> Result<PlatformProfile, PlatformError>;

    async fn fetch_owned_games(&self, account_id: &str) -> Result<Vec<OwnedGame>, PlatformError>;

    async fn fetch_achievements(
        &self,
        account_id: &str,
        platform_game_id: &str,
    ) -> Result<Vec<AchievementEntry>, PlatformError>;
}

/// Clients keyed by platform id, as the orchestrator looks them up.
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    clients: HashMap<i64, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.platform().id(), client);
    }

    pub fn get(&self, platform_id: i64) -> Option<&Arc<dyn PlatformClient>> {
        self.clients.get(&platform_id)
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Build a registry from whatever platform credentials the environment
    /// provides; unconfigured platforms are simply absent.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        if let Some(client) = steam::SteamClient::from_env() {
            registry.register(Arc::new(client));
        }
        if let Some(client) = gog::GogClient::from_env() {
            registry.register(Arc::new(client));
        }
        if let Some(client) = psn::PsnClient::from_env() {
            registry.register(Arc::new(client));
        }
        if let Some(client) = xbox::XboxClient::from_env() {
            registry.register(Arc::new(client));
        }
        info!(platforms = registry.clients.len(), "platform registry built");
        registry
    }
}

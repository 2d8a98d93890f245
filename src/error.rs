use thiserror::Error;

/// Failure contract for platform clients.
///
/// `Game` is scoped to a single title and only skips that title during a
/// sync. Every other variant aborts the platform's contribution for the run.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform credentials missing or rejected: {0}")]
    Auth(String),

    #[error("platform request failed: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("fetch failed for game {platform_game_id}: {reason}")]
    Game {
        platform_game_id: String,
        reason: String,
    },

    #[error("unexpected payload shape: {0}")]
    Payload(String),
}

impl PlatformError {
    pub fn is_game_scoped(&self) -> bool {
        matches!(self, Self::Game { .. })
    }
}

/// Input-validation failures, rejected before any platform is contacted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("unknown user id {0}")]
    UnknownUser(i64),

    #[error("unknown platform id {0}")]
    UnknownPlatform(i64),

    #[error("unknown game id {0}")]
    UnknownGame(i64),
}

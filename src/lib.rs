pub mod db;
pub mod error;
pub mod model;
pub mod platform;
pub mod sync;
pub mod trace;

pub mod util {
    pub mod env;
}

pub use db::Db;
pub use error::{PlatformError, SyncError};
pub use platform::{PlatformClient, PlatformKind, PlatformRegistry};
pub use sync::orchestrator::{sync_user, SyncOptions, SyncReport};

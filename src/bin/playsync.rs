use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use playsync::sync::aggregate::load_summary;
use playsync::sync::ownership::ensure_binding;
use playsync::util::env;
use playsync::{sync_user, Db, PlatformKind, PlatformRegistry, SyncOptions};
use sqlx::Row;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "playsync", version, about = "Cross-platform library sync CLI")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Create a user account
    AddUser {
        username: String,
    },
    /// Bind a user to a platform account
    Bind {
        #[arg(long)]
        user: i64,
        /// Platform name (steam, gog, psn, xbox) or numeric id
        #[arg(long)]
        platform: String,
        /// Platform-native account id
        #[arg(long)]
        account: String,
    },
    /// Sync a user's bound platforms and print the report
    Sync {
        #[arg(long)]
        user: i64,
        /// Restrict the run to one platform
        #[arg(long)]
        platform: Option<String>,
        /// Restrict the run to one title (platform-native id or exact name)
        #[arg(long)]
        game: Option<String>,
    },
    /// Print a user's stored library summary
    Library {
        #[arg(long)]
        user: i64,
    },
    /// Print row counts for key database tables
    DbCounts,
}

fn resolve_platform(raw: &str) -> Result<i64> {
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(id);
    }
    match raw.parse::<PlatformKind>() {
        Ok(kind) => Ok(kind.id()),
        Err(_) => bail!("unknown platform '{raw}'"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    playsync::trace::init_tracing("info")?;

    let cli = Cli::parse();
    let database_url = cli.db_url.unwrap_or_else(env::db_url);
    let db = Db::connect(&database_url, 5).await?;

    match cli.command {
        Commands::AddUser { username } => {
            let row = sqlx::query("INSERT INTO users (username) VALUES ($1) RETURNING id")
                .bind(username.trim())
                .fetch_one(&db.pool)
                .await?;
            let user_id: i64 = row.get("id");
            info!(user_id, "user created");
            println!("{user_id}");
        }
        Commands::Bind {
            user,
            platform,
            account,
        } => {
            let platform_id = resolve_platform(&platform)?;
            ensure_binding(&db, user, platform_id, &account).await?;
            info!(user, platform_id, "binding stored");
        }
        Commands::Sync {
            user,
            platform,
            game,
        } => {
            let registry = PlatformRegistry::from_env();
            if registry.is_empty() {
                bail!("no platform credentials configured; nothing to sync");
            }
            let options = SyncOptions {
                platform: platform.as_deref().map(resolve_platform).transpose()?,
                game,
            };
            let report = sync_user(&db, &registry, user, &options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Library { user } => match load_summary(&db, user).await? {
            Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
            None => bail!("no library summary for user {user}; run a sync first"),
        },
        Commands::DbCounts => {
            for table in [
                "users",
                "games",
                "game_platforms",
                "user_platform_bindings",
                "user_platform_library",
                "achievements",
                "user_achievements",
                "user_game_library",
            ] {
                let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&db.pool)
                    .await?;
                println!("{table:<24} {count}");
            }
        }
    }
    Ok(())
}

//! Latchkey - run commands under a Redis-backed distributed lock
//!
//! ```bash
//! # Only one host runs the nightly backup at a time
//! latchkey run nightly-backup --ttl 30 -- ./backup.sh
//!
//! # Skip instead of waiting if another run is in progress
//! latchkey run report --no-wait -- ./report.sh
//!
//! latchkey status nightly-backup
//! latchkey --host cache.internal ping
//! ```

mod cli;
mod commands;
mod logging;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use latchkey_store::RedisStore;
use tracing::debug;

use cli::{Cli, Commands};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.global)?;
    let _logging_guard = logging::init_logging(&settings.log)?;
    debug!(
        host = %settings.redis.host,
        port = settings.redis.port,
        db = settings.redis.db,
        "Loaded configuration"
    );

    let store = RedisStore::connect(&settings.redis)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to redis at {}:{}",
                settings.redis.host, settings.redis.port
            )
        })?;
    let store = Arc::new(store);

    let code = match &cli.command {
        Commands::Run(args) => commands::run(store, args).await?,
        Commands::Status(args) => {
            commands::status(store, args).await?;
            0
        }
        Commands::Ping => {
            commands::ping(store.as_ref()).await?;
            0
        }
    };

    Ok(ExitCode::from(code))
}

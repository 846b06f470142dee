//! CLI settings
//!
//! Sources, lowest precedence first: `conf/latchkey.yml` (or the `--config`
//! file), `LATCHKEY_*` environment variables, then command line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, ConfigBuilder, Environment, builder::DefaultState};
use latchkey_store::RedisConfig;
use latchkey_store::settings::ENV_PREFIX;
use serde::Deserialize;

use crate::cli::GlobalOptions;

/// Looked up relative to the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "conf/latchkey.yml";

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives
    pub level: String,
    /// Also write a daily-rotated `latchkey.log` here
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisConfig,
    pub log: LogSettings,
}

impl Settings {
    pub fn load(options: &GlobalOptions) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match &options.config {
            Some(path) => builder.add_source(config::File::from(path.as_path()).required(true)),
            None => builder.add_source(
                config::File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
            ),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = apply_overrides(builder, options)?
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}

fn apply_overrides(
    mut builder: ConfigBuilder<DefaultState>,
    options: &GlobalOptions,
) -> Result<ConfigBuilder<DefaultState>> {
    if let Some(host) = &options.host {
        builder = builder.set_override("redis.host", host.as_str())?;
    }
    if let Some(port) = options.port {
        builder = builder.set_override("redis.port", i64::from(port))?;
    }
    if let Some(db) = options.db {
        builder = builder.set_override("redis.db", i64::from(db))?;
    }
    if let Some(prefix) = &options.key_prefix {
        builder = builder.set_override("redis.key_prefix", prefix.as_str())?;
    }
    if let Some(level) = &options.log_level {
        builder = builder.set_override("log.level", level.as_str())?;
    }
    Ok(builder)
}

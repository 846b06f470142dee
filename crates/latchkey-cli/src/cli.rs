//! Command line arguments

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Run commands under a distributed lock
#[derive(Debug, Parser)]
#[command(name = "latchkey", version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command; each overrides the config file
#[derive(Debug, Clone, Args)]
pub struct GlobalOptions {
    /// Config file (YAML, TOML or JSON)
    #[arg(short = 'c', long = "config", env = "LATCHKEY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub host: Option<String>,

    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[arg(long, global = true)]
    pub db: Option<u32>,

    /// Prefix for every key written to Redis
    #[arg(long = "key-prefix", global = true)]
    pub key_prefix: Option<String>,

    /// Log filter, e.g. `debug` or `latchkey_lock=trace`; `RUST_LOG` wins if set
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Acquire a lock, run a command while holding it, then release
    ///
    /// Exits with the command's status, or 75 if the lock is held elsewhere.
    Run(RunArgs),

    /// Show whether a lock is held and when it expires
    Status(StatusArgs),

    /// Check the Redis connection
    Ping,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Lock name
    pub name: String,

    /// Lock TTL in seconds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub ttl: u64,

    /// Give up after waiting this many seconds for the lock
    #[arg(long, conflicts_with = "no_wait", value_parser = parse_seconds)]
    pub wait: Option<Duration>,

    /// Fail immediately if the lock is held
    #[arg(long = "no-wait")]
    pub no_wait: bool,

    /// Do not extend the TTL while the command runs
    #[arg(long = "no-renew")]
    pub no_renew: bool,

    /// Command to run, after `--`
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// `(blocking, timeout)` for the acquire call
    pub fn wait_mode(&self) -> (bool, Option<Duration>) {
        if self.no_wait {
            return (false, None);
        }
        (true, self.wait)
    }
}

/// Non-negative seconds, fractions allowed
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Lock name
    pub name: String,
}

//! Latchkey CLI
//!
//! A command-line interface for poking at Latchkey caches and locks backed
//! by Redis.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use latchkey_state_redis::RedisConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// Latchkey CLI: cache entries and distributed locks on a shared Redis.
#[derive(Parser, Debug)]
#[command(name = "latchkey", version, about)]
struct Cli {
    /// Path to a TOML component configuration.
    #[arg(long, env = "LATCHKEY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Redis URL; overrides the configured connection.
    #[arg(long, env = "LATCHKEY_REDIS_URL", global = true)]
    url: Option<String>,

    /// Trace id attached to every operation. Generated when omitted.
    #[arg(long, global = true)]
    trace_id: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read, write and delete cache entries.
    Cache(commands::cache::CacheArgs),
    /// Acquire and release distributed locks.
    Lock(commands::lock::LockArgs),
}

fn load_config(cli: &Cli) -> anyhow::Result<RedisConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let document = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RedisConfig::from_toml_str(&document)?
        }
        None => RedisConfig::default(),
    };

    if let Some(url) = &cli.url {
        config.connection = Some(latchkey_state::ConnectionParams::from_uri(url.clone()));
    }
    if config.connection.is_none() {
        anyhow::bail!("no connection configured: pass --url or a --config with a [connection] section");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let trace_id = cli
        .trace_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match &cli.command {
        Command::Cache(args) => commands::cache::run(config, &trace_id, args, &cli.format).await,
        Command::Lock(args) => commands::lock::run(config, &trace_id, args, &cli.format).await,
    }
}

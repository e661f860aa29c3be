use std::time::Duration;

use clap::{Args, Subcommand};
use latchkey_state::{Cache, Openable};
use latchkey_state_redis::{RedisCache, RedisConfig};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the value stored under a key.
    Get {
        key: String,
    },
    /// Store a value under a key.
    Set {
        key: String,
        value: String,
        /// Time to live in milliseconds.
        #[arg(long, default_value_t = 60_000)]
        ttl: u64,
    },
    /// Delete a key.
    Del {
        key: String,
    },
}

pub async fn run(
    config: RedisConfig,
    trace_id: &str,
    args: &CacheArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let cache = RedisCache::from_config(config);
    cache.open(trace_id).await?;
    let result = execute(&cache, trace_id, &args.command, format).await;
    cache.close(trace_id).await?;
    result
}

async fn execute(
    cache: &RedisCache,
    trace_id: &str,
    command: &CacheCommand,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match command {
        CacheCommand::Get { key } => {
            let value = cache.retrieve(trace_id, key).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "value": value }));
                }
                OutputFormat::Text => match value {
                    Some(v) => println!("{v}"),
                    None => println!("(absent)"),
                },
            }
        }
        CacheCommand::Set { key, value, ttl } => {
            cache
                .store(trace_id, key, value, Duration::from_millis(*ttl))
                .await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "stored": true, "ttl_ms": ttl }));
                }
                OutputFormat::Text => println!("stored {key} for {ttl}ms"),
            }
        }
        CacheCommand::Del { key } => {
            cache.remove(trace_id, key).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "removed": true }));
                }
                OutputFormat::Text => println!("removed {key}"),
            }
        }
    }
    Ok(())
}

use std::time::Duration;

use clap::{Args, Subcommand};
use latchkey_state::{Lock, Openable};
use latchkey_state_redis::{RedisConfig, RedisLock};
use tracing::info;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommand,
}

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Make a single attempt to take a lock.
    Try {
        key: String,
        /// Lock time to live in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        ttl: u64,
        /// Hold the lock this many milliseconds, then release it. Without
        /// it the lock is left to expire.
        #[arg(long)]
        hold: Option<u64>,
    },
    /// Wait for a lock, polling every `options.retry_timeout` milliseconds.
    Acquire {
        key: String,
        /// Lock time to live in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        ttl: u64,
        /// Give up after this many milliseconds.
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
        /// Hold the lock this many milliseconds, then release it.
        #[arg(long)]
        hold: Option<u64>,
    },
}

pub async fn run(
    config: RedisConfig,
    trace_id: &str,
    args: &LockArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let lock = RedisLock::from_config(config);
    lock.open(trace_id).await?;
    let result = execute(&lock, trace_id, &args.command, format).await;
    lock.close(trace_id).await?;
    result
}

async fn execute(
    lock: &RedisLock,
    trace_id: &str,
    command: &LockCommand,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let (key, hold) = match command {
        LockCommand::Try { key, ttl, hold } => {
            let granted = lock
                .try_acquire_lock(trace_id, key, Duration::from_millis(*ttl))
                .await?;
            report(format, key, lock.token(), granted);
            if !granted {
                return Ok(());
            }
            (key, *hold)
        }
        LockCommand::Acquire {
            key,
            ttl,
            timeout,
            hold,
        } => {
            lock.acquire_lock(
                trace_id,
                key,
                Duration::from_millis(*ttl),
                Duration::from_millis(*timeout),
            )
            .await?;
            report(format, key, lock.token(), true);
            (key, *hold)
        }
    };

    if let Some(ms) = hold {
        info!(key = %key, hold_ms = ms, "holding lock");
        tokio::time::sleep(Duration::from_millis(ms)).await;
        lock.release_lock(trace_id, key).await?;
        info!(key = %key, "lock released");
    }
    Ok(())
}

fn report(format: &OutputFormat, key: &str, token: &str, granted: bool) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "key": key, "granted": granted, "owner": token })
            );
        }
        OutputFormat::Text if granted => println!("acquired {key} as {token}"),
        OutputFormat::Text => println!("{key} is held by another owner"),
    }
}

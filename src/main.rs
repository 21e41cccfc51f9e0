//! tiercache - command-line front-end for the tiered content cache
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        tiercache                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  get <url>  ──▶  Memory ──▶ Disk (cache dir) ──▶ HTTP    │
//! │  has / remove / clear / stats  ──▶  Disk (cache dir)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Settings come from an optional YAML file, overridden by flags and
//! environment variables.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{
    CacheConfig, CacheTier, HttpOrigin, RawCodec, TieredCache, BYTES_PER_MB,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered content cache - memory, disk and HTTP origin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory
    #[arg(long, env = "TIERCACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Disk budget in MiB
    #[arg(long, env = "TIERCACHE_BUDGET_MB")]
    budget_mb: Option<u64>,

    /// Attempts per disk write
    #[arg(long, env = "TIERCACHE_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Origin request timeout in seconds
    #[arg(long, env = "TIERCACHE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Disable the memory tier
    #[arg(long, env = "TIERCACHE_NO_MEMORY")]
    no_memory: bool,

    /// Disable the disk tier
    #[arg(long, env = "TIERCACHE_NO_DISK")]
    no_disk: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an identifier through the tiers
    Get {
        /// Source identifier (URL)
        id: String,
        /// Write the content here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check whether the disk tier holds an identifier
    Has { id: String },
    /// Remove an identifier from every tier
    Remove { id: String },
    /// Remove everything from the cache directory
    Clear,
    /// Print cache statistics as JSON
    Stats,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = build_config(&args)?;
    info!("Cache directory: {}", config.disk.root_dir.display());

    let origin = Arc::new(HttpOrigin::new(&config.origin).context("creating HTTP origin")?);
    let cache = TieredCache::open(config, RawCodec, origin, Bytes::new())
        .await
        .context("opening cache")?;

    match args.command {
        Command::Get { id, output } => {
            let fetched = cache.get_or_fetch_with_source(&id).await;
            if fetched.source == CacheTier::Default {
                cache.flush().await;
                bail!("no content available for {}", id);
            }
            info!(source = %fetched.source, size = fetched.value.len(), "Resolved");

            match output {
                Some(path) => tokio::fs::write(&path, &fetched.value)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    use std::io::Write;
                    std::io::stdout()
                        .write_all(&fetched.value)
                        .context("writing to stdout")?;
                }
            }
        }
        Command::Has { id } => {
            let present = match cache.disk() {
                Some(disk) => disk.has(&id).await,
                None => false,
            };
            println!("{}", present);
        }
        Command::Remove { id } => {
            if !cache.remove(&id).await {
                bail!("failed to remove {}", id);
            }
        }
        Command::Clear => {
            if !cache.clear_all().await {
                bail!("failed to clear cache");
            }
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "version": tiercache::VERSION,
                "entries": cache.entry_count(),
                "disk_usage_bytes": cache.current_disk_usage_bytes().await,
                "metrics": cache.metrics(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    cache.flush().await;
    Ok(())
}

/// YAML file first, then flags and environment on top
fn build_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(dir) = &args.cache_dir {
        config.disk.root_dir = dir.clone();
    }
    if let Some(budget_mb) = args.budget_mb {
        config.disk.eviction.budget_bytes = budget_mb * BYTES_PER_MB;
    }
    if let Some(max_retries) = args.max_retries {
        config.disk.retry.max_retries = max_retries;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.origin.timeout_secs = timeout_secs;
    }
    if args.no_memory {
        config.memory_enabled = false;
    }
    if args.no_disk {
        config.disk_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so `get` can stream content on stdout.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

//! tagcache - operator CLI for the tag-indexed Redis Cluster cache

mod bootstrap;
mod commands;

use anyhow::Result;
use clap::Parser;
use tagcache::{CacheConfig, ClusterConfig};
use tracing::{error, info};

use crate::bootstrap::PRODUCTION_BUILD_PHASE;
use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster seed nodes
    #[arg(
        short,
        long,
        env = "TAGCACHE_NODES",
        value_delimiter = ',',
        default_value = "redis://127.0.0.1:6379"
    )]
    nodes: Vec<String>,

    /// Namespace prefix; also the cluster routing tag
    #[arg(long, env = "TAGCACHE_KEY_PREFIX", default_value = tagcache::DEFAULT_KEY_PREFIX)]
    key_prefix: String,

    /// Name of the shared tag index hash
    #[arg(long, env = "TAGCACHE_SHARED_TAGS_KEY", default_value = tagcache::DEFAULT_SHARED_TAGS_KEY)]
    shared_tags_key: String,

    /// Per-command deadline in milliseconds
    #[arg(long, env = "TAGCACHE_TIMEOUT_MS", default_value_t = tagcache::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Connection deadline in milliseconds
    #[arg(long, env = "TAGCACHE_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Skip connecting to the cluster, as during a production build
    #[arg(long)]
    build_phase: bool,

    /// Current build phase; `phase-production-build` implies `--build-phase`
    #[arg(long, env = "NEXT_PHASE")]
    phase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            key_prefix: self.key_prefix.clone(),
            shared_tags_key: self.shared_tags_key.clone(),
            timeout_ms: self.timeout_ms,
            ..Default::default()
        }
    }

    fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            root_nodes: self.nodes.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }

    fn is_build_phase(&self) -> bool {
        self.build_phase || self.phase.as_deref() == Some(PRODUCTION_BUILD_PHASE)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting tagcache v{}", env!("CARGO_PKG_VERSION"));

    let cache = bootstrap::connect(
        args.cluster_config(),
        args.cache_config(),
        args.is_build_phase(),
    )
    .await?;
    info!(handlers = ?cache.chain.handler_names(), "Cache handlers ready");

    match commands::run(&cache, args.command).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

//! Cluster connection at startup
//!
//! A cluster that cannot be reached is not fatal: the handler chain is left
//! empty and every lookup misses, so callers recompute instead of failing.

use std::sync::Arc;

use tagcache::{
    CacheConfig, CacheHandler, ClusterConfig, Handler, KvStore, RedisClusterStore, TagCache,
};
use tracing::{info, warn};

/// `NEXT_PHASE` value set while a production build is running
pub const PRODUCTION_BUILD_PHASE: &str = "phase-production-build";

/// A handler chain plus direct access to the tag cache, if one is connected
pub struct Cache<S: KvStore + ?Sized + 'static> {
    /// The connected engine, absent when the store is unavailable
    pub engine: Option<Arc<TagCache<S>>>,
    /// Chain used for get/set/revalidate
    pub chain: CacheHandler,
}

impl<S: KvStore + ?Sized + 'static> Cache<S> {
    /// Wrap an engine in a one-handler chain
    pub fn with_engine(engine: Arc<TagCache<S>>) -> Self {
        let chain = CacheHandler::new(vec![engine.clone() as Arc<dyn Handler>]);
        Self {
            engine: Some(engine),
            chain,
        }
    }

    /// A chain with no handlers
    pub fn unavailable() -> Self {
        Self {
            engine: None,
            chain: CacheHandler::new(Vec::new()),
        }
    }
}

/// Connect to the cluster unless `build_phase` is set
pub async fn connect(
    cluster: ClusterConfig,
    config: CacheConfig,
    build_phase: bool,
) -> anyhow::Result<Cache<RedisClusterStore>> {
    config.validate()?;

    if build_phase {
        info!("Build phase, skipping Redis cluster connection");
        return Ok(Cache::unavailable());
    }

    let store = match RedisClusterStore::connect_with(cluster).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Failed to connect Redis cluster, continuing without cache");
            return Ok(Cache::unavailable());
        }
    };

    let engine = TagCache::new(Arc::new(store), config)?;
    Ok(Cache::with_engine(Arc::new(engine)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_phase_skips_connection() {
        let cache = connect(ClusterConfig::default(), CacheConfig::default(), true)
            .await
            .unwrap();
        assert!(cache.engine.is_none());
        assert!(cache.chain.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_cluster_degrades() {
        let cluster = ClusterConfig {
            root_nodes: vec!["not a url".to_string()],
            connect_timeout_ms: 200,
        };
        let cache = connect(cluster, CacheConfig::default(), false).await.unwrap();
        assert!(cache.engine.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cache_config_is_fatal() {
        let config = CacheConfig {
            key_prefix: String::new(),
            ..Default::default()
        };
        assert!(connect(ClusterConfig::default(), config, true).await.is_err());
    }
}

//! Ordered chain of cache handlers with fallback
//!
//! A handler that fails is logged and skipped. The chain may be empty, e.g.
//! when the cluster could not be reached at startup; it then behaves as a
//! cache that never hits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::engine::TagCache;
use crate::entry::{CacheEntry, Lifespan};
use crate::error::Result;
use crate::store::KvStore;
use crate::time::{Clock, SystemClock};

/// Name the tag cache reports in logs
pub const TAG_CACHE_HANDLER_NAME: &str = "redis-cluster-strings-custom";

/// A cache backend usable in a [`CacheHandler`] chain
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Look up `key`, honouring `implicit_tags`
    async fn get(&self, key: &str, implicit_tags: &[String]) -> Result<Option<CacheEntry>>;

    /// Store `entry` under `key`
    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;

    /// Invalidate everything carrying `tag`
    async fn revalidate_tag(&self, tag: &str) -> Result<()>;
}

#[async_trait]
impl<S: KvStore + ?Sized + 'static> Handler for TagCache<S> {
    fn name(&self) -> &str {
        TAG_CACHE_HANDLER_NAME
    }

    async fn get(&self, key: &str, implicit_tags: &[String]) -> Result<Option<CacheEntry>> {
        TagCache::get(self, key, implicit_tags).await
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        TagCache::set(self, key, entry).await
    }

    async fn revalidate_tag(&self, tag: &str) -> Result<()> {
        TagCache::revalidate_tag(self, tag).await.map(|_| ())
    }
}

/// Front door used by the rendering layer
pub struct CacheHandler {
    handlers: Vec<Arc<dyn Handler>>,
    clock: Arc<dyn Clock>,
}

impl CacheHandler {
    /// Build a chain consulted in the given order
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self::with_clock(handlers, Arc::new(SystemClock))
    }

    /// Build a chain that stamps new entries with `clock`
    pub fn with_clock(handlers: Vec<Arc<dyn Handler>>, clock: Arc<dyn Clock>) -> Self {
        Self { handlers, clock }
    }

    /// Names of the configured handlers, in order
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Whether any handler is configured
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First hit wins; failing handlers are skipped
    pub async fn get(&self, key: &str, implicit_tags: &[String]) -> Option<CacheEntry> {
        for handler in &self.handlers {
            match handler.get(key, implicit_tags).await {
                Ok(Some(entry)) => {
                    debug!(handler = handler.name(), key, "Cache hit");
                    return Some(entry);
                }
                Ok(None) => debug!(handler = handler.name(), key, "Cache miss"),
                Err(e) => warn!(
                    handler = handler.name(),
                    key,
                    not_ready = e.is_not_ready(),
                    error = %e,
                    "Handler get failed"
                ),
            }
        }
        None
    }

    /// Write `entry` to every handler; returns how many accepted it
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> usize {
        let mut stored = 0;
        for handler in &self.handlers {
            match handler.set(key, entry).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(
                    handler = handler.name(),
                    key,
                    not_ready = e.is_not_ready(),
                    error = %e,
                    "Handler set failed"
                ),
            }
        }
        stored
    }

    /// Build an entry stamped with the current time and write it; returns the
    /// entry and how many handlers accepted it
    pub async fn set_value(
        &self,
        key: &str,
        value: serde_json::Value,
        tags: &[String],
        lifespan: Option<Lifespan>,
    ) -> (CacheEntry, usize) {
        let mut entry = CacheEntry::new(value, tags.iter().cloned(), self.clock.now_ms());
        entry.lifespan = lifespan;
        let stored = self.set(key, &entry).await;
        (entry, stored)
    }

    /// Invalidate `tag` in every handler; returns how many succeeded
    pub async fn revalidate_tag(&self, tag: &str) -> usize {
        let mut revalidated = 0;
        for handler in &self.handlers {
            match handler.revalidate_tag(tag).await {
                Ok(()) => revalidated += 1,
                Err(e) => warn!(
                    handler = handler.name(),
                    tag,
                    not_ready = e.is_not_ready(),
                    error = %e,
                    "Handler revalidateTag failed"
                ),
            }
        }
        revalidated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::config::CacheConfig;
    use crate::error::Error;
    use crate::time::ManualClock;
    use crate::MemoryStore;

    /// Handler that always fails and counts calls
    #[derive(Default)]
    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _key: &str, _implicit_tags: &[String]) -> Result<Option<CacheEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotReady)
        }

        async fn set(&self, _key: &str, _entry: &CacheEntry) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotReady)
        }

        async fn revalidate_tag(&self, _tag: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotReady)
        }
    }

    fn tag_cache(clock: Arc<ManualClock>) -> Arc<TagCache<MemoryStore>> {
        let memory = Arc::new(MemoryStore::with_clock(clock.clone()));
        Arc::new(TagCache::with_clock(memory, CacheConfig::default(), clock).unwrap())
    }

    #[tokio::test]
    async fn test_empty_chain_always_misses() {
        let chain = CacheHandler::new(Vec::new());
        let entry = CacheEntry::new(json!(1), ["x"], 0);

        assert!(chain.is_empty());
        assert_eq!(chain.set("k", &entry).await, 0);
        assert!(chain.get("k", &[]).await.is_none());
        assert_eq!(chain.revalidate_tag("x").await, 0);
    }

    #[tokio::test]
    async fn test_falls_back_past_failing_handler() {
        let clock = Arc::new(ManualClock::new(1_000));
        let broken = Arc::new(Broken::default());
        let cache = tag_cache(clock.clone());
        let chain = CacheHandler::with_clock(
            vec![broken.clone() as Arc<dyn Handler>, cache as Arc<dyn Handler>],
            clock,
        );

        assert_eq!(chain.handler_names(), vec!["broken", TAG_CACHE_HANDLER_NAME]);

        let (written, stored) = chain.set_value("k", json!("v"), &["x".to_string()], None).await;
        assert_eq!(stored, 1);
        assert_eq!(written.last_modified, 1_000);
        assert_eq!(chain.get("k", &[]).await, Some(written));

        assert_eq!(chain.revalidate_tag("x").await, 1);
        assert!(chain.get("k", &[]).await.is_none());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_set_value_with_lifespan() {
        let clock = Arc::new(ManualClock::new(2_000_000));
        let cache = tag_cache(clock.clone());
        let chain = CacheHandler::with_clock(vec![cache as Arc<dyn Handler>], clock.clone());

        let lifespan = Some(Lifespan { expire_at: 2_010 });
        chain.set_value("k", json!(1), &[], lifespan).await;
        assert!(chain.get("k", &[]).await.is_some());

        clock.advance(10_000);
        assert!(chain.get("k", &[]).await.is_none());
    }
}

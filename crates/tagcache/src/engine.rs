//! TagCache: tag-indexed cache over a shared key-value store
//!
//! ## Operations
//! - **get**: read the entry, then check every declared and implicit tag
//!   against the revalidation clock; stale entries are deleted and missed
//! - **set**: write the entry (plus expiry) and its tag index record concurrently
//! - **revalidate_tag**: publish implicit tags to the clock, then scan the tag
//!   index and delete every entry declaring the tag
//!
//! No in-process state is authoritative. Any number of engines may share one
//! store; correctness rests on idempotent deletes, a forward-only clock and
//! staleness being rechecked on every read.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, EntryStore};
use crate::error::Result;
use crate::keys::KeyNamespace;
use crate::revalidation::RevalidationClock;
use crate::stats::CacheStats;
use crate::store::{BoundedStore, KvStore};
use crate::tag_index::TagIndex;
use crate::time::{Clock, SystemClock};

/// Tag-indexed cache bound to one key namespace
pub struct TagCache<S: ?Sized> {
    config: CacheConfig,
    namespace: KeyNamespace,
    store: BoundedStore<S>,
    entries: EntryStore<S>,
    tag_index: TagIndex<S>,
    revalidation: RevalidationClock<S>,
    clock: Arc<dyn Clock>,
    stats: Arc<CacheStats>,
}

impl<S: KvStore + ?Sized> TagCache<S> {
    /// Create an engine over `store` using the system clock
    pub fn new(store: Arc<S>, config: CacheConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an engine whose revalidation marks come from `clock`
    pub fn with_clock(store: Arc<S>, config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let namespace = config.namespace();
        let store = BoundedStore::new(store, config.timeout());

        Ok(Self {
            entries: EntryStore::new(store.clone(), namespace.clone()),
            tag_index: TagIndex::new(store.clone(), namespace.clone(), config.scan_page_size),
            revalidation: RevalidationClock::new(store.clone(), namespace.clone(), clock.clone()),
            store,
            namespace,
            config,
            clock,
            stats: Arc::new(CacheStats::new()),
        })
    }

    /// Look up `key`, treating it as stale if any of its declared tags or
    /// `implicit_tags` was revalidated after the entry was written
    ///
    /// A failure while checking staleness is a miss: the entry cannot be
    /// proven fresh, and recomputing it is always safe.
    pub async fn get(&self, key: &str, implicit_tags: &[String]) -> Result<Option<CacheEntry>> {
        self.store.ensure_ready()?;

        let entry = match self.entries.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.stats.record_miss();
                return Ok(None);
            }
            Err(e) => {
                self.stats.record_failure();
                return Err(e);
            }
        };

        let combined = combine_tags(&entry.tags, implicit_tags);
        if combined.is_empty() {
            self.stats.record_hit();
            return Ok(Some(entry));
        }

        let revalidated = match self.revalidation.last_revalidated(&combined).await {
            Ok(times) => times,
            Err(e) => {
                warn!(key, error = %e, "Revalidation lookup failed, treating entry as miss");
                self.stats.record_failure();
                self.stats.record_miss();
                return Ok(None);
            }
        };

        let stale_by = revalidated
            .iter()
            .find(|(_, at)| **at > entry.last_modified);

        if let Some((tag, at)) = stale_by {
            debug!(
                key,
                tag = tag.as_str(),
                revalidated_at = at,
                last_modified = entry.last_modified,
                "Entry is stale"
            );
            if let Err(e) = self.entries.delete(&[key.to_string()]).await {
                warn!(key, error = %e, "Failed to delete stale entry");
            }
            self.stats.record_stale();
            self.stats.record_miss();
            return Ok(None);
        }

        self.stats.record_hit();
        Ok(Some(entry))
    }

    /// Store `entry` under `key`
    ///
    /// The entry write and the tag index write run concurrently and are not
    /// atomic together. If only the tag write fails the entry stays readable
    /// but is not reachable by `revalidate_tag` until it is written again.
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.store.ensure_ready()?;

        let write_entry = self.entries.set(key, entry);
        let write_tags = async {
            if entry.tags.is_empty() {
                Ok(())
            } else {
                self.tag_index.record_tags(key, &entry.tags).await
            }
        };

        let (entry_written, tags_written) = tokio::join!(write_entry, write_tags);
        if let Err(e) = entry_written.and(tags_written) {
            self.stats.record_failure();
            return Err(e);
        }

        debug!(key, tags = entry.tags.len(), expires = entry.lifespan.is_some(), "Stored entry");
        self.stats.record_set();
        Ok(())
    }

    /// Invalidate every entry carrying `tag`; returns the number of keys removed
    ///
    /// Implicit tags are first stamped on the revalidation clock, whether or
    /// not any entry currently declares them. A failed scan page fails the
    /// whole call before anything is deleted.
    pub async fn revalidate_tag(&self, tag: &str) -> Result<usize> {
        self.store.ensure_ready()?;

        let outcome = self.invalidate(tag).await;
        if outcome.is_err() {
            self.stats.record_failure();
        }
        outcome
    }

    async fn invalidate(&self, tag: &str) -> Result<usize> {
        if self.config.is_implicit_tag(tag) {
            self.revalidation.mark_revalidated(tag).await?;
        }

        let affected = self.tag_index.keys_tagged(tag).await?;
        if affected.is_empty() {
            debug!(tag, "No tagged entries to invalidate");
            return Ok(0);
        }

        let (entries_deleted, records_removed) = tokio::join!(
            self.entries.delete(&affected),
            self.tag_index.remove(&affected)
        );
        entries_deleted.and(records_removed)?;

        info!(tag, keys = affected.len(), "Invalidated tag");
        self.stats.record_invalidated(affected.len());
        Ok(affected.len())
    }

    /// Every `(key, tags)` record in the tag index
    pub async fn tag_records(&self) -> Result<Vec<(String, Vec<String>)>> {
        self.store.ensure_ready()?;

        let mut records = Vec::new();
        let mut scan = self.tag_index.scan_all();
        while let Some(page) = scan.next_page().await? {
            records.extend(page);
        }
        records.sort();
        records.dedup_by(|a, b| a.0 == b.0);
        Ok(records)
    }

    /// Whether the underlying store is connected
    pub fn is_ready(&self) -> bool {
        self.store.inner().is_ready()
    }

    /// Current time on the engine clock, in milliseconds
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Engine configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key derivation in use
    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// The tag index
    pub fn tag_index(&self) -> &TagIndex<S> {
        &self.tag_index
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

fn combine_tags(declared: &[String], implicit: &[String]) -> Vec<String> {
    let mut combined: Vec<String> = Vec::with_capacity(declared.len() + implicit.len());
    for tag in declared.iter().chain(implicit) {
        if !combined.contains(tag) {
            combined.push(tag.clone());
        }
    }
    combined
}

//! # tagcache
//!
//! Tag-indexed cache on top of a sharded, replicated key-value store.
//!
//! ## Architecture
//! - **KeyNamespace**: `{prefix}` hash tag keeps one cache on one shard
//! - **EntryStore**: JSON entries with optional absolute expiry
//! - **TagIndex**: shared `key -> tags` hash, scanned page by page
//! - **RevalidationClock**: shared `implicit tag -> ms` hash, forward only
//! - **TagCache**: lookup with staleness check, bulk invalidation by tag
//!
//! ## Stores
//! - `RedisClusterStore` for production
//! - `MemoryStore` for tests and single-process use

#![warn(missing_docs)]

mod config;
mod engine;
mod entry;
mod error;
mod handler;
mod keys;
mod memory;
mod redis_cluster;
mod revalidation;
mod stats;
mod store;
mod tag_index;
mod time;

pub use config::{
    CacheConfig, DEFAULT_IMPLICIT_TAG_PREFIX, DEFAULT_KEY_PREFIX, DEFAULT_SCAN_PAGE_SIZE,
    DEFAULT_SHARED_TAGS_KEY, DEFAULT_TIMEOUT_MS,
};
pub use engine::TagCache;
pub use entry::{CacheEntry, EntryStore, Lifespan};
pub use error::{Error, Result, StoreError, StoreResult};
pub use handler::{CacheHandler, Handler, TAG_CACHE_HANDLER_NAME};
pub use keys::{hash_slot_tag, KeyNamespace};
pub use memory::MemoryStore;
pub use redis_cluster::{ClusterConfig, RedisClusterStore};
pub use revalidation::RevalidationClock;
pub use stats::CacheStats;
pub use store::{BoundedStore, KvStore, ScanPage, SCAN_START};
pub use tag_index::{TagIndex, TagScan};
pub use time::{Clock, ManualClock, SystemClock};

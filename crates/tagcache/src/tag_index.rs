//! Shared `caller key -> declared tags` hash
//!
//! Answers "which keys carry tag T" by a full paginated scan. The index may
//! still list keys whose entries already expired; deleting those is a no-op.

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::keys::KeyNamespace;
use crate::store::{BoundedStore, KvStore, SCAN_START};

/// The tag index of one cache instance
pub struct TagIndex<S: ?Sized> {
    store: BoundedStore<S>,
    namespace: KeyNamespace,
    page_size: usize,
}

impl<S: KvStore + ?Sized> TagIndex<S> {
    /// Create a tag index reading `page_size` fields per scan page
    pub fn new(store: BoundedStore<S>, namespace: KeyNamespace, page_size: usize) -> Self {
        Self {
            store,
            namespace,
            page_size,
        }
    }

    /// Upsert the declared tags of `key`
    pub async fn record_tags(&self, key: &str, tags: &[String]) -> Result<()> {
        let encoded = serde_json::to_vec(tags)?;
        self.store
            .hash_set_field(self.namespace.tags_index_key(), key, &encoded)
            .await
    }

    /// Start a scan over the whole index
    pub fn scan_all(&self) -> TagScan<'_, S> {
        self.scan_from(SCAN_START)
    }

    /// Resume a scan at a cursor returned by [`TagScan::cursor`]
    pub fn scan_from(&self, cursor: u64) -> TagScan<'_, S> {
        TagScan {
            index: self,
            cursor,
            started: cursor != SCAN_START,
            finished: false,
        }
    }

    /// Scan to completion and return every key whose tags include `tag`
    ///
    /// Each key appears once even if the store repeats it across pages.
    pub async fn keys_tagged(&self, tag: &str) -> Result<Vec<String>> {
        let mut seen: AHashMap<String, bool> = AHashMap::new();
        let mut scan = self.scan_all();

        while let Some(page) = scan.next_page().await? {
            for (key, tags) in page {
                let tagged = tags.iter().any(|t| t == tag);
                seen.insert(key, tagged);
            }
        }

        Ok(seen
            .into_iter()
            .filter_map(|(key, tagged)| tagged.then_some(key))
            .collect())
    }

    /// Delete the records of `keys`
    pub async fn remove(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.store
            .hash_delete_fields(self.namespace.tags_index_key(), keys)
            .await
    }
}

/// A lazy pass over the tag index, one store page at a time
pub struct TagScan<'a, S: ?Sized> {
    index: &'a TagIndex<S>,
    cursor: u64,
    started: bool,
    finished: bool,
}

impl<S: KvStore + ?Sized> TagScan<'_, S> {
    /// Cursor of the next page to fetch
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether the store signalled the end of the scan
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch the next page of `(key, tags)` pairs, `None` once exhausted
    ///
    /// A failed page leaves the cursor in place so the scan can be retried.
    pub async fn next_page(&mut self) -> Result<Option<Vec<(String, Vec<String>)>>> {
        if self.finished || (self.started && self.cursor == SCAN_START) {
            self.finished = true;
            return Ok(None);
        }

        let page = self
            .index
            .store
            .hash_scan_page(
                self.index.namespace.tags_index_key(),
                self.cursor,
                self.index.page_size,
            )
            .await?;

        self.started = true;
        self.cursor = page.cursor;
        if page.cursor == SCAN_START {
            self.finished = true;
        }

        let records = page
            .fields
            .into_iter()
            .filter_map(|(key, raw)| match serde_json::from_slice::<Vec<String>>(&raw) {
                Ok(tags) => Some((key, tags)),
                Err(e) => {
                    warn!(key, error = %e, "Skipping unreadable tag index record");
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(records = records.len(), cursor = self.cursor, "Scanned tag index page");
        Ok(Some(records))
    }
}

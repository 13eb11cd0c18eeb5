//! Shared `implicit tag -> last revalidation ms` hash
//!
//! Implicit tags never appear in stored entries, so invalidating one cannot
//! find its entries. Instead the time of invalidation is published here and
//! every read compares it with the entry's `lastModified`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::keys::KeyNamespace;
use crate::store::{BoundedStore, KvStore};
use crate::time::Clock;

/// The revalidation clock of one cache instance
pub struct RevalidationClock<S: ?Sized> {
    store: BoundedStore<S>,
    namespace: KeyNamespace,
    clock: Arc<dyn Clock>,
}

impl<S: KvStore + ?Sized> RevalidationClock<S> {
    /// Create a revalidation clock stamping marks with `clock`
    pub fn new(store: BoundedStore<S>, namespace: KeyNamespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            namespace,
            clock,
        }
    }

    /// Record that `tag` was revalidated now; returns the stamp written
    ///
    /// The stored mark only ever moves forward, so a slower concurrent call
    /// carrying an older stamp cannot roll it back.
    pub async fn mark_revalidated(&self, tag: &str) -> Result<i64> {
        let now = self.clock.now_ms();
        self.store
            .hash_set_field_max(self.namespace.revalidated_tags_key(), tag, now)
            .await?;
        debug!(tag, at = now, "Marked tag revalidated");
        Ok(now)
    }

    /// Last revalidation time of each tag in `tags`; never-revalidated tags are absent
    pub async fn last_revalidated(&self, tags: &[String]) -> Result<HashMap<String, i64>> {
        if tags.is_empty() {
            return Ok(HashMap::new());
        }

        let values = self
            .store
            .hash_get_fields(self.namespace.revalidated_tags_key(), tags)
            .await?;

        Ok(tags
            .iter()
            .zip(values)
            .filter_map(|(tag, raw)| {
                let at = std::str::from_utf8(raw.as_deref()?).ok()?.parse::<i64>().ok()?;
                Some((tag.clone(), at))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::time::ManualClock;
    use crate::MemoryStore;

    fn revalidation_clock() -> (Arc<ManualClock>, Arc<MemoryStore>, RevalidationClock<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let memory = Arc::new(MemoryStore::new());
        let bounded = BoundedStore::new(Arc::clone(&memory), Duration::from_secs(1));
        let revalidation = RevalidationClock::new(
            bounded,
            KeyNamespace::new("r:", "_tags_"),
            clock.clone(),
        );
        (clock, memory, revalidation)
    }

    #[tokio::test]
    async fn test_mark_and_read() {
        let (clock, _memory, revalidation) = revalidation_clock();

        revalidation.mark_revalidated("_N_T_/a").await.unwrap();
        clock.advance(10);
        revalidation.mark_revalidated("_N_T_/b").await.unwrap();

        let times = revalidation
            .last_revalidated(&["_N_T_/a".into(), "_N_T_/b".into(), "never".into()])
            .await
            .unwrap();
        assert_eq!(times.get("_N_T_/a"), Some(&1_000));
        assert_eq!(times.get("_N_T_/b"), Some(&1_010));
        assert!(!times.contains_key("never"));
    }

    #[tokio::test]
    async fn test_mark_never_moves_backwards() {
        let (clock, _memory, revalidation) = revalidation_clock();

        clock.set(5_000);
        revalidation.mark_revalidated("_N_T_/a").await.unwrap();
        clock.set(4_000);
        revalidation.mark_revalidated("_N_T_/a").await.unwrap();

        let times = revalidation
            .last_revalidated(&["_N_T_/a".into()])
            .await
            .unwrap();
        assert_eq!(times.get("_N_T_/a"), Some(&5_000));
    }

    #[tokio::test]
    async fn test_unparsable_mark_ignored() {
        let (_clock, memory, revalidation) = revalidation_clock();
        memory
            .hash_set_field("{r:}__revalidated_tags__", "t", b"soon")
            .await
            .unwrap();

        let times = revalidation.last_revalidated(&["t".into()]).await.unwrap();
        assert!(times.is_empty());
    }

    #[tokio::test]
    async fn test_empty_tag_set_skips_store() {
        let (_clock, memory, revalidation) = revalidation_clock();
        memory.set_ready(false);

        assert!(revalidation.last_revalidated(&[]).await.unwrap().is_empty());
    }
}

//! In-process store with Redis command semantics
//!
//! Strings carry an optional absolute expiry checked lazily on access.
//! Hash fields are numbered in insertion order and an `HSCAN` cursor is the
//! next number to visit, so deleting fields mid-scan never shifts the rest.

use std::collections::BTreeMap;
use std::ops::RangeFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{KvStore, ScanPage, SCAN_START};
use crate::time::{Clock, SystemClock};

struct StringValue {
    bytes: Vec<u8>,
    expire_at_ms: Option<i64>,
}

/// Hash fields plus their insertion sequence
///
/// Overwriting a field keeps its sequence number, as Redis keeps a field's
/// bucket when its value changes.
#[derive(Default)]
struct HashValue {
    fields: AHashMap<String, (u64, Vec<u8>)>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl HashValue {
    fn get(&self, field: &str) -> Option<&Vec<u8>> {
        self.fields.get(field).map(|(_, value)| value)
    }

    fn insert(&mut self, field: &str, value: Vec<u8>) {
        if let Some((_, stored)) = self.fields.get_mut(field) {
            *stored = value;
            return;
        }
        // Sequences start at 1; cursor 0 is the start of a scan
        self.next_seq += 1;
        self.order.insert(self.next_seq, field.to_string());
        self.fields.insert(field.to_string(), (self.next_seq, value));
    }

    fn remove(&mut self, field: &str) {
        if let Some((seq, _)) = self.fields.remove(field) {
            self.order.remove(&seq);
        }
    }

    fn len(&self) -> usize {
        self.fields.len()
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn scan(&self, from: RangeFrom<u64>) -> impl Iterator<Item = (u64, &String, &Vec<u8>)> {
        self.order.range(from).filter_map(move |(seq, field)| {
            self.fields.get(field).map(|(_, value)| (*seq, field, value))
        })
    }
}

#[derive(Default)]
struct Keyspace {
    strings: AHashMap<String, StringValue>,
    hashes: AHashMap<String, HashValue>,
}

/// Store kept entirely in memory
pub struct MemoryStore {
    keyspace: Arc<RwLock<Keyspace>>,
    clock: Arc<dyn Clock>,
    ready: AtomicBool,
    /// Artificial delay per command, in milliseconds
    latency_ms: AtomicU64,
    /// Commands that currently fail, by name (`HSET`, `HSCAN`, ...)
    failing: RwLock<AHashSet<&'static str>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that evaluates expiry against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: Arc::new(RwLock::new(Keyspace::default())),
            clock,
            ready: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            failing: RwLock::new(AHashSet::new()),
        }
    }

    /// Simulate a lost (or restored) connection
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Delay every subsequent command by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every subsequent `command` fail until [`MemoryStore::restore_command`]
    pub fn fail_command(&self, command: &'static str) {
        self.failing.write().insert(command);
    }

    /// Undo [`MemoryStore::fail_command`]
    pub fn restore_command(&self, command: &'static str) {
        self.failing.write().remove(command);
    }

    /// Whether a live (non-expired) string key exists
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.keyspace
            .read()
            .strings
            .get(key)
            .is_some_and(|v| !is_expired(v, now))
    }

    /// Number of fields in a hash
    pub fn hash_len(&self, hash: &str) -> usize {
        self.keyspace.read().hashes.get(hash).map_or(0, |h| h.len())
    }

    /// Expiry instant of a string key in milliseconds, if one is set
    pub fn expiry_ms(&self, key: &str) -> Option<i64> {
        self.keyspace
            .read()
            .strings
            .get(key)
            .and_then(|v| v.expire_at_ms)
    }

    async fn enter(&self, command: &'static str) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.ready.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        if self.failing.read().contains(command) {
            return Err(StoreError::command(command, "injected failure"));
        }
        Ok(())
    }
}

fn is_expired(value: &StringValue, now_ms: i64) -> bool {
    value.expire_at_ms.is_some_and(|at| at <= now_ms)
}

#[async_trait]
impl KvStore for MemoryStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter("GET").await?;
        let now = self.clock.now_ms();

        let mut keyspace = self.keyspace.write();
        match keyspace.strings.get(key) {
            Some(value) if is_expired(value, now) => {
                keyspace.strings.remove(key);
                Ok(None)
            }
            Some(value) => Ok(Some(value.bytes.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.enter("SET").await?;
        // Plain SET clears any previous expiry
        self.keyspace.write().strings.insert(
            key.to_string(),
            StringValue {
                bytes: value.to_vec(),
                expire_at_ms: None,
            },
        );
        Ok(())
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<()> {
        self.enter("EXPIREAT").await?;
        let at_ms = unix_secs.saturating_mul(1000);
        let now = self.clock.now_ms();

        let mut keyspace = self.keyspace.write();
        if at_ms <= now {
            keyspace.strings.remove(key);
        } else if let Some(value) = keyspace.strings.get_mut(key) {
            value.expire_at_ms = Some(at_ms);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<()> {
        self.enter("UNLINK").await?;
        let mut keyspace = self.keyspace.write();
        for key in keys {
            keyspace.strings.remove(key);
            keyspace.hashes.remove(key);
        }
        Ok(())
    }

    async fn hash_set_field(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.enter("HSET").await?;
        self.keyspace
            .write()
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field, value.to_vec());
        Ok(())
    }

    async fn hash_set_field_max(&self, hash: &str, field: &str, value: i64) -> StoreResult<()> {
        self.enter("HSETMAX").await?;
        let mut keyspace = self.keyspace.write();
        let fields = keyspace.hashes.entry(hash.to_string()).or_default();

        let current = fields
            .get(field)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse::<i64>().ok());

        if current.map_or(true, |cur| cur < value) {
            fields.insert(field, value.to_string().into_bytes());
        }
        Ok(())
    }

    async fn hash_get_fields(
        &self,
        hash: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.enter("HMGET").await?;
        let keyspace = self.keyspace.read();
        let stored = keyspace.hashes.get(hash);

        Ok(fields
            .iter()
            .map(|field| stored.and_then(|h| h.get(field).cloned()))
            .collect())
    }

    async fn hash_delete_fields(&self, hash: &str, fields: &[String]) -> StoreResult<()> {
        self.enter("HDEL").await?;
        let mut keyspace = self.keyspace.write();
        if let Some(stored) = keyspace.hashes.get_mut(hash) {
            for field in fields {
                stored.remove(field);
            }
            if stored.is_empty() {
                keyspace.hashes.remove(hash);
            }
        }
        Ok(())
    }

    async fn hash_scan_page(
        &self,
        hash: &str,
        cursor: u64,
        page_size: usize,
    ) -> StoreResult<ScanPage> {
        self.enter("HSCAN").await?;
        let keyspace = self.keyspace.read();
        let Some(stored) = keyspace.hashes.get(hash) else {
            return Ok(ScanPage::default());
        };

        let page_size = page_size.max(1);
        let mut fields = Vec::with_capacity(page_size);
        let mut next = SCAN_START;
        for (seq, field, value) in stored.scan(cursor..) {
            if fields.len() == page_size {
                next = seq;
                break;
            }
            fields.push((field.clone(), value.clone()));
        }

        Ok(ScanPage {
            cursor: next,
            fields,
        })
    }
}

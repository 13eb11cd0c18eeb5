//! Redis Cluster backend
//!
//! All keys produced by [`KeyNamespace`](crate::KeyNamespace) share one hash
//! tag, so multi-key `UNLINK`/`HDEL`/`HMGET` stay within one slot.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue, Script};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result, StoreError, StoreResult};
use crate::store::{KvStore, ScanPage};

/// Raise a hash field only if the new integer is larger
const HSET_MAX_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]))
local candidate = tonumber(ARGV[2])
if current == nil or current < candidate then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

/// Where and how to reach the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// Seed node URLs, e.g. `redis://10.0.0.11:6379`
    pub root_nodes: Vec<String>,
    /// Upper bound on establishing the initial connection
    pub connect_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            root_nodes: vec!["redis://127.0.0.1:6379".to_string()],
            connect_timeout_ms: 5000,
        }
    }
}

/// Store backed by a Redis Cluster connection
pub struct RedisClusterStore {
    config: ClusterConfig,
    connection: RwLock<Option<ClusterConnection>>,
    hset_max: Script,
}

impl RedisClusterStore {
    /// Create an unconnected store; every command fails until [`connect`](Self::connect)
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            hset_max: Script::new(HSET_MAX_SCRIPT),
        }
    }

    /// Create a store and connect it
    pub async fn connect_with(config: ClusterConfig) -> Result<Self> {
        let store = Self::new(config);
        store.connect().await?;
        Ok(store)
    }

    /// Open the cluster connection, bounded by the connect timeout
    pub async fn connect(&self) -> Result<()> {
        if self.config.root_nodes.is_empty() {
            return Err(Error::Config("at least one root node is required".to_string()));
        }

        let client = ClusterClient::new(self.config.root_nodes.clone())
            .map_err(|e| Error::Config(format!("invalid cluster nodes: {}", e)))?;

        let after = Duration::from_millis(self.config.connect_timeout_ms);
        info!(nodes = ?self.config.root_nodes, "Connecting Redis cluster");

        let connection = match tokio::time::timeout(after, client.get_async_connection()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(StoreError::command("CONNECT", e).into()),
            Err(_) => {
                return Err(Error::Timeout {
                    command: "CONNECT",
                    after,
                })
            }
        };

        *self.connection.write() = Some(connection);
        info!("Redis cluster connected");
        Ok(())
    }

    /// Drop the connection; later commands fail as not ready
    pub fn disconnect(&self) {
        if self.connection.write().take().is_some() {
            warn!("Redis cluster disconnected");
        }
    }

    /// Cluster settings
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn connection(&self) -> StoreResult<ClusterConnection> {
        self.connection
            .read()
            .clone()
            .ok_or(StoreError::Disconnected)
    }

    async fn query<T: FromRedisValue>(&self, command: &'static str, cmd: &Cmd) -> StoreResult<T> {
        let mut connection = self.connection()?;
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| StoreError::command(command, e))
    }
}

#[async_trait]
impl KvStore for RedisClusterStore {
    fn is_ready(&self) -> bool {
        self.connection.read().is_some()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.query("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.query("SET", redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<()> {
        self.query::<i64>("EXPIREAT", redis::cmd("EXPIREAT").arg(key).arg(unix_secs))
            .await
            .map(|_| ())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.query::<i64>("UNLINK", redis::cmd("UNLINK").arg(keys))
            .await
            .map(|_| ())
    }

    async fn hash_set_field(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.query::<i64>("HSET", redis::cmd("HSET").arg(hash).arg(field).arg(value))
            .await
            .map(|_| ())
    }

    async fn hash_set_field_max(&self, hash: &str, field: &str, value: i64) -> StoreResult<()> {
        let mut connection = self.connection()?;
        self.hset_max
            .key(hash)
            .arg(field)
            .arg(value)
            .invoke_async::<_, i64>(&mut connection)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::command("EVALSHA", e))
    }

    async fn hash_get_fields(
        &self,
        hash: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<Vec<u8>>> = self
            .query("HMGET", redis::cmd("HMGET").arg(hash).arg(fields))
            .await?;

        if values.len() != fields.len() {
            return Err(StoreError::Malformed {
                command: "HMGET",
                message: format!("expected {} values, got {}", fields.len(), values.len()),
            });
        }
        Ok(values)
    }

    async fn hash_delete_fields(&self, hash: &str, fields: &[String]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.query::<i64>("HDEL", redis::cmd("HDEL").arg(hash).arg(fields))
            .await
            .map(|_| ())
    }

    async fn hash_scan_page(
        &self,
        hash: &str,
        cursor: u64,
        page_size: usize,
    ) -> StoreResult<ScanPage> {
        let (cursor, fields): (u64, Vec<(String, Vec<u8>)>) = self
            .query(
                "HSCAN",
                redis::cmd("HSCAN")
                    .arg(hash)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(page_size),
            )
            .await?;

        Ok(ScanPage { cursor, fields })
    }
}

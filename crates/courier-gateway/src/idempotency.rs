//! Idempotency store for submission replay.
//!
//! Maps a client-supplied key to the response the gateway returned for the
//! first submission under that key, for a TTL window. The store is a
//! best-effort convenience layered over at-least-once delivery: losing an
//! entry at worst degrades to a duplicate enqueue, which the channel
//! workers already tolerate. The fail-open read policy lives in the HTTP
//! layer; this module reports backend errors honestly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use courier_common::{CourierError, CourierResult, RedisConfig};

/// A cached submission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The response body returned to the first submission, stored verbatim.
    pub response_snapshot: Value,
    /// When the record was stored.
    pub stored_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Create a record for a response produced just now.
    pub fn new(response_snapshot: Value) -> Self {
        Self {
            response_snapshot,
            stored_at: Utc::now(),
        }
    }
}

/// Snapshot storage capability.
///
/// One interface, two implementations: the external key-value store for
/// deployments and an in-memory twin for tests and local mode.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Look up a record by key. A missing key is `None`, not an error.
    async fn get(&self, key: &str) -> CourierResult<Option<IdempotencyRecord>>;

    /// Store a record under a key with the configured TTL.
    async fn put(&self, key: &str, record: &IdempotencyRecord) -> CourierResult<()>;
}

/// Redis-backed snapshot store.
pub struct RedisSnapshotStore {
    redis: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisSnapshotStore {
    /// Connect to Redis with the given configuration.
    pub async fn new(config: &RedisConfig) -> CourierResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| CourierError::Idempotency(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CourierError::Idempotency(e.to_string()))?;

        Ok(Self {
            redis,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn get(&self, key: &str) -> CourierResult<Option<IdempotencyRecord>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .get(self.namespaced(key))
            .await
            .map_err(|e| CourierError::Idempotency(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let record: IdempotencyRecord = serde_json::from_str(&raw)
                    .map_err(|e| CourierError::Idempotency(e.to_string()))?;
                debug!(key, "idempotency hit");
                Ok(Some(record))
            }
        }
    }

    async fn put(&self, key: &str, record: &IdempotencyRecord) -> CourierResult<()> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| CourierError::Idempotency(e.to_string()))?;
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(self.namespaced(key), serialized, self.ttl_secs)
            .await
            .map_err(|e| CourierError::Idempotency(e.to_string()))?;
        Ok(())
    }
}

/// In-memory snapshot store for tests and local-only mode.
#[derive(Clone)]
pub struct MemorySnapshotStore {
    entries: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
    ttl: Duration,
}

impl MemorySnapshotStore {
    /// Create a store with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Create a store with the default 24 hour TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(86400))
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &str) -> CourierResult<Option<IdempotencyRecord>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            None => Ok(None),
            Some(record) => {
                let age = Utc::now().signed_duration_since(record.stored_at);
                if age.num_seconds() >= self.ttl.as_secs() as i64 {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(record.clone()))
                }
            }
        }
    }

    async fn put(&self, key: &str, record: &IdempotencyRecord) -> CourierResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), record.clone());
        Ok(())
    }
}

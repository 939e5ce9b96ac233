// =============================================================================
// reports/redis_store.rs - REPORTS IN REDIS
// =============================================================================
//
// For deployments where the dashboard API already talks to Redis.
//
//   {prefix}:report:{key}   STRING   the JSON document
//   {prefix}:reports        ZSET     every key, scored by write time
//
// The sorted set is the listing index, so readers never need KEYS/SCAN.
// The connection manager reconnects on its own; every command clones it.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::store::ReportStore;
use crate::error::StoreError;

pub struct RedisReportStore {
    con: ConnectionManager,
    prefix: String,
}

impl RedisReportStore {
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let con = ConnectionManager::new(client).await?;
        info!(prefix = %prefix, "Redis report store connected");
        Ok(Self {
            con,
            prefix: prefix.trim_end_matches(':').to_string(),
        })
    }

    fn document_key(&self, key: &str) -> String {
        format!("{}:report:{}", self.prefix, key)
    }

    fn index_key(&self) -> String {
        format!("{}:reports", self.prefix)
    }
}

#[async_trait]
impl ReportStore for RedisReportStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, key: &str, json: &str) -> Result<(), StoreError> {
        let mut con = self.con.clone();
        let _: () = con.set(self.document_key(key), json).await?;
        let _: () = con
            .zadd(self.index_key(), key, Utc::now().timestamp_millis() as f64)
            .await?;
        debug!(key = %key, bytes = json.len(), "Report written to Redis");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.con.clone();
        let body: Option<String> = con.get(self.document_key(key)).await?;
        Ok(body)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.con.clone();
        let all: Vec<String> = con.zrange(self.index_key(), 0, -1).await?;
        let mut keys: Vec<String> = all.into_iter().filter(|k| k.starts_with(prefix)).collect();
        keys.sort();
        Ok(keys)
    }
}

use super::engine::{SampleStore, ScanPage};
use crate::core::{ItemResult, Result, StoreError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, Pipeline, Value};
use std::collections::HashMap;
use log::{debug, warn};

/// Store backed by a redis server.
///
/// Uses one multiplexed connection; clones share it, so the store can be
/// handed to several engines at once.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    url: String,
}

impl RedisStore {
    /// Connect to `url` (`redis://` or `rediss://`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Config(format!("invalid redis url '{}': {}", url, e)))?;
        let conn = client.get_multiplexed_async_connection().await.map_err(|e| {
            warn!("redis connection failed: {}", e);
            StoreError::Connection(e.to_string())
        })?;
        debug!("connected to redis at {}", client.get_connection_info().addr);
        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn run(&self, op: &'static str, pipe: &Pipeline) -> Result<Vec<Value>> {
        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                if e.is_connection_dropped() || e.is_io_error() {
                    StoreError::Connection(e.to_string())
                } else {
                    StoreError::command(op, e.to_string())
                }
            })?;
        Ok(values)
    }

    fn expect_len(op: &'static str, values: &[Value], expected: usize) -> Result<()> {
        if values.len() != expected {
            return Err(StoreError::Protocol(format!(
                "{}: pipeline returned {} replies for {} commands",
                op,
                values.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Convert one pipeline reply, keeping server errors local to the item.
fn item<T: FromRedisValue>(op: &'static str, value: &Value) -> ItemResult<T> {
    if let Value::ServerError(err) = value {
        return Err(StoreError::command(op, format!("{:?}", err)));
    }
    redis::from_redis_value(value).map_err(|e| StoreError::command(op, e.to_string()))
}

#[async_trait]
impl SampleStore for RedisStore {
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Scan(e.to_string()))?;
        Ok(ScanPage { cursor, keys })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::command("smembers", e.to_string()))?;
        Ok(members)
    }

    async fn set_members_many(&self, keys: &[String]) -> Result<Vec<ItemResult<Vec<String>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.smembers(key);
        }
        let values = self.run("smembers", &pipe).await?;
        Self::expect_len("smembers", &values, keys.len())?;
        Ok(values.iter().map(|v| item("smembers", v)).collect())
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<ItemResult<bool>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.exists(key);
        }
        let values = self.run("exists", &pipe).await?;
        Self::expect_len("exists", &values, keys.len())?;
        Ok(values.iter().map(|v| item("exists", v)).collect())
    }

    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<ItemResult<HashMap<String, String>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        let values = self.run("hgetall", &pipe).await?;
        Self::expect_len("hgetall", &values, keys.len())?;
        Ok(values.iter().map(|v| item("hgetall", v)).collect())
    }

    async fn is_member_many(&self, checks: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        if checks.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for (set, member) in checks {
            pipe.sismember(set, member);
        }
        let values = self.run("sismember", &pipe).await?;
        Self::expect_len("sismember", &values, checks.len())?;
        Ok(values.iter().map(|v| item("sismember", v)).collect())
    }

    async fn add_members(&self, adds: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        if adds.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for (set, member) in adds {
            pipe.sadd(set, member);
        }
        let values = self.run("sadd", &pipe).await?;
        Self::expect_len("sadd", &values, adds.len())?;
        Ok(values
            .iter()
            .map(|v| item::<i64>("sadd", v).map(|added| added == 1))
            .collect())
    }

    async fn remove_members(&self, removes: &[(String, String)]) -> Result<usize> {
        if removes.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for (set, member) in removes {
            pipe.srem(set, member);
        }
        let values = self.run("srem", &pipe).await?;
        Self::expect_len("srem", &values, removes.len())?;
        let mut removed = 0usize;
        for value in &values {
            removed += item::<usize>("srem", value)?;
        }
        Ok(removed)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key);
        }
        let values = self.run("del", &pipe).await?;
        Self::expect_len("del", &values, keys.len())?;
        let mut deleted = 0usize;
        for value in &values {
            deleted += item::<usize>("del", value)?;
        }
        Ok(deleted)
    }
}

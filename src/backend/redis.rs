//! Redis-backed [`Backend`] implementation.
//!
//! Same `deadpool_redis::Pool` connection management as `redis/queue.rs`
//! and `redis/mod.rs`, and the same mix of `redis::AsyncCommands`
//! convenience calls and raw `redis::cmd(...)` for the handful of
//! commands not exposed as typed helpers in the pinned `redis` crate
//! version.

use super::{Backend, ScoredMember};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

/// Create a Redis connection pool, following the same shape as
/// `redis::create_pool`.
pub async fn create_pool(url: &str, pool_size: usize) -> QueueResult<Pool> {
    info!("creating redis connection pool for queue-core");

    let cfg = Config::from_url(url);
    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("invalid redis config: {e}")))?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("failed to create pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    Ok(pool)
}

/// Redis-backed store, using a shared connection pool.
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> QueueResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn hset(&self, key: &str, field: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> QueueResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hexists(&self, key: &str, field: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.hexists(key, field).await?)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> QueueResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zpopmin(&self, key: &str) -> QueueResult<Option<ScoredMember>> {
        let mut conn = self.conn().await?;
        let result: Vec<(String, f64)> = conn.zpopmin(key, 1).await?;
        Ok(result.into_iter().next())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> QueueResult<Vec<ScoredMember>> {
        let mut conn = self.conn().await?;
        let result: Vec<(String, f64)> = if limit == 0 {
            conn.zrangebyscore_withscores(key, min, max).await?
        } else {
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(min)
                .arg(max)
                .arg("WITHSCORES")
                .arg("LIMIT")
                .arg(0)
                .arg(limit)
                .query_async(&mut *conn)
                .await?
        };
        Ok(result)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.zrange(key, start as isize, stop as isize).await?)
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn zscore(&self, key: &str, member: &str) -> QueueResult<Option<f64>> {
        let mut conn = self.conn().await?;
        Ok(conn.zscore(key, member).await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut *conn)
            .await?;
        Ok(removed)
    }

    async fn ztrim_keep_highest(&self, key: &str, keep: u64) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let total: u64 = conn.zcard(key).await?;
        if total <= keep {
            return Ok(0);
        }
        let remove_count = total - keep;
        // Lowest-scored members occupy ranks [0, remove_count).
        let removed: u64 = redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(remove_count as isize - 1)
            .query_async(&mut *conn)
            .await?;
        Ok(removed)
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lpop(key, None).await?)
    }

    async fn rpop(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.rpop(key, None).await?)
    }

    async fn lindex(&self, key: &str, index: isize) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lindex(key, index).await?)
    }

    async fn lrem(&self, key: &str, value: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.lrem(key, 1, value).await?;
        Ok(removed > 0)
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn scard(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.scard(key).await?)
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: i64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        if ttl_ms > 0 {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut *conn)
                .await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn pttl(&self, key: &str) -> QueueResult<Option<i64>> {
        let mut conn = self.conn().await?;
        let ttl: i64 = conn.pttl(key).await?;
        // Redis PTTL: -2 missing key, -1 no expiry.
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    async fn incr(&self, key: &str) -> QueueResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire_px(&self, key: &str, ttl_ms: i64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.pexpire(key, ttl_ms).await?;
        Ok(())
    }

    async fn xadd(&self, key: &str, fields: &[(String, String)]) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        Ok(conn.xadd(key, "*", &items).await?)
    }

    async fn xtrim_approx(&self, key: &str, maxlen: u64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("XTRIM")
            .arg(key)
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

//! KV store abstraction.
//!
//! `Backend` exposes exactly the primitives the engine requires: mapping CRUD,
//! ordered-set by-score operations, ordered-sequence head/tail operations,
//! an expiring scalar, an integer counter, and a capped append-only stream.
//! Every call made through this trait happens while the caller (always
//! [`crate::engine::Engine`]) holds the single-writer guard, so the trait
//! itself carries no transactional API. Serialization is the engine's
//! job, not the backend's.

pub mod memory;
pub mod redis;

use crate::error::QueueResult;
use async_trait::async_trait;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// A member and its score, as returned by sorted-set range/pop operations.
pub type ScoredMember = (String, f64);

#[async_trait]
pub trait Backend: Send + Sync {
    // --- mapping (hash) ---
    async fn hset(&self, key: &str, field: &str, value: &str) -> QueueResult<()>;
    async fn hget(&self, key: &str, field: &str) -> QueueResult<Option<String>>;
    async fn hgetall(&self, key: &str) -> QueueResult<std::collections::HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> QueueResult<bool>;
    async fn hexists(&self, key: &str, field: &str) -> QueueResult<bool>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> QueueResult<i64>;
    async fn del(&self, key: &str) -> QueueResult<()>;

    // --- sorted set ---
    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()>;
    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool>;
    async fn zpopmin(&self, key: &str) -> QueueResult<Option<ScoredMember>>;
    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> QueueResult<Vec<ScoredMember>>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>>;
    async fn zcard(&self, key: &str) -> QueueResult<u64>;
    async fn zscore(&self, key: &str, member: &str) -> QueueResult<Option<f64>>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> QueueResult<u64>;
    /// Remove all but the `keep` highest-scored members, returning how many
    /// were removed. Used for count-based retention.
    async fn ztrim_keep_highest(&self, key: &str, keep: u64) -> QueueResult<u64>;

    // --- list (ordered sequence) ---
    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()>;
    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()>;
    async fn lpop(&self, key: &str) -> QueueResult<Option<String>>;
    async fn rpop(&self, key: &str) -> QueueResult<Option<String>>;
    async fn lindex(&self, key: &str, index: isize) -> QueueResult<Option<String>>;
    async fn lrem(&self, key: &str, value: &str) -> QueueResult<bool>;
    async fn llen(&self, key: &str) -> QueueResult<u64>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>>;

    // --- set ---
    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()>;
    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool>;
    async fn scard(&self, key: &str) -> QueueResult<u64>;
    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>>;

    // --- expiring scalar (locks, rate limiter) ---
    async fn set_px(&self, key: &str, value: &str, ttl_ms: i64) -> QueueResult<()>;
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;
    async fn pttl(&self, key: &str) -> QueueResult<Option<i64>>;

    // --- counter ---
    async fn incr(&self, key: &str) -> QueueResult<i64>;
    async fn expire_px(&self, key: &str, ttl_ms: i64) -> QueueResult<()>;

    // --- capped append-only stream ---
    async fn xadd(&self, key: &str, fields: &[(String, String)]) -> QueueResult<String>;
    async fn xtrim_approx(&self, key: &str, maxlen: u64) -> QueueResult<()>;
}

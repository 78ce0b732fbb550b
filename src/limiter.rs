//! Rate limiter.
//!
//! A token-bucket-like counter with a TTL, following the same throttling
//! pattern as `RedisJobQueue` but against the generic `Backend` trait
//! instead of raw `redis` calls, since the limiter must work identically
//! against `MemoryBackend` in tests.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;
use crate::priority;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub max: i64,
    pub duration_ms: i64,
}

/// Check whether the limiter currently admits a new active job. Returns
/// `Some(ttl_ms)` when the caller should defer (0 means check again
/// immediately), or `None` when the slot is available.
pub async fn check(
    backend: &dyn Backend,
    keys: &QueueKeys,
    config: &LimiterConfig,
) -> QueueResult<Option<i64>> {
    let counter_key = keys.rate_limiter();
    let current: i64 = backend
        .get(&counter_key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if current < config.max {
        return Ok(None);
    }

    let ttl = backend.pttl(&counter_key).await?.unwrap_or(0);
    if ttl <= 0 {
        backend.del(&counter_key).await?;
        return Ok(None);
    }
    Ok(Some(ttl))
}

/// Record a successful start: increment the counter, arming its expiry
/// the moment it transitions from 0 to 1.
pub async fn record_start(
    backend: &dyn Backend,
    keys: &QueueKeys,
    config: &LimiterConfig,
) -> QueueResult<()> {
    let counter_key = keys.rate_limiter();
    let updated = backend.incr(&counter_key).await?;
    if updated == 1 {
        backend.expire_px(&counter_key, config.duration_ms.abs()).await?;
    }
    Ok(())
}

/// Push an optimistically-activated job back onto the target list (or the
/// prioritized set) once the limiter rejects it after the fact, so it is
/// the next candidate when the limiter clears.
pub async fn push_back(
    backend: &dyn Backend,
    keys: &QueueKeys,
    target_list: &str,
    job_id: &str,
    priority_value: u32,
) -> QueueResult<()> {
    backend.lrem(&keys.active(), job_id).await?;
    if priority_value > 0 {
        priority::push_back_job_with_priority(backend, keys, job_id, priority_value).await?;
    } else {
        backend.rpush(target_list, job_id).await?;
    }
    warn!(job_id, "rate limiter rejected job after optimistic activation, pushed back");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn admits_until_max_then_defers() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        let config = LimiterConfig { max: 1, duration_ms: 1000 };

        assert_eq!(check(&backend, &keys, &config).await.unwrap(), None);
        record_start(&backend, &keys, &config).await.unwrap();

        let ttl = check(&backend, &keys, &config).await.unwrap();
        assert!(ttl.is_some());
        assert!(ttl.unwrap() > 0);
    }

    #[tokio::test]
    async fn reopens_once_ttl_elapses() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        let config = LimiterConfig { max: 1, duration_ms: 5 };

        record_start(&backend, &keys, &config).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        assert_eq!(check(&backend, &keys, &config).await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_back_returns_priority_job_ahead_of_peers() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        backend.lpush(&keys.active(), "X").await.unwrap();
        push_back(&backend, &keys, &keys.wait(), "X", 2).await.unwrap();
        assert_eq!(backend.llen(&keys.active()).await.unwrap(), 0);
        assert_eq!(backend.zscore(&keys.prioritized(), "X").await.unwrap(), Some(priority::packed_score(2, 0)));
    }
}

//! Queue configuration.
//!
//! Layered the way `JobsConfig` is: `#[serde(default = "fn")]` per field
//! so partial config documents still deserialize, with an explicit
//! `Default` impl per section. Worker pools and cron scheduling are
//! external collaborators, not something this crate configures, so
//! there is no `worker`/`scheduler` section here.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one queue's engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate limiter defaults.
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Retention and event-cap defaults.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Worker lease duration, in milliseconds, used by `moveToActive`'s
    /// lock write.
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            limiter: LimiterConfig::default(),
            retention: RetentionConfig::default(),
            lock_duration_ms: default_lock_duration_ms(),
        }
    }
}

fn default_lock_duration_ms() -> i64 {
    30_000
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for this queue's namespace.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "bull:default".to_string()
}

/// Rate limiter defaults. A queue without a limiter simply omits this
/// section from its config document and gets `max = 0`, which callers
/// should treat as "disabled" rather than constructing a
/// [`crate::limiter::LimiterConfig`] at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum jobs admitted per `duration_ms` window. `0` disables the
    /// limiter.
    #[serde(default)]
    pub max: i64,

    /// Window length in milliseconds.
    #[serde(default = "default_limiter_duration_ms")]
    pub duration_ms: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { max: 0, duration_ms: default_limiter_duration_ms() }
    }
}

fn default_limiter_duration_ms() -> i64 {
    1000
}

impl From<LimiterConfig> for Option<crate::limiter::LimiterConfig> {
    fn from(config: LimiterConfig) -> Self {
        if config.max <= 0 {
            None
        } else {
            Some(crate::limiter::LimiterConfig { max: config.max, duration_ms: config.duration_ms })
        }
    }
}

/// Retention and event-stream-cap defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Default `keepJobs.count` for completed jobs, `None` = unbounded.
    #[serde(default)]
    pub keep_completed_count: Option<u64>,

    /// Default `keepJobs.age` (seconds) for completed jobs.
    #[serde(default)]
    pub keep_completed_age_secs: Option<i64>,

    /// Default `keepJobs.count` for failed jobs.
    #[serde(default)]
    pub keep_failed_count: Option<u64>,

    /// Default `keepJobs.age` (seconds) for failed jobs.
    #[serde(default)]
    pub keep_failed_age_secs: Option<i64>,

    /// `meta.opts.maxLenEvents` — approximate cap on the `events` stream.
    #[serde(default = "default_max_len_events")]
    pub max_len_events: u64,

    /// `maxMetricsSize` — cap on the per-minute metrics series length.
    /// `0` disables metrics collection entirely.
    #[serde(default = "default_max_metrics_size")]
    pub max_metrics_size: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_completed_count: None,
            keep_completed_age_secs: None,
            keep_failed_count: None,
            keep_failed_age_secs: None,
            max_len_events: default_max_len_events(),
            max_metrics_size: default_max_metrics_size(),
        }
    }
}

fn default_max_len_events() -> u64 {
    10_000
}

fn default_max_metrics_size() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_partial_document() {
        let config: QueueConfig = serde_json::from_str(r#"{"redis": {"url": "redis://custom:6379"}}"#).unwrap();
        assert_eq!(config.redis.url, "redis://custom:6379");
        assert_eq!(config.redis.pool_size, default_pool_size());
        assert_eq!(config.limiter.max, 0);
    }

    #[test]
    fn limiter_disabled_when_max_is_zero() {
        let config = LimiterConfig::default();
        let runtime: Option<crate::limiter::LimiterConfig> = config.into();
        assert!(runtime.is_none());
    }
}

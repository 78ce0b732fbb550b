//! Metrics collector.
//!
//! A minute-granularity throughput series per terminal (`completed` or
//! `failed`). `prevTS`/`prevCount`/`count` live in the per-terminal meta
//! hash; `<metricsKey>:data` holds the per-minute deltas, capped at
//! `maxMetricsSize`. This is deliberately not a Prometheus-style global
//! registry: the series here is store-backed and scoped per
//! queue/terminal, which a process-global `metrics` registry cannot
//! express.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;
use crate::model::Terminal;

const MS_PER_MINUTE: i64 = 60_000;

fn terminal_label(terminal: Terminal) -> &'static str {
    match terminal {
        Terminal::Completed => "completed",
        Terminal::Failed => "failed",
    }
}

/// Record one finish event against the `terminal`'s per-minute series.
/// `max_metrics_size` of `0` disables collection entirely:
/// "if maxMetricsSize != ''").
pub async fn collect(
    backend: &dyn Backend,
    keys: &QueueKeys,
    terminal: Terminal,
    now: i64,
    max_metrics_size: u64,
) -> QueueResult<()> {
    if max_metrics_size == 0 {
        return Ok(());
    }

    let label = terminal_label(terminal);
    let meta_key = keys.metrics(label);
    let data_key = keys.metrics_data(label);

    let prev_ts: i64 = backend
        .hget(&meta_key, "prevTS")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let prev_count: i64 = backend
        .hget(&meta_key, "prevCount")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let count: i64 = backend
        .hget(&meta_key, "count")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
        + 1;

    if prev_ts == 0 {
        backend.hset(&meta_key, "prevTS", &now.to_string()).await?;
        backend.hset(&meta_key, "prevCount", &count.to_string()).await?;
        backend.hset(&meta_key, "count", &count.to_string()).await?;
        return Ok(());
    }

    let elapsed_minutes = (now - prev_ts) / MS_PER_MINUTE;
    if elapsed_minutes > 0 {
        let delta = count - prev_count;
        backend.lpush(&data_key, &delta.to_string()).await?;
        for _ in 1..elapsed_minutes {
            backend.lpush(&data_key, "0").await?;
        }

        let new_prev_ts = prev_ts + elapsed_minutes * MS_PER_MINUTE;
        backend.hset(&meta_key, "prevTS", &new_prev_ts.to_string()).await?;
        backend.hset(&meta_key, "prevCount", &count.to_string()).await?;
    }

    backend.hset(&meta_key, "count", &count.to_string()).await?;
    trim_data(backend, &data_key, max_metrics_size).await
}

async fn trim_data(backend: &dyn Backend, data_key: &str, max_metrics_size: u64) -> QueueResult<()> {
    let len = backend.llen(data_key).await?;
    if len <= max_metrics_size {
        return Ok(());
    }
    let overflow = len - max_metrics_size;
    for _ in 0..overflow {
        backend.rpop(data_key).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn first_collection_seeds_counters_without_emitting_a_point() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        collect(&backend, &keys, Terminal::Completed, 60_000, 100).await.unwrap();
        assert_eq!(backend.llen(&keys.metrics_data("completed")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn elapsed_minute_pushes_a_delta_point() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        collect(&backend, &keys, Terminal::Completed, 0, 100).await.unwrap();
        collect(&backend, &keys, Terminal::Completed, 60_000, 100).await.unwrap();
        assert_eq!(backend.llen(&keys.metrics_data("completed")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_when_cap_is_zero() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        collect(&backend, &keys, Terminal::Completed, 0, 0).await.unwrap();
        assert_eq!(backend.hgetall(&keys.metrics("completed")).await.unwrap().len(), 0);
    }
}

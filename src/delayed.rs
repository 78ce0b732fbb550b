//! Delayed index.
//!
//! `delayed` is a sorted set scored by `fire_time_ms * 2^12 + (counter &
//! 0xFFF)`: the fire time occupies the high bits, a 12-bit counter
//! tiebreaks jobs due at the same millisecond.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;
use crate::marker;
use crate::model::EventKind;

const COUNTER_MASK: i64 = 0xFFF;
const FIRE_TIME_SHIFT: i64 = 1 << 12;

/// Maximum number of delayed jobs promoted in a single `promoteDelayedJobs`
/// call, bounded so one promotion pass can't stall other work.
const MAX_PROMOTE_BATCH: usize = 1000;

pub fn packed_score(fire_time_ms: i64, counter: i64) -> f64 {
    (fire_time_ms * FIRE_TIME_SHIFT + (counter & COUNTER_MASK)) as f64
}

pub fn decode_fire_time(score: f64) -> i64 {
    (score as i64) / FIRE_TIME_SHIFT
}

/// Insert `job_id` into `delayed`, scored by the packed fire time.
pub async fn add_delayed(
    backend: &dyn Backend,
    keys: &QueueKeys,
    job_id: &str,
    fire_time_ms: i64,
    counter: i64,
) -> QueueResult<()> {
    let score = packed_score(fire_time_ms, counter);
    backend.zadd(&keys.delayed(), job_id, score).await
}

/// Minimum fire time currently scheduled, or `None` if `delayed` is empty.
pub async fn next_delayed_timestamp(
    backend: &dyn Backend,
    keys: &QueueKeys,
) -> QueueResult<Option<i64>> {
    let members = backend.zrangebyscore(&keys.delayed(), f64::MIN, f64::MAX, 1).await?;
    Ok(members.first().map(|(_, score)| decode_fire_time(*score)))
}

/// Outcome of promoting one delayed job, used by the engine to emit
/// `waiting` events after the batch completes.
pub struct Promoted {
    pub job_id: String,
    pub priority: u32,
}

/// Pop up to 1000 entries due at or before `now`, routing each into
/// `prioritized` (priority > 0) or the head of `target_list` (priority 0,
/// LIFO for promotion order). Clears `delay` on the job hash. Returns the
/// promoted job IDs in promotion order so the caller can emit `waiting`
/// events with `prev = "delayed"`.
pub async fn promote_delayed_jobs(
    backend: &dyn Backend,
    keys: &QueueKeys,
    target_list: &str,
    now: i64,
) -> QueueResult<Vec<Promoted>> {
    let cutoff = packed_score(now + 1, 0);
    let due = backend
        .zrangebyscore(&keys.delayed(), f64::MIN, cutoff, MAX_PROMOTE_BATCH)
        .await?;

    let mut promoted = Vec::with_capacity(due.len());
    for (job_id, _) in due {
        backend.zrem(&keys.delayed(), &job_id).await?;

        let priority: u32 = backend
            .hget(&keys.job(&job_id), "priority")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if priority > 0 {
            crate::priority::add_job_with_priority(backend, keys, &job_id, priority, target_list, false)
                .await?;
        } else {
            marker::strip_leading_marker(backend, target_list).await?;
            backend.lpush(target_list, &job_id).await?;
        }

        backend.hset(&keys.job(&job_id), "delay", "0").await?;
        backend
            .xadd(
                &keys.events(),
                &[
                    ("event".into(), EventKind::Waiting.to_string()),
                    ("jobId".into(), job_id.clone()),
                    ("prev".into(), "delayed".into()),
                ],
            )
            .await?;

        promoted.push(Promoted { job_id, priority });
    }

    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn fire_time_is_high_bits() {
        let score = packed_score(2000, 1);
        assert_eq!(score, 2000.0 * 4096.0 + 1.0);
        assert_eq!(decode_fire_time(score), 2000);
    }

    #[tokio::test]
    async fn next_timestamp_is_the_minimum() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        add_delayed(&backend, &keys, "late", 5000, 0).await.unwrap();
        add_delayed(&backend, &keys, "early", 1000, 0).await.unwrap();
        assert_eq!(next_delayed_timestamp(&backend, &keys).await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn promotes_due_jobs_and_clears_delay() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        backend.hset(&keys.job("B"), "priority", "0").await.unwrap();
        backend.hset(&keys.job("B"), "delay", "1000").await.unwrap();
        add_delayed(&backend, &keys, "B", 2000, 1).await.unwrap();

        let promoted = promote_delayed_jobs(&backend, &keys, &keys.wait(), 2000).await.unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].job_id, "B");
        assert_eq!(backend.hget(&keys.job("B"), "delay").await.unwrap().as_deref(), Some("0"));
        assert_eq!(backend.lindex(&keys.wait(), 0).await.unwrap().as_deref(), Some("B"));
    }
}

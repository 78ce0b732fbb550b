//! Priority index.
//!
//! `prioritized` is a sorted set scored by a packed `(priority, counter)`
//! key: `priority * 2^32 + (counter & 0xFFFF_FFFF_FFFF)`. Lower priority
//! numbers sort first; the counter tiebreaks same-priority entries in
//! insertion order.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;
use crate::marker;

const COUNTER_MASK: i64 = 0xFFFF_FFFF_FFFF;

pub fn packed_score(priority: u32, counter: i64) -> f64 {
    (priority as i64 * (1i64 << 32) + (counter & COUNTER_MASK)) as f64
}

/// Insert `job_id` into `prioritized` with a fresh counter value, then run
/// priority-marker logic if the queue is not paused.
pub async fn add_job_with_priority(
    backend: &dyn Backend,
    keys: &QueueKeys,
    job_id: &str,
    priority: u32,
    target_list: &str,
    paused: bool,
) -> QueueResult<()> {
    let counter = backend.incr(&keys.pc_counter()).await?;
    let score = packed_score(priority, counter);
    backend.zadd(&keys.prioritized(), job_id, score).await?;
    if !paused {
        marker::run_priority_marker(backend, target_list).await?;
    }
    Ok(())
}

/// Reinsert a job ahead of its same-priority peers (counter = 0). Used
/// only by rate-limiter rollback.
pub async fn push_back_job_with_priority(
    backend: &dyn Backend,
    keys: &QueueKeys,
    job_id: &str,
    priority: u32,
) -> QueueResult<()> {
    let score = packed_score(priority, 0);
    backend.zadd(&keys.prioritized(), job_id, score).await
}

/// Pop the minimum-scored entry from `prioritized`. If the set becomes
/// empty, delete the `pc` counter so the next insertion restarts
/// numbering at 0.
pub async fn move_job_from_priority_to_active(
    backend: &dyn Backend,
    keys: &QueueKeys,
) -> QueueResult<Option<String>> {
    let popped = backend.zpopmin(&keys.prioritized()).await?;
    if backend.zcard(&keys.prioritized()).await? == 0 {
        backend.del(&keys.pc_counter()).await?;
    }
    Ok(popped.map(|(member, _)| member))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn lower_priority_number_sorts_first() {
        assert!(packed_score(1, 0) < packed_score(2, 0));
    }

    #[test]
    fn counter_tiebreaks_same_priority() {
        assert!(packed_score(1, 10) < packed_score(1, 20));
    }

    #[tokio::test]
    async fn dequeues_in_priority_then_insertion_order() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        add_job_with_priority(&backend, &keys, "P", 2, "q:wait", false).await.unwrap();
        add_job_with_priority(&backend, &keys, "Q", 1, "q:wait", false).await.unwrap();

        let first = move_job_from_priority_to_active(&backend, &keys).await.unwrap();
        assert_eq!(first.as_deref(), Some("Q"));
        let second = move_job_from_priority_to_active(&backend, &keys).await.unwrap();
        assert_eq!(second.as_deref(), Some("P"));
    }

    #[tokio::test]
    async fn pc_counter_resets_once_prioritized_drains() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        add_job_with_priority(&backend, &keys, "A", 1, "q:wait", false).await.unwrap();
        move_job_from_priority_to_active(&backend, &keys).await.unwrap();
        assert_eq!(backend.get(&keys.pc_counter()).await.unwrap(), None);
    }
}

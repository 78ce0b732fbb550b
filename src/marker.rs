//! Marker discipline.
//!
//! Sentinel job IDs beginning with `"0:"` sit at the head of a target list
//! so a blocked worker pop notices priority/delay arrivals it would
//! otherwise not see. `"0:0"` is the priority marker; `"0:<fireTimeMs>"`
//! is the delay marker.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;

pub const PRIORITY_MARKER: &str = "0:0";

pub fn delay_marker(fire_time_ms: i64) -> String {
    format!("0:{fire_time_ms}")
}

pub fn is_marker(id: &str) -> bool {
    id.starts_with("0:")
}

/// If the target list is currently empty, push the priority marker at its
/// head. Called after inserting into `prioritized`.
pub async fn run_priority_marker(
    backend: &dyn Backend,
    target_list: &str,
) -> QueueResult<()> {
    if backend.llen(target_list).await? == 0 {
        backend.lpush(target_list, PRIORITY_MARKER).await?;
    }
    Ok(())
}

/// If the target list is empty and the delayed set is nonempty, push a
/// delay marker carrying the next fire time.
pub async fn run_delay_marker(
    backend: &dyn Backend,
    keys: &QueueKeys,
    target_list: &str,
) -> QueueResult<()> {
    if backend.llen(target_list).await? != 0 {
        return Ok(());
    }
    if let Some(next) = crate::delayed::next_delayed_timestamp(backend, keys).await? {
        backend.lpush(target_list, &delay_marker(next)).await?;
    }
    Ok(())
}

/// Remove a single leading `"0:"` sentinel from the head of `target_list`,
/// if present. Called before pushing a real job (promotion, retry,
/// changePriority).
pub async fn strip_leading_marker(backend: &dyn Backend, target_list: &str) -> QueueResult<()> {
    if let Some(head) = backend.lindex(target_list, 0).await? {
        if is_marker(&head) {
            backend.lrem(target_list, &head).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn priority_marker_only_pushed_when_list_empty() {
        let backend = MemoryBackend::new();
        run_priority_marker(&backend, "q:wait").await.unwrap();
        assert_eq!(backend.lindex("q:wait", 0).await.unwrap().as_deref(), Some(PRIORITY_MARKER));

        backend.lrem("q:wait", PRIORITY_MARKER).await.unwrap();
        backend.lpush("q:wait", "real-job").await.unwrap();
        run_priority_marker(&backend, "q:wait").await.unwrap();
        assert_eq!(backend.lindex("q:wait", 0).await.unwrap().as_deref(), Some("real-job"));
    }

    #[tokio::test]
    async fn strip_leading_marker_removes_only_sentinel() {
        let backend = MemoryBackend::new();
        backend.lpush("q:wait", "real-job").await.unwrap();
        backend.lpush("q:wait", PRIORITY_MARKER).await.unwrap();
        strip_leading_marker(&backend, "q:wait").await.unwrap();
        assert_eq!(backend.lindex("q:wait", 0).await.unwrap().as_deref(), Some("real-job"));
    }

    #[test]
    fn marker_vocabulary() {
        assert!(is_marker("0:0"));
        assert!(is_marker("0:1700000000000"));
        assert!(!is_marker("42"));
    }
}

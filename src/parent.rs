//! Parent/dependency propagator.
//!
//! A child may carry a [`crate::model::ParentRef`] naming a parent job
//! living in a *different* queue namespace. Completion and failure
//! cascade that parent (and, for `fpof`, its own ancestors) between
//! `waiting-children` and its ready/delayed/failed lanes. The ancestor
//! chain is walked iteratively with an explicit stack
//! rather than recursively, since adversarial inputs can build arbitrarily
//! deep chains.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;
use crate::marker;
use crate::model::{EventKind, ParentRef};
use tracing::debug;

/// One step of ancestor-cascade work: a parent that needs evaluating,
/// reached either directly from the failing/completing child or by
/// walking further up the chain.
struct CascadeStep {
    parent: ParentRef,
    child_key: String,
}

/// Cascade a child's **completion** to its parent, if any. Mirrors spec
/// §4.6's completion path: remove the child from the parent's dependency
/// set, record its return value, and if that empties the dependency set
/// while the parent sits in `waiting-children`, move the parent into its
/// own ready/delayed lane.
pub async fn on_child_completed(
    backend: &dyn Backend,
    child_keys: &QueueKeys,
    child_id: &str,
    parent: &ParentRef,
    returnvalue: &serde_json::Value,
) -> QueueResult<()> {
    let child_key = child_keys.job(child_id);
    settle_dependency(backend, parent, &child_key, Some(returnvalue)).await
}

/// Cascade a child's **failure** to its parent, applying `fpof`/`rdof` as
/// read from the child's own parent reference (never the parent's
/// options). `fpof` wins when both are set. Walks the ancestor chain
/// iteratively for `fpof`.
pub async fn on_child_failed(
    backend: &dyn Backend,
    child_keys: &QueueKeys,
    child_id: &str,
    parent: &ParentRef,
    now: i64,
) -> QueueResult<()> {
    let child_key = child_keys.job(child_id);

    if parent.fail_parent_on_fail {
        let mut stack = vec![CascadeStep { parent: parent.clone(), child_key: child_key.clone() }];
        while let Some(step) = stack.pop() {
            let moved = fail_parent(backend, &step.parent, &step.child_key, now).await?;
            if !moved {
                continue;
            }
            let grandparent_keys = QueueKeys::from_ref(&step.parent.queue);
            if let Some(grandparent) = read_parent_ref(backend, &grandparent_keys, step.parent.id.as_str()).await? {
                stack.push(CascadeStep {
                    parent: grandparent,
                    child_key: grandparent_keys.job(step.parent.id.as_str()),
                });
            }
        }
        return Ok(());
    }

    if parent.remove_dependency_on_fail {
        settle_dependency(backend, parent, &child_key, None).await?;
    }

    Ok(())
}

/// Shared completion/rdof-failure path: clear the dependency, optionally
/// record the return value, and if the parent's dependency set is now
/// empty while it sits in `waiting-children`, route it to its own
/// ready/delayed lane.
async fn settle_dependency(
    backend: &dyn Backend,
    parent: &ParentRef,
    child_key: &str,
    returnvalue: Option<&serde_json::Value>,
) -> QueueResult<()> {
    let parent_keys = QueueKeys::from_ref(&parent.queue);
    let parent_id = parent.id.as_str();

    backend.srem(&parent_keys.dependencies(parent_id), child_key).await?;
    if let Some(value) = returnvalue {
        backend
            .hset(&parent_keys.processed(parent_id), child_key, &value.to_string())
            .await?;
    }

    let remaining = backend.scard(&parent_keys.dependencies(parent_id)).await?;
    if remaining != 0 {
        return Ok(());
    }

    let was_waiting_children = backend
        .zrem(&parent_keys.waiting_children(), parent_id)
        .await?;
    if !was_waiting_children {
        return Ok(());
    }

    route_parent_to_ready_lane(backend, &parent_keys, parent_id).await
}

/// Move a parent out of `waiting-children` into its own `delayed` or
/// ready (wait/prioritized) lane, per its own stored `delay`/`priority`.
async fn route_parent_to_ready_lane(
    backend: &dyn Backend,
    parent_keys: &QueueKeys,
    parent_id: &str,
) -> QueueResult<()> {
    let job_key = parent_keys.job(parent_id);
    let delay: i64 = backend
        .hget(&job_key, "delay")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let priority: u32 = backend
        .hget(&job_key, "priority")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let target = crate::target::select_target(backend, parent_keys).await?;

    if delay > 0 {
        let counter = backend.incr(&parent_keys.pc_counter()).await?;
        crate::delayed::add_delayed(backend, parent_keys, parent_id, delay, counter).await?;
        emit(
            backend,
            parent_keys,
            EventKind::Delayed,
            parent_id,
            Some("waiting-children"),
        )
        .await?;
        marker::run_delay_marker(backend, parent_keys, &target.list_key).await?;
    } else if priority > 0 {
        crate::priority::add_job_with_priority(
            backend,
            parent_keys,
            parent_id,
            priority,
            &target.list_key,
            target.paused,
        )
        .await?;
        emit(
            backend,
            parent_keys,
            EventKind::Waiting,
            parent_id,
            Some("waiting-children"),
        )
        .await?;
    } else {
        marker::strip_leading_marker(backend, &target.list_key).await?;
        backend.lpush(&target.list_key, parent_id).await?;
        emit(
            backend,
            parent_keys,
            EventKind::Waiting,
            parent_id,
            Some("waiting-children"),
        )
        .await?;
    }

    debug!(parent_id, "parent routed out of waiting-children");
    Ok(())
}

/// `fpof` step for a single parent: move it straight to `failed`. Returns
/// whether the parent was actually in `waiting-children` (and therefore
/// moved) so the caller knows whether to keep walking the ancestor chain.
async fn fail_parent(
    backend: &dyn Backend,
    parent: &ParentRef,
    child_key: &str,
    now: i64,
) -> QueueResult<bool> {
    let parent_keys = QueueKeys::from_ref(&parent.queue);
    let parent_id = parent.id.as_str();

    let was_waiting_children = backend.zrem(&parent_keys.waiting_children(), parent_id).await?;
    if !was_waiting_children {
        return Ok(false);
    }

    let reason = format!("child {child_key} failed");
    backend.zadd(&parent_keys.failed(), parent_id, now as f64).await?;
    backend.hset(&parent_keys.job(parent_id), "failedReason", &reason).await?;
    backend
        .hset(&parent_keys.job(parent_id), "finishedOn", &now.to_string())
        .await?;

    emit_failed(backend, &parent_keys, parent_id, "waiting-children", &reason).await?;
    Ok(true)
}

async fn emit(
    backend: &dyn Backend,
    keys: &QueueKeys,
    event: EventKind,
    job_id: &str,
    prev: Option<&str>,
) -> QueueResult<()> {
    let mut fields = vec![
        ("event".to_string(), event.to_string()),
        ("jobId".to_string(), job_id.to_string()),
    ];
    if let Some(prev) = prev {
        fields.push(("prev".to_string(), prev.to_string()));
    }
    backend.xadd(&keys.events(), &fields).await?;
    Ok(())
}

async fn emit_failed(
    backend: &dyn Backend,
    keys: &QueueKeys,
    job_id: &str,
    prev: &str,
    reason: &str,
) -> QueueResult<()> {
    backend
        .xadd(
            &keys.events(),
            &[
                ("event".into(), EventKind::Failed.to_string()),
                ("jobId".into(), job_id.to_string()),
                ("prev".into(), prev.to_string()),
                ("failedReason".into(), reason.to_string()),
            ],
        )
        .await?;
    Ok(())
}

/// Read a job's own parent reference, if it has one, for ancestor-chain
/// walking. `None` if the job has no parent or the job hash is missing.
async fn read_parent_ref(
    backend: &dyn Backend,
    keys: &QueueKeys,
    job_id: &str,
) -> QueueResult<Option<ParentRef>> {
    match backend.hget(&keys.job(job_id), "parent").await? {
        Some(json) => Ok(serde_json::from_str(&json).ok()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::model::QueueRef;

    fn parent_ref(fpof: bool, rdof: bool) -> ParentRef {
        ParentRef {
            id: "P".into(),
            queue: QueueRef::new("q1"),
            fail_parent_on_fail: fpof,
            remove_dependency_on_fail: rdof,
        }
    }

    async fn seed_parent_waiting_on_children(backend: &MemoryBackend, child_ids: &[&str]) {
        let parent_keys = QueueKeys::new("q1");
        backend.zadd(&parent_keys.waiting_children(), "P", 1.0).await.unwrap();
        for child in child_ids {
            backend
                .sadd(&parent_keys.dependencies("P"), &format!("q2:{child}"))
                .await
                .unwrap();
        }
        backend.hset(&parent_keys.job("P"), "delay", "0").await.unwrap();
        backend.hset(&parent_keys.job("P"), "priority", "0").await.unwrap();
    }

    #[tokio::test]
    async fn completion_routes_parent_once_last_dependency_clears() {
        let backend = MemoryBackend::new();
        seed_parent_waiting_on_children(&backend, &["C1"]).await;
        let child_keys = QueueKeys::new("q2");

        on_child_completed(&backend, &child_keys, "C1", &parent_ref(false, false), &serde_json::json!("ok"))
            .await
            .unwrap();

        let parent_keys = QueueKeys::new("q1");
        assert_eq!(backend.zcard(&parent_keys.waiting_children()).await.unwrap(), 0);
        assert_eq!(backend.lindex(&parent_keys.wait(), 0).await.unwrap().as_deref(), Some("P"));
    }

    #[tokio::test]
    async fn completion_keeps_parent_waiting_if_siblings_remain() {
        let backend = MemoryBackend::new();
        seed_parent_waiting_on_children(&backend, &["C1", "C2"]).await;
        let child_keys = QueueKeys::new("q2");

        on_child_completed(&backend, &child_keys, "C1", &parent_ref(false, false), &serde_json::json!("ok"))
            .await
            .unwrap();

        let parent_keys = QueueKeys::new("q1");
        assert_eq!(backend.zcard(&parent_keys.waiting_children()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fpof_moves_parent_to_failed_with_reason() {
        let backend = MemoryBackend::new();
        seed_parent_waiting_on_children(&backend, &["C1"]).await;
        let child_keys = QueueKeys::new("q2");

        on_child_failed(&backend, &child_keys, "C1", &parent_ref(true, false), 5000)
            .await
            .unwrap();

        let parent_keys = QueueKeys::new("q1");
        assert_eq!(backend.zcard(&parent_keys.waiting_children()).await.unwrap(), 0);
        assert_eq!(backend.zcard(&parent_keys.failed()).await.unwrap(), 1);
        let reason = backend.hget(&parent_keys.job("P"), "failedReason").await.unwrap();
        assert_eq!(reason.as_deref(), Some("child q2:C1 failed"));
    }

    #[tokio::test]
    async fn fpof_wins_when_rdof_also_set() {
        let backend = MemoryBackend::new();
        seed_parent_waiting_on_children(&backend, &["C1"]).await;
        let child_keys = QueueKeys::new("q2");

        on_child_failed(&backend, &child_keys, "C1", &parent_ref(true, true), 5000)
            .await
            .unwrap();

        let parent_keys = QueueKeys::new("q1");
        assert_eq!(backend.zcard(&parent_keys.failed()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rdof_without_fpof_just_clears_dependency() {
        let backend = MemoryBackend::new();
        seed_parent_waiting_on_children(&backend, &["C1"]).await;
        let child_keys = QueueKeys::new("q2");

        on_child_failed(&backend, &child_keys, "C1", &parent_ref(false, true), 5000)
            .await
            .unwrap();

        let parent_keys = QueueKeys::new("q1");
        assert_eq!(backend.zcard(&parent_keys.failed()).await.unwrap(), 0);
        assert_eq!(backend.lindex(&parent_keys.wait(), 0).await.unwrap().as_deref(), Some("P"));
    }
}

//! Transition procedures and the single-writer concurrency guard that
//! keeps each one atomic.
//!
//! `Engine` owns a `Backend` and a `QueueKeys` prefix, plus an
//! `Arc<tokio::sync::Mutex<()>>` shared across every `Engine` that
//! addresses the same logical store. Cloning an `Engine` for a different
//! queue namespace (to reach a parent during cascade) must go through
//! [`Engine::for_queue`], which carries the same guard forward — that is
//! what keeps cross-queue parent cascades from interleaving with a
//! concurrent procedure on the parent's own queue.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::error::{QueueError, QueueResult};
use crate::events;
use crate::keys::QueueKeys;
use crate::limiter::{self, LimiterConfig};
use crate::marker;
use crate::model::{EventKind, EventRecord, JobId, JobOptions, JobRecord, KeepJobs, QueueRef, Terminal};
use crate::parent;
use crate::priority;
use crate::target;

/// Outcome of `moveToActive`/`moveToFinished(fetchNext = true)`.
#[derive(Debug, Clone, Default)]
pub struct ActiveSlot {
    pub job: Option<JobRecord>,
    pub job_id: Option<JobId>,
    pub rate_limit_ttl_ms: i64,
    pub next_delay_fire_time_ms: i64,
}

/// The atomic state machine over one queue namespace, sharing a
/// single-writer guard with every other `Engine` pointed at the same
/// logical store.
#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn Backend>,
    keys: QueueKeys,
    guard: Arc<Mutex<()>>,
    limiter: Option<LimiterConfig>,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>, queue_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            keys: QueueKeys::new(queue_prefix),
            guard: Arc::new(Mutex::new(())),
            limiter: None,
        }
    }

    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// A new `Engine` for a different queue namespace on the *same*
    /// store, sharing this engine's single-writer guard.
    pub fn for_queue(&self, queue_ref: &QueueRef) -> Self {
        Self {
            backend: self.backend.clone(),
            keys: QueueKeys::from_ref(queue_ref),
            guard: self.guard.clone(),
            limiter: self.limiter,
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// **add(opts, data)**: allocate a job ID, write its hash, and route
    /// it into the correct lane.
    pub async fn add(&self, name: &str, data: serde_json::Value, opts: JobOptions) -> QueueResult<JobId> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        if let Some(custom_id) = &opts.job_id {
            let job_id = JobId::from_user_supplied(custom_id.clone())?;
            if !backend.hgetall(&self.keys.job(job_id.as_str())).await?.is_empty() {
                return self.handle_duplicate(&job_id, &opts).await;
            }
        }

        if let Some(parent_key) = &opts.parent_key {
            if opts.parent.is_none() && backend.hgetall(parent_key).await?.is_empty() {
                return Err(QueueError::MissingParent(parent_key.clone()));
            }
        }

        let job_id = match &opts.job_id {
            Some(custom) => JobId::from_user_supplied(custom.clone())?,
            None => JobId::new(backend.incr(&self.keys.id_counter()).await?.to_string()),
        };

        let record = JobRecord {
            id: job_id.clone(),
            name: name.to_string(),
            data,
            timestamp: now_placeholder(),
            delay: opts.delay,
            priority: opts.priority,
            processed_on: None,
            finished_on: None,
            attempts_made: 0,
            attempts: opts.attempts,
            returnvalue: None,
            failed_reason: None,
            parent_key: opts.parent_key.clone(),
            parent: opts.parent.clone(),
            repeat_job_key: opts.repeat_job_key.clone(),
            keep_completed: opts.keep_completed,
            keep_failed: opts.keep_failed,
        };
        write_job_hash(backend, &self.keys, &record).await?;

        self.route_new_job(&job_id, &opts).await?;

        if let Some(dep_key) = &opts.parent_dependencies_key {
            backend.sadd(dep_key, &self.keys.job(job_id.as_str())).await?;
        }

        events::emit(backend, &self.keys, EventRecord::new(EventKind::Added, job_id.clone())).await?;
        info!(job_id = %job_id, %name, "job added");
        Ok(job_id)
    }

    async fn handle_duplicate(&self, job_id: &JobId, opts: &JobOptions) -> QueueResult<JobId> {
        let backend = self.backend();
        if let Some(parent) = &opts.parent {
            let in_completed = backend.zscore(&self.keys.completed(), job_id.as_str()).await?.is_some();
            if in_completed {
                let returnvalue = backend
                    .hget(&self.keys.job(job_id.as_str()), "returnvalue")
                    .await?
                    .and_then(|v| serde_json::from_str(&v).ok())
                    .unwrap_or(serde_json::Value::Null);
                parent::on_child_completed(backend, &self.keys, job_id.as_str(), parent, &returnvalue).await?;
            } else {
                let parent_keys = QueueKeys::from_ref(&parent.queue);
                backend
                    .sadd(&parent_keys.dependencies(parent.id.as_str()), &self.keys.job(job_id.as_str()))
                    .await?;
            }
        }
        events::emit(backend, &self.keys, EventRecord::new(EventKind::Duplicated, job_id.clone())).await?;
        Ok(job_id.clone())
    }

    async fn route_new_job(&self, job_id: &JobId, opts: &JobOptions) -> QueueResult<()> {
        let backend = self.backend();
        let target = target::select_target(backend, &self.keys).await?;

        if let Some(wait_children_key) = &opts.wait_children_key {
            backend.zadd(wait_children_key, job_id.as_str(), now_placeholder() as f64).await?;
            events::emit(
                backend,
                &self.keys,
                EventRecord::new(EventKind::WaitingChildren, job_id.clone()),
            )
            .await?;
            return Ok(());
        }

        if opts.delay > 0 {
            let counter = backend.incr(&self.keys.pc_counter()).await?;
            crate::delayed::add_delayed(backend, &self.keys, job_id.as_str(), opts.delay, counter).await?;
            events::emit(
                backend,
                &self.keys,
                EventRecord::new(EventKind::Delayed, job_id.clone()),
            )
            .await?;
            marker::run_delay_marker(backend, &self.keys, &target.list_key).await?;
            return Ok(());
        }

        if opts.priority > 0 {
            priority::add_job_with_priority(
                backend,
                &self.keys,
                job_id.as_str(),
                opts.priority,
                &target.list_key,
                target.paused,
            )
            .await?;
        } else if opts.lifo {
            backend.rpush(&target.list_key, job_id.as_str()).await?;
        } else {
            backend.lpush(&target.list_key, job_id.as_str()).await?;
        }

        events::emit(backend, &self.keys, EventRecord::new(EventKind::Waiting, job_id.clone())).await?;
        Ok(())
    }

    /// **moveToActive(now, opts, maybeJobId)**: promote due delays, pop the
    /// next job into `active`, then check the rate limiter; a rejection
    /// rolls the job back out of `active` instead of blocking the pop.
    /// `maybe_job_id` is a caller hint for a job it already believes is
    /// active; if that hint is a stale `"0:"` marker, it is stripped from
    /// `active` before normal selection proceeds.
    pub async fn move_to_active(
        &self,
        now: i64,
        token: &str,
        lock_duration_ms: i64,
        maybe_job_id: Option<&str>,
    ) -> QueueResult<ActiveSlot> {
        let _permit = self.guard.lock().await;
        self.move_to_active_locked(now, token, lock_duration_ms, maybe_job_id).await
    }

    async fn move_to_active_locked(
        &self,
        now: i64,
        token: &str,
        lock_duration_ms: i64,
        maybe_job_id: Option<&str>,
    ) -> QueueResult<ActiveSlot> {
        let backend = self.backend();

        let target = target::select_target(backend, &self.keys).await?;
        crate::delayed::promote_delayed_jobs(backend, &self.keys, &target.list_key, now).await?;

        if let Some(stale) = maybe_job_id {
            if marker::is_marker(stale) {
                backend.lrem(&self.keys.active(), stale).await?;
            }
        }

        if target.paused {
            return Ok(ActiveSlot::default());
        }

        let mut job_id = loop {
            match backend.rpop(&target.list_key).await? {
                Some(id) if marker::is_marker(&id) => continue,
                Some(id) => break Some(id),
                None => break None,
            }
        };

        if job_id.is_none() {
            job_id = priority::move_job_from_priority_to_active(backend, &self.keys).await?;
        }

        let Some(job_id) = job_id else {
            let next_delay = crate::delayed::next_delayed_timestamp(backend, &self.keys).await?.unwrap_or(0);
            return Ok(ActiveSlot { next_delay_fire_time_ms: next_delay, ..Default::default() });
        };

        // Optimistic activation: the job is already popped from its lane,
        // so a limiter rejection has to roll it back rather than just
        // refuse to pop.
        backend.lpush(&self.keys.active(), &job_id).await?;

        if let Some(config) = &self.limiter {
            if let Some(ttl) = limiter::check(backend, &self.keys, config).await? {
                let priority: u32 = backend
                    .hget(&self.keys.job(&job_id), "priority")
                    .await?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                limiter::push_back(backend, &self.keys, &target.list_key, &job_id, priority).await?;
                return Ok(ActiveSlot { rate_limit_ttl_ms: ttl, ..Default::default() });
            }
            limiter::record_start(backend, &self.keys, config).await?;
        }

        backend.srem(&self.keys.stalled(), &job_id).await.ok();
        backend.set_px(&self.keys.lock(&job_id), token, lock_duration_ms).await?;

        events::emit(backend, &self.keys, EventRecord::new(EventKind::Active, JobId::new(job_id.clone()))).await?;

        backend.hset(&self.keys.job(&job_id), "processedOn", &now.to_string()).await?;
        let attempts_made = backend.hincrby(&self.keys.job(&job_id), "attemptsMade", 1).await?;
        debug!(job_id = %job_id, attempts_made, "job moved to active");

        let record = read_job_record(backend, &self.keys, &job_id).await?;
        Ok(ActiveSlot {
            job: record,
            job_id: Some(JobId::new(job_id)),
            rate_limit_ttl_ms: 0,
            next_delay_fire_time_ms: 0,
        })
    }

    /// **moveToFinished(jobId, target, fieldName, fieldValue, fetchNext, now, opts)**:
    /// release the lock, settle any parent dependency, apply retention, and
    /// record the terminal outcome. When `fetch_next` is set, also performs
    /// an inline equivalent of `moveToActive(now)` for the same worker and
    /// returns its outcome, the same way a single round trip to the store
    /// would.
    #[allow(clippy::too_many_arguments)]
    pub async fn move_to_finished(
        &self,
        job_id: &str,
        terminal: Terminal,
        field_name: &str,
        field_value: &serde_json::Value,
        token: &str,
        now: i64,
        max_metrics_size: u64,
        fetch_next: bool,
        next_token: &str,
        next_lock_duration_ms: i64,
    ) -> QueueResult<Option<ActiveSlot>> {
        let _permit = self.guard.lock().await;
        self.move_to_finished_locked(
            job_id,
            terminal,
            field_name,
            field_value,
            token,
            now,
            max_metrics_size,
            fetch_next,
            next_token,
            next_lock_duration_ms,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn move_to_finished_locked(
        &self,
        job_id: &str,
        terminal: Terminal,
        field_name: &str,
        field_value: &serde_json::Value,
        token: &str,
        now: i64,
        max_metrics_size: u64,
        fetch_next: bool,
        next_token: &str,
        next_lock_duration_ms: i64,
    ) -> QueueResult<Option<ActiveSlot>> {
        let backend = self.backend();
        let job_key = self.keys.job(job_id);

        if backend.hgetall(&job_key).await?.is_empty() {
            return Err(QueueError::MissingJob(job_id.to_string()));
        }

        if token != "0" {
            self.validate_and_release_lock(job_id, token).await?;
        }

        if backend.scard(&self.keys.dependencies(job_id)).await? > 0 {
            return Err(QueueError::PendingDependencies(job_id.to_string()));
        }

        if !backend.lrem(&self.keys.active(), job_id).await? {
            return Err(QueueError::NotActive(job_id.to_string()));
        }

        let record = read_job_record(backend, &self.keys, job_id)
            .await?
            .ok_or_else(|| QueueError::MissingJob(job_id.to_string()))?;

        if let Some(parent) = &record.parent {
            match terminal {
                Terminal::Completed => {
                    parent::on_child_completed(backend, &self.keys, job_id, parent, field_value).await?;
                }
                Terminal::Failed => {
                    parent::on_child_failed(backend, &self.keys, job_id, parent, now).await?;
                }
            }
        }

        let keep = match terminal {
            Terminal::Completed => record.keep_completed,
            Terminal::Failed => record.keep_failed,
        };

        if keep.is_discard_immediately() {
            backend.del(&job_key).await?;
            backend.del(&self.keys.lock(job_id)).await?;
            backend.del(&self.keys.dependencies(job_id)).await?;
            backend.del(&self.keys.processed(job_id)).await?;
        } else {
            let terminal_set = match terminal {
                Terminal::Completed => self.keys.completed(),
                Terminal::Failed => self.keys.failed(),
            };
            backend.zadd(&terminal_set, job_id, now as f64).await?;
            backend.hset(&job_key, field_name, &field_value.to_string()).await?;
            backend.hset(&job_key, "finishedOn", &now.to_string()).await?;

            if let Some(max_age) = keep.age {
                events::remove_jobs_by_max_age(backend, &self.keys, &terminal_set, now, max_age).await?;
            }
            if let Some(max_count) = keep.count {
                events::remove_jobs_by_max_count(backend, &self.keys, &terminal_set, max_count).await?;
            }
        }

        let event_kind = match terminal {
            Terminal::Completed => EventKind::Completed,
            Terminal::Failed => EventKind::Failed,
        };
        let mut event = EventRecord::new(event_kind, JobId::new(job_id));
        match terminal {
            Terminal::Completed => event = event.with_returnvalue(field_value.clone()),
            Terminal::Failed => {
                if let Some(reason) = field_value.as_str() {
                    event = event.with_failed_reason(reason);
                }
            }
        }
        events::emit(backend, &self.keys, event).await?;

        if terminal == Terminal::Failed && record.attempts_made >= record.attempts {
            events::emit(
                backend,
                &self.keys,
                EventRecord::new(EventKind::RetriesExhausted, JobId::new(job_id)),
            )
            .await?;
        }

        crate::metrics::collect(backend, &self.keys, terminal, now, max_metrics_size).await?;
        info!(job_id, ?terminal, "job finished");

        let wait_len = backend.llen(&self.keys.wait()).await?;
        let active_len = backend.llen(&self.keys.active()).await?;
        let prioritized_len = backend.zcard(&self.keys.prioritized()).await?;
        if wait_len == 0 && active_len == 0 && prioritized_len == 0 {
            events::emit(backend, &self.keys, EventRecord::new(EventKind::Drained, JobId::new(job_id))).await?;
        }

        if fetch_next {
            let slot = self.move_to_active_locked(now, next_token, next_lock_duration_ms, None).await?;
            return Ok(Some(slot));
        }

        Ok(None)
    }

    /// **moveToDelayed(jobId, now, fireTimeMs, token)**: move an active
    /// job back into the delayed index.
    pub async fn move_to_delayed(&self, job_id: &str, now: i64, fire_time_ms: i64, token: &str) -> QueueResult<()> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        if token != "0" {
            self.validate_and_release_lock_keep(job_id, token).await?;
        }
        if !backend.lrem(&self.keys.active(), job_id).await? {
            return Err(QueueError::NotActive(job_id.to_string()));
        }

        let counter = backend.incr(&self.keys.pc_counter()).await?;
        crate::delayed::add_delayed(backend, &self.keys, job_id, fire_time_ms, counter).await?;
        backend.hset(&self.keys.job(job_id), "delay", &(fire_time_ms - now).max(0).to_string()).await?;

        events::emit(backend, &self.keys, EventRecord::new(EventKind::Delayed, JobId::new(job_id))).await?;

        let target = target::select_target(backend, &self.keys).await?;
        marker::run_delay_marker(backend, &self.keys, &target.list_key).await?;
        Ok(())
    }

    /// **promote(jobId)**: move a delayed job straight into its ready
    /// lane, ahead of its scheduled fire time.
    pub async fn promote(&self, job_id: &str) -> QueueResult<()> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        if !backend.zrem(&self.keys.delayed(), job_id).await? {
            return Err(QueueError::NotActive(job_id.to_string()));
        }

        let priority: u32 = backend
            .hget(&self.keys.job(job_id), "priority")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let target = target::select_target(backend, &self.keys).await?;
        marker::strip_leading_marker(backend, &target.list_key).await?;

        if priority > 0 {
            priority::add_job_with_priority(backend, &self.keys, job_id, priority, &target.list_key, target.paused)
                .await?;
        } else {
            backend.lpush(&target.list_key, job_id).await?;
        }

        backend.hset(&self.keys.job(job_id), "delay", "0").await?;
        events::emit(
            backend,
            &self.keys,
            EventRecord::new(EventKind::Waiting, JobId::new(job_id)).with_prev("delayed"),
        )
        .await?;
        Ok(())
    }

    /// **retry(jobId, token, pushCmd)**: requeue a failed job for another
    /// attempt.
    pub async fn retry(&self, job_id: &str, token: &str, lifo: bool, now: i64) -> QueueResult<()> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        let target = target::select_target(backend, &self.keys).await?;
        crate::delayed::promote_delayed_jobs(backend, &self.keys, &target.list_key, now).await?;

        if token != "0" {
            self.validate_and_release_lock_keep(job_id, token).await?;
        }
        if !backend.lrem(&self.keys.active(), job_id).await? {
            return Err(QueueError::NotActive(job_id.to_string()));
        }

        let priority: u32 = backend
            .hget(&self.keys.job(job_id), "priority")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if priority > 0 {
            priority::add_job_with_priority(backend, &self.keys, job_id, priority, &target.list_key, target.paused)
                .await?;
        } else if lifo {
            backend.rpush(&target.list_key, job_id).await?;
        } else {
            backend.lpush(&target.list_key, job_id).await?;
        }

        events::emit(
            backend,
            &self.keys,
            EventRecord::new(EventKind::Waiting, JobId::new(job_id)).with_prev("failed"),
        )
        .await?;
        Ok(())
    }

    /// **changePriority(jobId, newPriority, lifo)**: reposition a job
    /// within its current lane under a new priority.
    pub async fn change_priority(&self, job_id: &str, new_priority: u32, lifo: bool) -> QueueResult<()> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        if backend.hgetall(&self.keys.job(job_id)).await?.is_empty() {
            return Err(QueueError::MissingJob(job_id.to_string()));
        }

        if backend.zscore(&self.keys.prioritized(), job_id).await?.is_some() {
            backend.zrem(&self.keys.prioritized(), job_id).await?;
            priority::add_job_with_priority(backend, &self.keys, job_id, new_priority, &self.keys.wait(), false)
                .await?;
        } else {
            let target = target::select_target(backend, &self.keys).await?;
            if backend.lrem(&target.list_key, job_id).await? {
                if new_priority > 0 {
                    priority::add_job_with_priority(
                        backend,
                        &self.keys,
                        job_id,
                        new_priority,
                        &target.list_key,
                        target.paused,
                    )
                    .await?;
                } else if lifo {
                    backend.rpush(&target.list_key, job_id).await?;
                } else {
                    backend.lpush(&target.list_key, job_id).await?;
                }
            }
        }

        backend.hset(&self.keys.job(job_id), "priority", &new_priority.to_string()).await?;
        Ok(())
    }

    /// **moveStalledToWait** — external contract: stalled
    /// detection lives outside the core, but when it hands back a stale
    /// active job ID, the core must remove it from `stalled` and
    /// re-enqueue it exactly like a failed-then-retried job.
    pub async fn move_stalled_to_wait(&self, job_id: &str) -> QueueResult<()> {
        let _permit = self.guard.lock().await;
        let backend = self.backend();

        backend.lrem(&self.keys.active(), job_id).await?;
        backend.srem(&self.keys.stalled(), job_id).await?;
        backend.del(&self.keys.lock(job_id)).await?;

        let priority: u32 = backend
            .hget(&self.keys.job(job_id), "priority")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let target = target::select_target(backend, &self.keys).await?;

        if priority > 0 {
            priority::add_job_with_priority(backend, &self.keys, job_id, priority, &target.list_key, target.paused)
                .await?;
        } else {
            backend.rpush(&target.list_key, job_id).await?;
        }

        events::emit(
            backend,
            &self.keys,
            EventRecord::new(EventKind::Waiting, JobId::new(job_id)).with_prev("active"),
        )
        .await?;
        Ok(())
    }

    async fn validate_and_release_lock(&self, job_id: &str, token: &str) -> QueueResult<()> {
        self.validate_lock(job_id, token).await?;
        let backend = self.backend();
        backend.del(&self.keys.lock(job_id)).await?;
        backend.srem(&self.keys.stalled(), job_id).await.ok();
        Ok(())
    }

    async fn validate_and_release_lock_keep(&self, job_id: &str, token: &str) -> QueueResult<()> {
        self.validate_lock(job_id, token).await
    }

    async fn validate_lock(&self, job_id: &str, token: &str) -> QueueResult<()> {
        let backend = self.backend();
        match backend.get(&self.keys.lock(job_id)).await? {
            None => {
                error!(job_id, "no lock held for job");
                Err(QueueError::MissingLock(job_id.to_string()))
            }
            Some(current) if current != token => {
                error!(job_id, "lock token mismatch");
                Err(QueueError::LockMismatch(job_id.to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}

async fn write_job_hash(backend: &dyn Backend, keys: &QueueKeys, record: &JobRecord) -> QueueResult<()> {
    let key = keys.job(record.id.as_str());
    backend.hset(&key, "name", &record.name).await?;
    backend.hset(&key, "data", &record.data.to_string()).await?;
    backend.hset(&key, "timestamp", &record.timestamp.to_string()).await?;
    backend.hset(&key, "delay", &record.delay.to_string()).await?;
    backend.hset(&key, "priority", &record.priority.to_string()).await?;
    backend.hset(&key, "attemptsMade", "0").await?;
    backend.hset(&key, "attempts", &record.attempts.to_string()).await?;
    if let Some(parent_key) = &record.parent_key {
        backend.hset(&key, "parentKey", parent_key).await?;
    }
    if let Some(parent) = &record.parent {
        backend.hset(&key, "parent", &serde_json::to_string(parent)?).await?;
    }
    if let Some(rjk) = &record.repeat_job_key {
        backend.hset(&key, "rjk", rjk).await?;
    }
    if let Some(count) = record.keep_completed.count {
        backend.hset(&key, "keepCompletedCount", &count.to_string()).await?;
    }
    if let Some(age) = record.keep_completed.age {
        backend.hset(&key, "keepCompletedAge", &age.to_string()).await?;
    }
    if let Some(count) = record.keep_failed.count {
        backend.hset(&key, "keepFailedCount", &count.to_string()).await?;
    }
    if let Some(age) = record.keep_failed.age {
        backend.hset(&key, "keepFailedAge", &age.to_string()).await?;
    }
    Ok(())
}

async fn read_job_record(backend: &dyn Backend, keys: &QueueKeys, job_id: &str) -> QueueResult<Option<JobRecord>> {
    let map = backend.hgetall(&keys.job(job_id)).await?;
    if map.is_empty() {
        return Ok(None);
    }
    let get = |field: &str| map.get(field).cloned();
    let parse_i64 = |field: &str| get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
    let parse_u32 = |field: &str| get(field).and_then(|v| v.parse().ok()).unwrap_or(0);

    Ok(Some(JobRecord {
        id: JobId::new(job_id),
        name: get("name").unwrap_or_default(),
        data: get("data")
            .and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or(serde_json::Value::Null),
        timestamp: parse_i64("timestamp"),
        delay: parse_i64("delay"),
        priority: parse_u32("priority"),
        processed_on: get("processedOn").and_then(|v| v.parse().ok()),
        finished_on: get("finishedOn").and_then(|v| v.parse().ok()),
        attempts_made: parse_u32("attemptsMade"),
        attempts: parse_u32("attempts"),
        returnvalue: get("returnvalue").and_then(|v| serde_json::from_str(&v).ok()),
        failed_reason: get("failedReason"),
        parent_key: get("parentKey"),
        parent: get("parent").and_then(|v| serde_json::from_str(&v).ok()),
        repeat_job_key: get("rjk"),
        keep_completed: KeepJobs {
            count: get("keepCompletedCount").and_then(|v| v.parse().ok()),
            age: get("keepCompletedAge").and_then(|v| v.parse().ok()),
        },
        keep_failed: KeepJobs {
            count: get("keepFailedCount").and_then(|v| v.parse().ok()),
            age: get("keepFailedAge").and_then(|v| v.parse().ok()),
        },
    }))
}

/// Wall-clock source for the one field `add` records without the caller
/// passing "now" explicitly (every other transition procedure takes its
/// timestamp as a parameter, since the caller owns delay targets and
/// finish scores).
fn now_placeholder() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryBackend::new()), "q")
    }

    #[tokio::test]
    async fn scenario_a_round_trip_add_active_finished() {
        let engine = engine();
        let job_id = engine.add("send-email", serde_json::json!({}), JobOptions::default()).await.unwrap();

        let slot = engine.move_to_active(0, "t1", 5000, None).await.unwrap();
        assert_eq!(slot.job_id.as_ref(), Some(&job_id));
        assert_eq!(slot.rate_limit_ttl_ms, 0);

        engine
            .move_to_finished(job_id.as_str(), Terminal::Completed, "returnvalue", &serde_json::json!("r"), "t1", 10, 0, false, "0", 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scenario_c_priority_ordering_with_marker() {
        let engine = engine();
        engine
            .add("p", serde_json::json!({}), JobOptions { priority: 2, ..Default::default() })
            .await
            .unwrap();
        engine
            .add("q", serde_json::json!({}), JobOptions { priority: 1, ..Default::default() })
            .await
            .unwrap();

        let slot = engine.move_to_active(0, "t1", 5000, None).await.unwrap();
        assert_eq!(slot.job_id.unwrap().as_str(), "q");
    }

    #[tokio::test]
    async fn scenario_d_rate_limiter_defers_then_admits() {
        let engine = engine().with_limiter(LimiterConfig { max: 1, duration_ms: 1000 });
        engine.add("x", serde_json::json!({}), JobOptions::default()).await.unwrap();
        engine.add("y", serde_json::json!({}), JobOptions::default()).await.unwrap();

        let first = engine.move_to_active(0, "t1", 5000, None).await.unwrap();
        assert_eq!(first.job_id.unwrap().as_str(), "x");

        let deferred = engine.move_to_active(100, "t2", 5000, None).await.unwrap();
        assert!(deferred.job_id.is_none());
        assert!(deferred.rate_limit_ttl_ms > 0);
    }

    #[tokio::test]
    async fn change_priority_moves_job_between_scores() {
        let engine = engine();
        let job_id = engine
            .add("a", serde_json::json!({}), JobOptions { priority: 2, ..Default::default() })
            .await
            .unwrap();
        engine.change_priority(job_id.as_str(), 5, false).await.unwrap();

        let score = engine.backend().zscore(&engine.keys.prioritized(), job_id.as_str()).await.unwrap();
        assert!(score.unwrap() >= priority::packed_score(5, 0));
        let stored_priority = engine
            .backend()
            .hget(&engine.keys.job(job_id.as_str()), "priority")
            .await
            .unwrap();
        assert_eq!(stored_priority.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn move_to_finished_rejects_missing_job() {
        let engine = engine();
        let err = engine
            .move_to_finished("missing", Terminal::Completed, "returnvalue", &serde_json::json!("r"), "0", 0, 0, false, "0", 0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(-1));
    }

    #[tokio::test]
    async fn move_to_finished_rejects_wrong_lock_token() {
        let engine = engine();
        let job_id = engine.add("x", serde_json::json!({}), JobOptions::default()).await.unwrap();
        engine.move_to_active(0, "owner", 5000, None).await.unwrap();

        let err = engine
            .move_to_finished(job_id.as_str(), Terminal::Completed, "returnvalue", &serde_json::json!("r"), "intruder", 10, 0, false, "0", 0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(-6));
    }

    #[tokio::test]
    async fn keep_jobs_none_discards_completed_job_immediately() {
        let engine = engine();
        let job_id = engine
            .add(
                "x",
                serde_json::json!({}),
                JobOptions { keep_completed: KeepJobs::none(), ..Default::default() },
            )
            .await
            .unwrap();
        engine.move_to_active(0, "t1", 5000, None).await.unwrap();

        engine
            .move_to_finished(job_id.as_str(), Terminal::Completed, "returnvalue", &serde_json::json!("r"), "t1", 10, 0, false, "0", 0)
            .await
            .unwrap();

        assert_eq!(engine.backend().zcard(&engine.keys.completed()).await.unwrap(), 0);
        assert!(engine.backend().hgetall(&engine.keys.job(job_id.as_str())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keep_jobs_count_caps_retained_completed_jobs() {
        let engine = engine();
        for _ in 0..3 {
            let job_id = engine
                .add(
                    "x",
                    serde_json::json!({}),
                    JobOptions { keep_completed: KeepJobs { count: Some(2), age: None }, ..Default::default() },
                )
                .await
                .unwrap();
            engine.move_to_active(0, "t1", 5000, None).await.unwrap();
            engine
                .move_to_finished(job_id.as_str(), Terminal::Completed, "returnvalue", &serde_json::json!("r"), "t1", 10, 0, false, "0", 0)
                .await
                .unwrap();
        }

        assert_eq!(engine.backend().zcard(&engine.keys.completed()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn move_to_finished_fetch_next_returns_inline_active_slot() {
        let engine = engine();
        let first = engine.add("a", serde_json::json!({}), JobOptions::default()).await.unwrap();
        let second = engine.add("b", serde_json::json!({}), JobOptions::default()).await.unwrap();

        engine.move_to_active(0, "t1", 5000, None).await.unwrap();

        let slot = engine
            .move_to_finished(first.as_str(), Terminal::Completed, "returnvalue", &serde_json::json!("r"), "t1", 10, 0, true, "t2", 5000)
            .await
            .unwrap();

        let slot = slot.expect("fetch_next requested an inline active slot");
        assert_eq!(slot.job_id.as_ref(), Some(&second));
    }

    #[tokio::test]
    async fn move_to_active_strips_stale_marker_hint_from_active() {
        let engine = engine();
        let job_id = engine.add("x", serde_json::json!({}), JobOptions::default()).await.unwrap();
        engine.backend().lpush(&engine.keys.active(), "0:0").await.unwrap();

        let slot = engine.move_to_active(0, "t1", 5000, Some("0:0")).await.unwrap();

        assert_eq!(slot.job_id.as_ref(), Some(&job_id));
        assert!(!engine.backend().lrange(&engine.keys.active(), 0, -1).await.unwrap().contains(&"0:0".to_string()));
    }
}

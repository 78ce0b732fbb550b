//! Typed projections of the queue's untyped hash/stream fields.
//!
//! These types add no behavior of their own — they are mechanical Rust
//! shapes for the `<job>` hash, the `meta` hash, and stream entries, so
//! the rest of the crate can work with structured values instead of raw
//! string maps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job identifier. IDs beginning with `"0:"` are reserved for marker
/// sentinels and are rejected for user-supplied IDs by
/// [`JobId::from_user_supplied`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Wrap an internally generated ID (auto-incremented counter or a
    /// marker) without the reservation check.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Wrap a caller-supplied custom job ID, rejecting the reserved
    /// marker prefix.
    pub fn from_user_supplied(id: impl Into<String>) -> Result<Self, crate::error::QueueError> {
        let id = id.into();
        if id.starts_with("0:") {
            return Err(crate::error::QueueError::ReservedJobId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this ID is a marker sentinel (`"0:0"` priority marker or
    /// `"0:<timestamp>"` delay marker).
    pub fn is_marker(&self) -> bool {
        self.0.starts_with("0:")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An opaque queue namespace reference — a key prefix, not a hard-coded
/// queue name, so a parent living in a different queue (possibly on a
/// different logical store) can be addressed generically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRef {
    pub prefix: String,
}

impl QueueRef {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

/// Reference to a parent job, carried on the child. `fail_parent_on_fail`
/// and `remove_dependency_on_fail` are read from *this* (the child's)
/// reference when the child fails — never from the parent's own options
/// (a child's parent reference always wins over the parent's own
/// options). If both flags are set, `fail_parent_on_fail` wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: JobId,
    pub queue: QueueRef,
    #[serde(default)]
    pub fail_parent_on_fail: bool,
    #[serde(default)]
    pub remove_dependency_on_fail: bool,
}

/// Retention policy for a terminal (completed/failed) job. `count: Some(0)`
/// means "keep none" (the job hash and auxiliary keys are deleted
/// immediately instead of being inserted into the terminal set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepJobs {
    /// Maximum number of jobs to retain, most recent first. `None` means
    /// unbounded by count.
    pub count: Option<u64>,
    /// Maximum age in seconds. `None` means unbounded by age.
    pub age: Option<i64>,
}

impl KeepJobs {
    pub fn unbounded() -> Self {
        Self { count: None, age: None }
    }

    pub fn none() -> Self {
        Self { count: Some(0), age: None }
    }

    pub fn is_discard_immediately(&self) -> bool {
        self.count == Some(0)
    }
}

/// Options supplied to [`crate::engine::Engine::add`]. A mechanical,
/// typed equivalent of the untyped `opts` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Explicit caller-supplied job ID. `None` auto-allocates from the
    /// `id` counter.
    pub job_id: Option<String>,
    /// Priority; `0` routes through the plain list, `> 0` through the
    /// prioritized ordered set.
    pub priority: u32,
    /// Delay in milliseconds before the job becomes ready.
    pub delay: i64,
    /// At priority 0, push to the tail (LIFO) instead of the head (FIFO)
    /// of the target list.
    pub lifo: bool,
    /// Maximum attempts before a failure is terminal (used for the
    /// `retries-exhausted` event).
    pub attempts: u32,
    /// Parent reference, if this job is a child of another.
    pub parent: Option<ParentRef>,
    /// Full key path of the parent job hash, used only as a fallback when
    /// `parent` is absent.
    pub parent_key: Option<String>,
    /// Key of the set this job's ID should be added to as a dependency of
    /// some other job (the `parentDependenciesKey`).
    pub parent_dependencies_key: Option<String>,
    /// Route directly into `waiting-children` instead of a ready lane.
    pub wait_children_key: Option<String>,
    /// Retention policy applied when this job completes.
    pub keep_completed: KeepJobs,
    /// Retention policy applied when this job fails terminally.
    pub keep_failed: KeepJobs,
    /// Repeat-job key (`rjk`), opaque to the core — cron/repeat scheduling
    /// itself is an external collaborator.
    pub repeat_job_key: Option<String>,
}

/// The `<job>` hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
    pub delay: i64,
    pub priority: u32,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    pub attempts_made: u32,
    pub attempts: u32,
    pub returnvalue: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub parent_key: Option<String>,
    pub parent: Option<ParentRef>,
    pub repeat_job_key: Option<String>,
    pub keep_completed: KeepJobs,
    pub keep_failed: KeepJobs,
}

impl JobRecord {
    pub fn to_json(&self) -> Result<String, crate::error::QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, crate::error::QueueError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Lifecycle event kinds emitted to the `events` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Added,
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    RetriesExhausted,
    WaitingChildren,
    Duplicated,
    Drained,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// A single entry appended to the `events` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: EventKind,
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returnvalue: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_made: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EventRecord {
    pub fn new(event: EventKind, job_id: JobId) -> Self {
        Self {
            event,
            job_id,
            prev: None,
            delay: None,
            failed_reason: None,
            returnvalue: None,
            attempts_made: None,
            name: None,
        }
    }

    pub fn with_prev(mut self, prev: impl Into<String>) -> Self {
        self.prev = Some(prev.into());
        self
    }

    pub fn with_delay(mut self, delay: i64) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failed_reason(mut self, reason: impl Into<String>) -> Self {
        self.failed_reason = Some(reason.into());
        self
    }

    pub fn with_returnvalue(mut self, value: serde_json::Value) -> Self {
        self.returnvalue = Some(value);
        self
    }

    pub fn with_attempts_made(mut self, attempts: u32) -> Self {
        self.attempts_made = Some(attempts);
        self
    }
}

/// The terminal set a job is moved to by `moveToFinished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_job_id() {
        let err = JobId::from_user_supplied("0:123").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn accepts_ordinary_job_id() {
        let id = JobId::from_user_supplied("order-42").unwrap();
        assert!(!id.is_marker());
    }

    #[test]
    fn marker_detection() {
        assert!(JobId::new("0:0").is_marker());
        assert!(JobId::new("0:1700000000000").is_marker());
        assert!(!JobId::new("1").is_marker());
    }

    #[test]
    fn job_record_round_trips_through_json() {
        let record = JobRecord {
            id: JobId::new("1"),
            name: "send-email".into(),
            data: serde_json::json!({"to": "a@example.com"}),
            timestamp: 1000,
            delay: 0,
            priority: 0,
            processed_on: None,
            finished_on: None,
            attempts_made: 0,
            attempts: 3,
            returnvalue: None,
            failed_reason: None,
            parent_key: None,
            parent: None,
            repeat_job_key: None,
            keep_completed: KeepJobs::unbounded(),
            keep_failed: KeepJobs::unbounded(),
        };
        let json = record.to_json().unwrap();
        let restored = JobRecord::from_json(&json).unwrap();
        assert_eq!(restored.id, record.id);
        assert_eq!(restored.name, record.name);
    }
}

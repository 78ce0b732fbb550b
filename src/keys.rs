//! Key namespace builder.
//!
//! Generalizes `RedisKeys` into an opaque per-queue prefix: "queue
//! namespace" is just a key prefix carried with the parent reference,
//! never a hard-coded string. The same builder is used by both backends
//! so key shapes stay identical regardless of storage.

use crate::model::QueueRef;

/// Builds the concrete key names for every entity in a queue's namespace.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn from_ref(queue_ref: &QueueRef) -> Self {
        Self::new(queue_ref.prefix.clone())
    }

    pub fn as_ref(&self) -> QueueRef {
        QueueRef::new(self.prefix.clone())
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.prefix)
    }

    pub fn paused(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    pub fn prioritized(&self) -> String {
        format!("{}:prioritized", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    /// Stale active-job IDs, maintained by the external stalled-detection
    /// collaborator and consumed by `moveStalledToWait`.
    pub fn stalled(&self) -> String {
        format!("{}:stalled", self.prefix)
    }

    pub fn waiting_children(&self) -> String {
        format!("{}:waiting-children", self.prefix)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    pub fn meta(&self) -> String {
        format!("{}:meta", self.prefix)
    }

    pub fn id_counter(&self) -> String {
        format!("{}:id", self.prefix)
    }

    pub fn pc_counter(&self) -> String {
        format!("{}:pc", self.prefix)
    }

    pub fn events(&self) -> String {
        format!("{}:events", self.prefix)
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}:{}", self.prefix, job_id)
    }

    pub fn lock(&self, job_id: &str) -> String {
        format!("{}:{}:lock", self.prefix, job_id)
    }

    pub fn dependencies(&self, job_id: &str) -> String {
        format!("{}:{}:dependencies", self.prefix, job_id)
    }

    pub fn processed(&self, job_id: &str) -> String {
        format!("{}:{}:processed", self.prefix, job_id)
    }

    pub fn rate_limiter(&self) -> String {
        format!("{}:limiter", self.prefix)
    }

    pub fn metrics(&self, terminal: &str) -> String {
        format!("{}:metrics:{}", self.prefix, terminal)
    }

    pub fn metrics_data(&self, terminal: &str) -> String {
        format!("{}:metrics:{}:data", self.prefix, terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stable_key_shapes() {
        let keys = QueueKeys::new("bull:emails");
        assert_eq!(keys.wait(), "bull:emails:wait");
        assert_eq!(keys.job("42"), "bull:emails:42");
        assert_eq!(keys.lock("42"), "bull:emails:42:lock");
        assert_eq!(keys.dependencies("42"), "bull:emails:42:dependencies");
    }

    #[test]
    fn round_trips_through_queue_ref() {
        let keys = QueueKeys::new("bull:emails");
        let rebuilt = QueueKeys::from_ref(&keys.as_ref());
        assert_eq!(rebuilt.wait(), keys.wait());
    }
}

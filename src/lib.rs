//! Queue Core - atomic state machine for a distributed job queue
//!
//! Implements the transition procedures that move jobs between the
//! logical states *waiting*, *paused*, *prioritized*, *delayed*,
//! *active*, *waiting-children*, *completed*, and *failed*, atomically
//! against a pluggable [`Backend`](backend::Backend). Worker loops,
//! polling, payload serialization, and repeat/cron scheduling are
//! external collaborators — this crate owns only the state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Engine                                │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐     │
//! │  │  marker   │ │ priority  │ │  delayed  │ │  target   │     │
//! │  └───────────┘ └───────────┘ └───────────┘ └───────────┘     │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐                   │
//! │  │  limiter  │ │  parent   │ │  events   │                   │
//! │  └───────────┘ └───────────┘ └───────────┘                   │
//! │                       │                                       │
//! │                       ▼                                       │
//! │              ┌─────────────────┐                              │
//! │              │  Backend trait  │                              │
//! │              └────────┬────────┘                              │
//! │           ┌────────────────────────┐                          │
//! │           ▼                        ▼                          │
//! │   ┌───────────────┐      ┌──────────────────┐                 │
//! │   │ MemoryBackend │      │   RedisBackend    │                 │
//! │   └───────────────┘      └──────────────────┘                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_core::{Engine, JobOptions};
//! use queue_core::backend::MemoryBackend;
//! use std::sync::Arc;
//!
//! let engine = Engine::new(Arc::new(MemoryBackend::new()), "bull:emails");
//! let job_id = engine.add("send-email", serde_json::json!({"to": "a@example.com"}), JobOptions::default()).await?;
//! let slot = engine.move_to_active(now_ms, "worker-token", 30_000).await?;
//! ```

pub mod backend;
pub mod config;
pub mod delayed;
pub mod engine;
pub mod error;
pub mod events;
pub mod keys;
pub mod limiter;
pub mod marker;
pub mod metrics;
pub mod model;
pub mod parent;
pub mod priority;
pub mod target;

pub use config::QueueConfig;
pub use engine::{ActiveSlot, Engine};
pub use error::{QueueError, QueueResult};
pub use keys::QueueKeys;
pub use model::{EventKind, EventRecord, JobId, JobOptions, JobRecord, KeepJobs, ParentRef, QueueRef, Terminal};

/// Re-export of the types most callers need.
pub mod prelude {
    pub use crate::backend::{Backend, MemoryBackend};
    pub use crate::engine::{ActiveSlot, Engine};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::model::{EventKind, JobId, JobOptions, ParentRef, QueueRef, Terminal};
}

//! Target selector.
//!
//! Chooses between the `wait` and `paused` lists based on whether the
//! `paused` field is *present* in the `meta` hash — not its value. An
//! absent field means running; any stored value, including `"false"`,
//! means paused. Modeling this as `hexists` rather than
//! a Rust `bool` is what preserves the distinction through writes.

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::QueueKeys;

pub struct Target {
    pub list_key: String,
    pub paused: bool,
}

pub async fn select_target(backend: &dyn Backend, keys: &QueueKeys) -> QueueResult<Target> {
    let paused = backend.hexists(&keys.meta(), "paused").await?;
    let list_key = if paused { keys.paused() } else { keys.wait() };
    Ok(Target { list_key, paused })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn absence_of_paused_field_means_running() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        let target = select_target(&backend, &keys).await.unwrap();
        assert!(!target.paused);
        assert_eq!(target.list_key, keys.wait());
    }

    #[tokio::test]
    async fn presence_of_falsy_value_still_means_paused() {
        let backend = MemoryBackend::new();
        let keys = QueueKeys::new("q");
        backend.hset(&keys.meta(), "paused", "false").await.unwrap();
        let target = select_target(&backend, &keys).await.unwrap();
        assert!(target.paused);
        assert_eq!(target.list_key, keys.paused());
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// One async mutex per key, created on first use.
///
/// Used to give each instrument a single writer during sync.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.inner.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        debug!(key, "Acquiring keyed lock");
        slot.lock_owned().await
    }
}

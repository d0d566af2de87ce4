// Per-target deploy serialisation
// Two deploys to the same origin must not interleave their uploads, prune and
// manifest writes; deploys to different origins proceed independently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of one async lock per storage target
#[derive(Debug, Clone, Default)]
pub struct DeployLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other deploy holds `target_id`; released on drop
    pub async fn acquire(&self, target_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!(origin = %target_id, "Waiting for deploy lock");
        lock.lock_owned().await
    }

    /// Whether a deploy currently holds `target_id`
    pub fn is_locked(&self, target_id: &str) -> bool {
        self.locks
            .get(target_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

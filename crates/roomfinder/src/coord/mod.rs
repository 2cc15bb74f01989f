//! Cross-worker coordination: named locks, ingestion task markers and the
//! per-week warm cache.
//!
//! All three live behind traits so the same pipeline runs against Redis in
//! production and an in-process store in tests or single-node deployments.

mod memory;
mod redis;

pub use self::memory::MemoryCoordinator;
pub use self::redis::RedisCoordinator;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone)]
pub enum CoordError {
    #[error("Redis error: {message}")]
    Redis { message: String },

    #[error("Coordination backend timed out during {op}")]
    Timeout { op: &'static str },
}

impl From<::redis::RedisError> for CoordError {
    fn from(err: ::redis::RedisError) -> Self {
        CoordError::Redis {
            message: err.to_string(),
        }
    }
}

/// Single-attempt named locks with a holder token.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Stores `token` under `name` only if no live holder exists. Never waits.
    async fn acquire(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError>;

    /// Deletes `name` only if it still holds `token`.
    async fn release(&self, name: &str, token: &str) -> Result<bool, CoordError>;
}

/// State of one ingestion page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    InProgress,
    Finished,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::InProgress => "in-progress",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in-progress" => Some(TaskState::InProgress),
            "finished" => Some(TaskState::Finished),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// Short-lived idempotency markers for ingestion pages.
#[async_trait]
pub trait TaskMarkers: Send + Sync {
    async fn get_marker(&self, key: &str) -> Result<Option<TaskState>, CoordError>;

    async fn set_marker(&self, key: &str, state: TaskState, ttl: Duration)
        -> Result<(), CoordError>;
}

/// Per-(term, week) room availability snapshots.
#[async_trait]
pub trait WarmCache: Send + Sync {
    /// `None` when the key is absent or expired.
    async fn warm_entries(&self, key: &str) -> Result<Option<HashSet<String>>, CoordError>;

    /// Replaces whatever the key held with `entries` in one set-add, then
    /// sets the key's TTL.
    async fn store_warm_entries(
        &self,
        key: &str,
        entries: &[String],
        ttl: Duration,
    ) -> Result<(), CoordError>;
}

/// A held lock. Released explicitly with [`LockGuard::release`]; a guard
/// dropped without releasing hands the release to the current Tokio runtime,
/// so every exit path frees the lock.
pub struct LockGuard {
    name: String,
    token: String,
    service: Arc<dyn LockService>,
    done: bool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) -> Result<bool, CoordError> {
        self.done = true;
        let released = self.service.release(&self.name, &self.token).await?;
        if !released {
            warn!(lock = %self.name, "Lock expired before release");
        }
        Ok(released)
    }

    /// Leaves the lock in place until its TTL runs out.
    pub fn keep(mut self) {
        debug!(lock = %self.name, "Keeping lock until expiry");
        self.done = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let service = Arc::clone(&self.service);
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service.release(&name, &token).await {
                        warn!(lock = %name, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(lock = %name, "Lock dropped outside a runtime; it will expire by TTL"),
        }
    }
}

/// Makes one attempt at `name`. `Ok(None)` means another worker holds it,
/// which callers treat as a normal outcome.
pub async fn try_lock(
    service: &Arc<dyn LockService>,
    name: &str,
    ttl: Duration,
) -> Result<Option<LockGuard>, CoordError> {
    let token = format!("{:016x}", rand::thread_rng().gen::<u64>());
    if service.acquire(name, &token, ttl).await? {
        Ok(Some(LockGuard {
            name: name.to_string(),
            token,
            service: Arc::clone(service),
            done: false,
        }))
    } else {
        debug!(lock = %name, "Lock held elsewhere");
        Ok(None)
    }
}

/// Key layout shared by every backend.
pub mod keys {
    const PREFIX: &str = "roomfinder";

    pub fn reindex_lock(year: &str, semester: &str, page: u32) -> String {
        format!("{PREFIX}:lock:reindex:{year}:{semester}:page:{page}")
    }

    pub fn task_marker(year: &str, semester: &str, lock_name: &str) -> String {
        format!("{PREFIX}:task:{year}:{semester}:{lock_name}")
    }

    pub fn warm_cache(year: &str, semester: &str, week: u8) -> String {
        format!("{PREFIX}:free:{year}:{semester}:{week}")
    }

    pub fn warm_lock(year: &str, semester: &str, week: u8) -> String {
        format!("{PREFIX}:lock:warm:{year}:{semester}:{week}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_lock_attempt_fails_until_release() {
        let locks: Arc<dyn LockService> = Arc::new(MemoryCoordinator::new());

        let guard = try_lock(&locks, "page:1", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("first attempt wins");
        assert!(try_lock(&locks, "page:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());

        assert!(guard.release().await.unwrap());
        assert!(try_lock(&locks, "page:1", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let locks: Arc<dyn LockService> = coordinator.clone();

        {
            let _guard = try_lock(&locks, "page:2", Duration::from_secs(60))
                .await
                .unwrap()
                .unwrap();
        }

        for _ in 0..50 {
            if !coordinator.is_locked("page:2") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!coordinator.is_locked("page:2"));
    }

    #[tokio::test]
    async fn test_kept_guard_holds_lock() {
        let locks: Arc<dyn LockService> = Arc::new(MemoryCoordinator::new());
        try_lock(&locks, "warm", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap()
            .keep();
        tokio::task::yield_now().await;
        assert!(try_lock(&locks, "warm", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_task_state_strings() {
        for state in [TaskState::InProgress, TaskState::Finished, TaskState::Failed] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("done"), None);
    }

    #[test]
    fn test_keys_are_scoped() {
        assert_eq!(
            keys::reindex_lock("2024", "1", 3),
            "roomfinder:lock:reindex:2024:1:page:3"
        );
        assert_eq!(keys::warm_cache("2024", "1", 6), "roomfinder:free:2024:1:6");
        assert_ne!(keys::warm_lock("2024", "1", 6), keys::warm_cache("2024", "1", 6));
    }
}

//! In-process coordination store with per-entry TTLs.

use super::{CoordError, LockService, TaskMarkers, TaskState, WarmCache};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A stored value with its expiry.
#[derive(Clone)]
struct Expiring<T> {
    value: T,
    cached_at: Instant,
    ttl: Duration,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_live(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Thread-safe stand-in for the Redis coordinator.
///
/// Uses DashMap for concurrent access; the entry API makes lock acquisition
/// atomic per key.
#[derive(Default)]
pub struct MemoryCoordinator {
    values: DashMap<String, Expiring<String>>,
    sets: DashMap<String, Expiring<HashSet<String>>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `name` has a live holder.
    pub fn is_locked(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|e| e.is_live())
    }

    /// Removes expired entries.
    ///
    /// Call this periodically if you want proactive cleanup.
    pub fn cleanup_expired(&self) {
        self.values.retain(|_, entry| entry.is_live());
        self.sets.retain(|_, entry| entry.is_live());
    }

    /// Number of stored keys, expired ones included.
    pub fn len(&self) -> usize {
        self.values.len() + self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_live(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|entry| {
            if entry.is_live() {
                Some(entry.value.clone())
            } else {
                drop(entry);
                self.values.remove(key);
                None
            }
        })
    }
}

#[async_trait]
impl LockService for MemoryCoordinator {
    async fn acquire(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError> {
        match self.values.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    Ok(false)
                } else {
                    occupied.insert(Expiring::new(token.to_string(), ttl));
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Expiring::new(token.to_string(), ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool, CoordError> {
        Ok(self
            .values
            .remove_if(name, |_, entry| entry.is_live() && entry.value == token)
            .is_some())
    }
}

#[async_trait]
impl TaskMarkers for MemoryCoordinator {
    async fn get_marker(&self, key: &str) -> Result<Option<TaskState>, CoordError> {
        Ok(self.get_live(key).as_deref().and_then(TaskState::parse))
    }

    async fn set_marker(
        &self,
        key: &str,
        state: TaskState,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        self.values.insert(
            key.to_string(),
            Expiring::new(state.as_str().to_string(), ttl),
        );
        Ok(())
    }
}

#[async_trait]
impl WarmCache for MemoryCoordinator {
    async fn warm_entries(&self, key: &str) -> Result<Option<HashSet<String>>, CoordError> {
        let Some(entry) = self.sets.get(key) else {
            return Ok(None);
        };
        if entry.is_live() && !entry.value.is_empty() {
            return Ok(Some(entry.value.clone()));
        }
        drop(entry);
        self.sets.remove(key);
        Ok(None)
    }

    async fn store_warm_entries(
        &self,
        key: &str,
        entries: &[String],
        ttl: Duration,
    ) -> Result<(), CoordError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.sets.insert(
            key.to_string(),
            Expiring::new(entries.iter().cloned().collect(), ttl),
        );
        Ok(())
    }
}

//! Rate limit entry storage.
//!
//! The limiter only talks to [`RateLimitStore`], so a networked store can
//! replace [`MemoryStore`] without touching window accounting.

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;
use tokio::time::{Duration, Instant};

/// Request count for one key in its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub key: String,
    pub count: u64,
    pub window_start: Instant,
    pub expires_at: Instant,
}

impl RateLimitEntry {
    fn new(key: &str, now: Instant, window: Duration) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            window_start: now,
            expires_at: now + window,
        }
    }

    fn restart(&mut self, now: Instant, window: Duration) {
        self.count = 1;
        self.window_start = now;
        self.expires_at = now + window;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend for rate limit entries.
#[async_trait]
pub trait RateLimitStore: Send + Sync + std::fmt::Debug {
    /// Atomically record one hit for `key` and return the post-increment
    /// entry. Starts a fresh window when none exists or the old one expired.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: Instant,
    ) -> Result<RateLimitEntry, StoreError>;

    /// Forget `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every entry expired at `now`. Returns how many were removed.
    async fn sweep(&self, now: Instant) -> Result<usize, StoreError>;
}

/// In-process store. The DashMap entry lock serializes hits on the same key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: Instant,
    ) -> Result<RateLimitEntry, StoreError> {
        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    entry.restart(now, window);
                } else {
                    entry.count += 1;
                }
                entry.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(RateLimitEntry::new(key, now, window))
                .value()
                .clone(),
        };
        Ok(entry)
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sweep(&self, now: Instant) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(
                removed_entries = removed,
                remaining_entries = self.entries.len(),
                "Rate limiter sweep completed"
            );
        }
        Ok(removed)
    }
}

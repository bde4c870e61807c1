//! In-process store instance.
//!
//! Behaves like one independent key/value server: atomic set-if-absent with
//! expiry and compare-and-delete. Latency and availability can be changed at
//! runtime and every call is counted. Expiry follows `tokio::time`, so a
//! paused test clock drives it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::StoreError;
use crate::traits::{DeleteOutcome, LockStore};

/// `now + ttl`, saturating at roughly a century from `now`.
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60))
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// An in-memory [`LockStore`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    latency_micros: AtomicU64,
    available: AtomicBool,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty, available store with no added latency.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            latency_micros: AtomicU64::new(0),
            available: AtomicBool::new(true),
            set_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a store that delays every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.set_latency(latency);
        store
    }

    /// Changes the delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::Relaxed);
    }

    /// Makes the store refuse (`false`) or serve (`true`) calls.
    ///
    /// An unavailable store answers with [`StoreError::Unreachable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Returns the live value under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remaining time to live of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    /// True when no live key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `try_set` calls received.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::Relaxed)
    }

    /// Number of `try_delete` calls received.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::Relaxed)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_network(&self) -> Result<(), StoreError> {
        let latency = Duration::from_micros(self.latency_micros.load(Ordering::Relaxed));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::Relaxed) {
            return Err(StoreError::Unreachable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStore for MemoryStore {
    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_network().await?;

        let now = Instant::now();
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry_after(now, ttl),
            },
        );
        Ok(true)
    }

    async fn try_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_network().await?;

        let now = Instant::now();
        let mut entries = self.entries();
        let outcome = match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.value != expected => DeleteOutcome::Mismatch,
            Some(entry) if entry.is_live(now) => DeleteOutcome::Deleted,
            _ => DeleteOutcome::Absent,
        };
        // Expired entries are dropped along with our own
        if outcome != DeleteOutcome::Mismatch {
            entries.remove(key);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(1);
        assert!(store.try_set("k", "a", ttl).await.unwrap());
        assert!(!store.try_set("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));
        assert_eq!(store.set_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_is_stored() {
        let store = MemoryStore::new();
        assert!(store.try_set("k", "a", Duration::MAX).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));
        assert!(store.try_delete("k", "a").await.unwrap().is_deleted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        assert!(store.try_set("k", "a", Duration::from_millis(100)).await.unwrap());

        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(store.get("k"), None);
        assert!(store.try_set("k", "b", Duration::from_millis(100)).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store.try_set("k", "a", Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.try_delete("k", "b").await.unwrap(), DeleteOutcome::Mismatch);
        assert_eq!(store.try_delete("k", "a").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.try_delete("k", "a").await.unwrap(), DeleteOutcome::Absent);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);

        let result = store.try_set("k", "a", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StoreError::Unreachable(_))));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = MemoryStore::with_latency(Duration::from_millis(30));
        let start = Instant::now();
        store.try_set("k", "a", Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}

//! In-memory coordination store
//!
//! Single-process stand-in for the shared store. Expiry is measured on the
//! tokio clock, so tests running with paused time see keys expire exactly at
//! their TTL. Expired keys are removed lazily on the next access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    CoordinationStore, CreateOutcome, DeleteOutcome, Result, StoreError, SwapOutcome, WatchEvent,
    WatchStream,
};

const EVENT_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    events: broadcast::Sender<(String, WatchEvent)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            events,
        }
    }

    /// Simulate an outage: while unavailable every operation fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Unconditionally write `key`, as a competing writer would.
    pub fn force_set(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().insert(key.to_string(), Entry::new(value, ttl));
        self.notify(key, WatchEvent::Put(value.to_string()));
    }

    /// Read `key` regardless of availability
    pub fn peek(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        self.live_entry(&mut entries, key).map(|entry| entry.value.clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    /// Drop `key` if it has expired, then return what is left
    fn live_entry<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        let expired = entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()));

        if expired {
            entries.remove(key);
            debug!(key, "Key expired");
            self.notify(key, WatchEvent::Expired);
        }

        entries.get_mut(key)
    }

    fn notify(&self, key: &str, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send((key.to_string(), event));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<CreateOutcome> {
        self.check_available()?;
        let mut entries = self.entries.lock();

        if let Some(entry) = self.live_entry(&mut entries, key) {
            return Ok(CreateOutcome::AlreadyExists(entry.value.clone()));
        }

        entries.insert(key.to_string(), Entry::new(value, ttl));
        self.notify(key, WatchEvent::Put(value.to_string()));
        Ok(CreateOutcome::Created)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<SwapOutcome> {
        self.check_available()?;
        let mut entries = self.entries.lock();

        match self.live_entry(&mut entries, key) {
            None => Ok(SwapOutcome::NotFound),
            Some(entry) if entry.value != expected => Ok(SwapOutcome::Mismatch(entry.value.clone())),
            Some(entry) => {
                *entry = Entry::new(new_value, ttl);
                if expected != new_value {
                    self.notify(key, WatchEvent::Put(new_value.to_string()));
                }
                Ok(SwapOutcome::Swapped)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome> {
        self.check_available()?;
        let mut entries = self.entries.lock();

        let owned = self
            .live_entry(&mut entries, key)
            .map(|entry| entry.value == expected);

        match owned {
            None => Ok(DeleteOutcome::NotFound),
            Some(false) => Ok(DeleteOutcome::Mismatch),
            Some(true) => {
                entries.remove(key);
                self.notify(key, WatchEvent::Deleted);
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.peek(key))
    }

    async fn watch(&self, key: &str) -> Result<Option<WatchStream>> {
        self.check_available()?;

        let key = key.to_string();
        let rx = self.events.subscribe();

        let stream = futures::stream::unfold(rx, move |mut rx| {
            let key = key.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((changed, event)) if changed == key => return Some((event, rx)),
                        Ok(_) => continue,
                        // A lagging watcher may have missed a vacancy; end the
                        // stream so the caller re-reads the key.
                        Err(_) => return None,
                    }
                }
            }
        });

        Ok(Some(stream.boxed()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "/service/leader";
    const TTL: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryStore::new();

        assert_eq!(store.create_if_absent(KEY, "a", TTL).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create_if_absent(KEY, "b", TTL).await.unwrap(),
            CreateOutcome::AlreadyExists("a".to_string())
        );
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires_exactly_at_ttl() {
        let store = MemoryStore::new();
        store.create_if_absent(KEY, "a", TTL).await.unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get(KEY).await.unwrap(), None);
        assert_eq!(store.create_if_absent(KEY, "b", TTL).await.unwrap(), CreateOutcome::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_refreshes_ttl() {
        let store = MemoryStore::new();
        store.create_if_absent(KEY, "a", TTL).await.unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(store.compare_and_swap(KEY, "a", "a", TTL).await.unwrap(), SwapOutcome::Swapped);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_swap_outcomes() {
        let store = MemoryStore::new();
        assert_eq!(store.compare_and_swap(KEY, "a", "a", TTL).await.unwrap(), SwapOutcome::NotFound);

        store.force_set(KEY, "b", TTL);
        assert_eq!(
            store.compare_and_swap(KEY, "a", "a", TTL).await.unwrap(),
            SwapOutcome::Mismatch("b".to_string())
        );
        assert_eq!(store.peek(KEY).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_only_own_value() {
        let store = MemoryStore::new();
        assert_eq!(store.compare_and_delete(KEY, "a").await.unwrap(), DeleteOutcome::NotFound);

        store.create_if_absent(KEY, "a", TTL).await.unwrap();
        assert_eq!(store.compare_and_delete(KEY, "b").await.unwrap(), DeleteOutcome::Mismatch);
        assert_eq!(store.peek(KEY).as_deref(), Some("a"));

        assert_eq!(store.compare_and_delete(KEY, "a").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.peek(KEY), None);
    }

    #[tokio::test]
    async fn test_outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(store.create_if_absent(KEY, "a", TTL).await, Err(StoreError::Unavailable(_))));
        assert!(store.compare_and_swap(KEY, "a", "a", TTL).await.is_err());
        assert!(store.compare_and_delete(KEY, "a").await.is_err());
        assert!(store.get(KEY).await.is_err());
        assert!(store.watch(KEY).await.is_err());

        store.set_available(true);
        assert_eq!(store.create_if_absent(KEY, "a", TTL).await.unwrap(), CreateOutcome::Created);
    }

    #[tokio::test]
    async fn test_watch_reports_changes_for_its_key_only() {
        let store = MemoryStore::new();
        let mut events = store.watch(KEY).await.unwrap().unwrap();

        store.create_if_absent("/other/leader", "x", TTL).await.unwrap();
        store.create_if_absent(KEY, "a", TTL).await.unwrap();
        store.compare_and_delete(KEY, "a").await.unwrap();

        assert_eq!(events.next().await, Some(WatchEvent::Put("a".to_string())));
        let vacancy = events.next().await.unwrap();
        assert_eq!(vacancy, WatchEvent::Deleted);
        assert!(vacancy.is_vacancy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_expiry_on_access() {
        let store = MemoryStore::new();
        store.create_if_absent(KEY, "a", TTL).await.unwrap();
        let mut events = store.watch(KEY).await.unwrap().unwrap();

        tokio::time::advance(TTL).await;
        assert_eq!(store.get(KEY).await.unwrap(), None);
        assert_eq!(events.next().await, Some(WatchEvent::Expired));
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{KeyValueStore, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now_ms)
    }
}

/// Process-local store. Nothing survives a restart; flushes are counted so
/// callers can observe them.
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
    flushes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now_ms))
            .map(|entry| entry.value.clone()))
    }

    async fn expiration(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.inner.lock().get(key).and_then(|entry| entry.expires_at))
    }

    async fn set(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<()> {
        self.inner.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().clear();
        Ok(())
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, entry| entry.is_live(now_ms));
        Ok((before - inner.len()) as u64)
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

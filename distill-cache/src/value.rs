use std::sync::Arc;
use std::time::Duration;

use distill_core::Clock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{CacheError, KeyValueStore, Result};

/// JSON values over a [`KeyValueStore`], with expirations computed from the
/// injected clock.
#[derive(Clone)]
pub struct ValueCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ValueCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key, self.clock.now_ms()).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Malformed {
                key: key.to_string(),
                source,
            })
    }

    /// Stores `value` under `key`. Without a `ttl`, or with a zero one, the
    /// entry never expires.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| self.clock.deadline_after(ttl));
        self.store.set(key, &raw, expires_at).await?;
        debug!(key, ?expires_at, "stored cache entry");
        Ok(())
    }

    pub async fn expiration(&self, key: &str) -> Result<Option<i64>> {
        self.store.expiration(key).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_expired(self.clock.now_ms()).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

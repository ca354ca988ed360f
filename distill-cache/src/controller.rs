use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use distill_core::{Clock, FetchError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{CacheError, KeyValueStore, ValueCache};

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Cache-aside orchestration: lookups fall through to a fetch whose result
/// is stored with the caller's TTL. Every write is followed by a flush of
/// the backing store.
///
/// Concurrent misses on one key are serialized, so a single fetch serves
/// all of them.
pub struct CacheController {
    values: ValueCache,
    gates: Mutex<HashMap<String, Gate>>,
}

impl CacheController {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            values: ValueCache::new(store, clock),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn values(&self) -> &ValueCache {
        &self.values
    }

    #[instrument(skip(self, fetch))]
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, FetchError>> + Send,
    {
        if let Some(hit) = self.lookup(key).await? {
            debug!("cache hit");
            return Ok(hit);
        }

        let gate = GateGuard {
            gates: &self.gates,
            key,
            gate: self.gate(key),
        };
        self.fill(key, ttl, fetch, &gate.gate).await
    }

    async fn fill<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
        gate: &Gate,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, FetchError>> + Send,
    {
        let _turn = gate.lock().await;
        // Filled by whoever held the gate before us.
        if let Some(hit) = self.lookup(key).await? {
            debug!("cache hit after waiting");
            return Ok(hit);
        }
        debug!("cache miss");
        let fresh = fetch().await?;
        self.write(key, &fresh, ttl).await?;
        Ok(fresh)
    }

    /// Read-only lookup that never fetches.
    pub async fn probe<T>(&self, key: &str) -> Result<Option<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        let found = self.lookup(key).await?;
        debug!(key, hit = found.is_some(), "cache probe");
        Ok(found)
    }

    /// Fetches unconditionally and replaces whatever is cached.
    #[instrument(skip(self, fetch))]
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, FetchError>> + Send,
    {
        let fresh = fetch().await?;
        self.write(key, &fresh, ttl).await?;
        Ok(fresh)
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.write(key, value, ttl).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.values.remove(key).await?;
        debug!(key, "invalidated cache entry");
        self.values.flush().await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.values.clear().await?;
        debug!("cleared cache");
        self.values.flush().await
    }

    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let purged = self.values.purge_expired().await?;
        if purged > 0 {
            self.values.flush().await?;
        }
        debug!(purged, "purged expired cache entries");
        Ok(purged)
    }

    pub async fn expiration(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.values.expiration(key).await
    }

    async fn write<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.values.set(key, value, ttl).await?;
        self.values.flush().await
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FetchError> {
        match self.values.get(key).await {
            Ok(found) => Ok(found),
            Err(err @ CacheError::Malformed { .. }) => {
                warn!(key, error = %err, "evicting malformed cache entry");
                if let Err(remove_err) = self.values.remove(key).await {
                    warn!(key, error = %remove_err, "failed to evict malformed cache entry");
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn gate(&self, key: &str) -> Gate {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(key.to_string()).or_default())
    }

    #[cfg(test)]
    fn open_gates(&self) -> usize {
        self.gates.lock().len()
    }
}

/// Drops the key's gate from the map once its last user is gone, including
/// when a `get_or_fetch` future is cancelled mid-wait.
struct GateGuard<'a> {
    gates: &'a Mutex<HashMap<String, Gate>>,
    key: &'a str,
    gate: Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock();
        // One reference in the map and ours: nobody else is waiting.
        if Arc::strong_count(&self.gate) == 2 {
            gates.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use distill_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        cache: CacheController,
        fetches: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::new(10_000));
            let cache = CacheController::new(store.clone(), clock.clone());
            Self {
                store,
                clock,
                cache,
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn fetcher(
            &self,
            value: &'static str,
        ) -> impl FnOnce() -> std::pin::Pin<
            Box<dyn Future<Output = Result<String, FetchError>> + Send>,
        > {
            let fetches = Arc::clone(&self.fetches);
            move || {
                Box::pin(async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(value.to_string())
                })
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    const TTL: Option<Duration> = Some(Duration::from_millis(100));

    #[tokio::test(start_paused = true)]
    async fn entries_are_served_until_they_expire() {
        let fx = Fixture::new();
        let first = fx.cache.get_or_fetch("all_books", TTL, fx.fetcher("a")).await;
        assert_eq!(first, Ok("a".to_string()));

        fx.clock.advance(Duration::from_millis(50));
        let cached = fx.cache.get_or_fetch("all_books", TTL, fx.fetcher("b")).await;
        assert_eq!(cached, Ok("a".to_string()));
        assert_eq!(fx.fetch_count(), 1);

        fx.clock.advance(Duration::from_millis(100));
        let refetched = fx.cache.get_or_fetch("all_books", TTL, fx.fetcher("c")).await;
        assert_eq!(refetched, Ok("c".to_string()));
        assert_eq!(fx.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_never_fetches() {
        let fx = Fixture::new();
        assert_eq!(fx.cache.probe::<String>("app_config_theme").await, Ok(None));

        fx.cache
            .set("app_config_theme", "dark", None)
            .await
            .unwrap();
        assert_eq!(
            fx.cache.probe::<String>("app_config_theme").await,
            Ok(Some("dark".to_string()))
        );
        assert_eq!(fx.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let fx = Fixture::new();
        let (left, right) = futures::join!(
            fx.cache.get_or_fetch("book_7", TTL, fx.fetcher("first")),
            fx.cache.get_or_fetch("book_7", TTL, fx.fetcher("second")),
        );
        assert_eq!(left, Ok("first".to_string()));
        assert_eq!(right, Ok("first".to_string()));
        assert_eq!(fx.fetch_count(), 1);
        assert_eq!(fx.cache.open_gates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_flushed() {
        let fx = Fixture::new();
        fx.cache.get_or_fetch("book_1", TTL, fx.fetcher("x")).await.unwrap();
        assert_eq!(fx.store.flush_count(), 1);
        fx.cache.refresh("book_1", TTL, fx.fetcher("y")).await.unwrap();
        fx.cache.invalidate("book_1").await.unwrap();
        fx.cache.clear().await.unwrap();
        assert_eq!(fx.store.flush_count(), 4);
        assert!(fx.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_stores_nothing() {
        let fx = Fixture::new();
        let result: Result<String, _> = fx
            .cache
            .get_or_fetch("book_9", TTL, || async {
                Err(FetchError::Network {
                    status: 500,
                    message: "down".into(),
                })
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(500));
        assert!(fx.store.is_empty());
        assert_eq!(fx.cache.open_gates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_entry_is_evicted_and_refetched() {
        let fx = Fixture::new();
        fx.store.set("book_3", "not json", None).await.unwrap();

        let broken = fx.cache.get_or_fetch("book_3", TTL, fx.fetcher("ok")).await;
        assert!(matches!(broken, Err(FetchError::Malformed(_))));
        assert!(fx.store.is_empty());
        assert_eq!(fx.fetch_count(), 0);

        let repaired = fx.cache.get_or_fetch("book_3", TTL, fx.fetcher("ok")).await;
        assert_eq!(repaired, Ok("ok".to_string()));
        assert_eq!(fx.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let fx = Fixture::new();
        fx.cache.set("old", &1, TTL).await.unwrap();
        fx.cache.set("pinned", &2, None).await.unwrap();
        fx.clock.advance(Duration::from_millis(500));
        assert_eq!(fx.cache.purge_expired().await.unwrap(), 1);
        assert_eq!(fx.cache.expiration("old").await.unwrap(), None);
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_entries_are_fetched_once() {
        let fx = Fixture::new();
        for _ in 0..3 {
            let value = fx
                .cache
                .get_or_fetch("all_books", Some(Duration::ZERO), fx.fetcher("a"))
                .await;
            assert_eq!(value, Ok("a".to_string()));
            fx.clock.advance(Duration::from_secs(60));
        }
        assert_eq!(fx.fetch_count(), 1);
        assert_eq!(fx.cache.expiration("all_books").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_lookup_releases_its_gate() {
        let fx = Fixture::new();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            fx.cache.get_or_fetch("book_5", TTL, fx.fetcher("slow")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(fx.cache.open_gates(), 0);

        let value = fx.cache.get_or_fetch("book_5", TTL, fx.fetcher("fresh")).await;
        assert_eq!(value, Ok("fresh".to_string()));
        assert_eq!(fx.store.len(), 1);
    }
}

use async_trait::async_trait;

use crate::Result;

/// Raw string storage keyed by cache key. Expirations are absolute epoch
/// milliseconds; `None` never expires.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value only while it is live at `now_ms`.
    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<String>>;

    /// Stored expiration of `key`, whether or not it has passed.
    async fn expiration(&self, key: &str) -> Result<Option<i64>>;

    async fn set(&self, key: &str, value: &str, expires_at: Option<i64>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Deletes entries that expired at or before `now_ms`. Returns how many
    /// were removed.
    async fn purge_expired(&self, now_ms: i64) -> Result<u64>;

    /// Makes prior writes durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

//! Local key/value cache with per-entry expiration.
//!
//! Three layers: a raw [`KeyValueStore`] (SQLite or in-memory), the JSON
//! [`ValueCache`] on top of it, and the [`CacheController`] that combines
//! lookups with fetches from the network.

mod controller;
mod error;
mod memory;
mod sqlite;
mod storage;
mod value;

pub use controller::CacheController;
pub use error::{CacheError, Result};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use storage::KeyValueStore;
pub use value::ValueCache;

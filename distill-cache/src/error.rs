use distill_core::FetchError;
use thiserror::Error;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("cached value for `{key}` is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CacheError> for FetchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Malformed { .. } => FetchError::Malformed(err.to_string()),
            other => FetchError::Cache(other.to_string()),
        }
    }
}

use thiserror::Error;

/// Failure of a remote or cached content operation. Each variant is scoped
/// to the single operation that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request failed with status {status}: {message}")]
    Network { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("content still processing after {attempts} attempts")]
    PollTimeout { attempts: u32 },
    #[error("malformed data: {0}")]
    Malformed(String),
    #[error("cache failure: {0}")]
    Cache(String),
}

impl FetchError {
    /// True when the backend accepted the request but its job has not
    /// finished yet, as opposed to the request itself failing.
    pub fn is_still_processing(&self) -> bool {
        matches!(self, FetchError::PollTimeout { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Network { status, .. } => Some(*status),
            _ => None,
        }
    }
}

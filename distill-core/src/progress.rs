use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BookId, Clock, FetchError};

/// Remote sink for the reader's position.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save_progress(&self, book: &BookId, page: u32) -> Result<(), FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub book: BookId,
    pub last_computed_page: Option<u32>,
    pub last_persisted_page: u32,
    pub updated_at_ms: i64,
}

impl ReadingProgress {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.updated_at_ms).single()
    }
}

/// Decides on every tick whether the computed page needs a remote write.
///
/// Page 1 is never written and neither is the page already persisted. The
/// persisted page only moves after the store acknowledged a write, so a
/// failed write is retried by the next tick that computes the same page.
#[derive(Debug)]
pub struct ProgressTracker {
    progress: ReadingProgress,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(book: BookId, clock: Arc<dyn Clock>) -> Self {
        let progress = ReadingProgress {
            book,
            last_computed_page: None,
            last_persisted_page: 1,
            updated_at_ms: clock.now_ms(),
        };
        Self { progress, clock }
    }

    pub fn book(&self) -> &BookId {
        &self.progress.book
    }

    /// Records the page computed on this tick and returns the page to send,
    /// if any.
    pub fn observe(&mut self, computed: Option<u32>) -> Option<u32> {
        self.progress.last_computed_page = computed;
        self.progress.updated_at_ms = self.clock.now_ms();
        let page = computed?;
        if page == self.progress.last_persisted_page || page == 1 {
            debug!(page, "progress unchanged, skipping write");
            return None;
        }
        Some(page)
    }

    pub fn mark_persisted(&mut self, page: u32) {
        self.progress.last_persisted_page = page;
        self.progress.updated_at_ms = self.clock.now_ms();
    }

    pub fn snapshot(&self) -> ReadingProgress {
        self.progress.clone()
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{BookId, DistilledPage, FetchError, Section, SectionId};

/// Produces condensed content for a section, typically a cache lookup in
/// front of a poll of the distillation job.
#[async_trait]
pub trait SectionContentSource: Send + Sync {
    async fn load(&self, book: &BookId, section: &Section) -> Result<DistilledPage, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionState {
    Idle,
    Scheduled,
    Loading,
    Loaded(Arc<DistilledPage>),
    Failed(String),
}

impl SectionState {
    pub fn content(&self) -> Option<&DistilledPage> {
        match self {
            SectionState::Loaded(content) => Some(content),
            _ => None,
        }
    }
}

enum Slot {
    Scheduled {
        token: u64,
        fire_at: Instant,
        timer: JoinHandle<()>,
    },
    InFlight,
}

impl Slot {
    fn token(&self) -> Option<u64> {
        match self {
            Slot::Scheduled { token, .. } => Some(*token),
            Slot::InFlight => None,
        }
    }
}

#[derive(Default)]
struct LoaderInner {
    states: HashMap<SectionId, SectionState>,
    slots: HashMap<SectionId, Slot>,
    visible: BTreeSet<SectionId>,
    next_token: u64,
    disposed: bool,
}

/// Fetches condensed sections once they have stayed visible for the dwell
/// delay. At most one scheduled or in-flight fetch exists per section.
///
/// Scheduling spawns onto the current Tokio runtime.
pub struct LazyContentLoader {
    book: BookId,
    sections: Arc<HashMap<SectionId, Section>>,
    source: Arc<dyn SectionContentSource>,
    dwell: Duration,
    inner: Arc<Mutex<LoaderInner>>,
}

impl LazyContentLoader {
    pub fn new(
        book: BookId,
        sections: &[Section],
        source: Arc<dyn SectionContentSource>,
        dwell: Duration,
    ) -> Self {
        let sections = sections
            .iter()
            .map(|section| (section.index, section.clone()))
            .collect();
        Self {
            book,
            sections: Arc::new(sections),
            source,
            dwell,
            inner: Arc::new(Mutex::new(LoaderInner::default())),
        }
    }

    pub fn state(&self, section: SectionId) -> SectionState {
        self.inner
            .lock()
            .states
            .get(&section)
            .cloned()
            .unwrap_or(SectionState::Idle)
    }

    /// Scheduled fire time of a pending fetch, if any.
    pub fn pending_fire_time(&self, section: SectionId) -> Option<Instant> {
        match self.inner.lock().slots.get(&section) {
            Some(Slot::Scheduled { fire_at, .. }) => Some(*fire_at),
            _ => None,
        }
    }

    pub fn has_pending(&self, section: SectionId) -> bool {
        self.inner.lock().slots.contains_key(&section)
    }

    /// Replaces the visible section set. Sections that just appeared are
    /// scheduled, sections that left before their timer fired are cancelled.
    pub fn update_visible(&self, visible: &BTreeSet<SectionId>) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return;
        }
        let entered: Vec<SectionId> = visible.difference(&inner.visible).copied().collect();
        let left: Vec<SectionId> = inner.visible.difference(visible).copied().collect();
        inner.visible = visible.clone();

        for section in left {
            cancel_scheduled(&mut inner, section);
        }
        for section in entered {
            self.schedule(&mut inner, section);
        }
    }

    /// Re-arms a visible section whose last fetch failed.
    pub fn retry(&self, section: SectionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.disposed || !inner.visible.contains(&section) {
            return false;
        }
        if let Some(SectionState::Failed(_)) = inner.states.get(&section) {
            inner.states.insert(section, SectionState::Idle);
        }
        self.schedule(&mut inner, section)
    }

    /// Cancels every scheduled fetch. In-flight fetches run to completion
    /// but their results are dropped.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        inner.disposed = true;
        inner.visible.clear();
        for (section, slot) in inner.slots.drain() {
            if let Slot::Scheduled { timer, .. } = slot {
                timer.abort();
                debug!(section, "cancelled fetch on dispose");
            }
        }
    }

    fn schedule(&self, inner: &mut LoaderInner, section_id: SectionId) -> bool {
        if inner.slots.contains_key(&section_id) {
            return false;
        }
        if let Some(SectionState::Loaded(_)) = inner.states.get(&section_id) {
            return false;
        }
        let Some(section) = self.sections.get(&section_id).cloned() else {
            warn!(section = section_id, "visible section is not part of the document");
            return false;
        };

        inner.next_token += 1;
        let token = inner.next_token;
        let fire_at = Instant::now() + self.dwell;
        let dwell = self.dwell;
        let book = self.book.clone();
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            fire(shared, token, source, book, section).await;
        });

        inner.slots.insert(
            section_id,
            Slot::Scheduled {
                token,
                fire_at,
                timer,
            },
        );
        inner.states.insert(section_id, SectionState::Scheduled);
        debug!(section = section_id, ?dwell, "scheduled fetch");
        true
    }
}

impl Drop for LazyContentLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn cancel_scheduled(inner: &mut LoaderInner, section: SectionId) {
    if !matches!(inner.slots.get(&section), Some(Slot::Scheduled { .. })) {
        return;
    }
    if let Some(Slot::Scheduled { timer, .. }) = inner.slots.remove(&section) {
        timer.abort();
    }
    inner.states.insert(section, SectionState::Idle);
    debug!(section, "cancelled fetch before dwell elapsed");
}

async fn fire(
    shared: Arc<Mutex<LoaderInner>>,
    token: u64,
    source: Arc<dyn SectionContentSource>,
    book: BookId,
    section: Section,
) {
    let id = section.index;
    {
        let mut inner = shared.lock();
        match inner.slots.get_mut(&id) {
            // A slot re-armed after cancellation carries a newer token.
            Some(slot) if slot.token() == Some(token) => *slot = Slot::InFlight,
            _ => return,
        }
        inner.states.insert(id, SectionState::Loading);
    }

    info!(section = id, start = section.start_page, end = section.end_page, "loading condensed section");
    let result = source.load(&book, &section).await;

    let mut inner = shared.lock();
    inner.slots.remove(&id);
    if inner.disposed {
        debug!(section = id, "discarding result of disposed loader");
        return;
    }
    let state = match result {
        Ok(content) => SectionState::Loaded(Arc::new(content)),
        Err(err) => {
            warn!(section = id, error = %err, "failed to load condensed section");
            SectionState::Failed(err.to_string())
        }
    };
    inner.states.insert(id, state);
}

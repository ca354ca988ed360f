use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    BookId, Clock, ConfigError, Document, EngineConfig, LazyContentLoader, PageMapper,
    ProgressStore, ProgressTracker, ReadingMode, ReadingProgress, SectionContentSource, SectionId,
    SectionState, SystemClock, UnitId, UnitLayout, ViewportTracker,
};

/// Collaborators shared by every reader session of one engine.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub content: Arc<dyn SectionContentSource>,
    pub progress: Arc<dyn ProgressStore>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn SectionContentSource>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            config,
            content,
            progress,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened(BookId),
    ModeChanged(ReadingMode),
    PositionChanged(u32),
    ProgressSaved(u32),
    ProgressFailed { page: u32, error: String },
    Disposed,
}

struct SessionState {
    mode: ReadingMode,
    viewport: ViewportTracker,
    progress: ProgressTracker,
    last_position: u32,
}

struct Shared {
    book: BookId,
    mapper: PageMapper,
    store: Arc<dyn ProgressStore>,
    state: Mutex<SessionState>,
    events: Mutex<Vec<SessionEvent>>,
}

impl Shared {
    fn current_position(&self) -> Option<u32> {
        let state = self.state.lock();
        state.viewport.current_position(state.mode, &self.mapper)
    }

    async fn tick(&self) -> Option<u32> {
        let page = {
            let mut state = self.state.lock();
            let computed = state.viewport.current_position(state.mode, &self.mapper);
            state.progress.observe(computed)?
        };

        match self.store.save_progress(&self.book, page).await {
            Ok(()) => {
                self.state.lock().progress.mark_persisted(page);
                info!(book = %self.book, page, "saved reading progress");
                self.events.lock().push(SessionEvent::ProgressSaved(page));
                Some(page)
            }
            Err(err) => {
                warn!(book = %self.book, page, error = %err, "failed to save reading progress");
                self.events.lock().push(SessionEvent::ProgressFailed {
                    page,
                    error: err.to_string(),
                });
                None
            }
        }
    }
}

/// Reading state for one open document: visibility tracking, lazy loading
/// of condensed sections and periodic progress persistence.
///
/// Nothing runs in the background until [`ReaderSession::init`] is called.
/// Dropping the session disposes it.
pub struct ReaderSession {
    id: Uuid,
    document: Arc<Document>,
    tick_interval: Duration,
    shared: Arc<Shared>,
    loader: LazyContentLoader,
    ticker: Option<JoinHandle<()>>,
    disposed: bool,
}

impl ReaderSession {
    pub fn new(
        context: &EngineContext,
        document: Document,
        mode: ReadingMode,
    ) -> Result<Self, ConfigError> {
        context.config.validate()?;

        let id = Uuid::new_v4();
        let mapper = PageMapper::new(&document.sections);
        let loader = LazyContentLoader::new(
            document.id.clone(),
            &document.sections,
            Arc::clone(&context.content),
            context.config.dwell_delay,
        );
        let state = SessionState {
            mode,
            viewport: ViewportTracker::new(context.config.visibility_threshold),
            progress: ProgressTracker::new(document.id.clone(), Arc::clone(&context.clock)),
            last_position: 1,
        };
        let shared = Arc::new(Shared {
            book: document.id.clone(),
            mapper,
            store: Arc::clone(&context.progress),
            state: Mutex::new(state),
            events: Mutex::new(vec![SessionEvent::Opened(document.id.clone())]),
        });

        info!(
            session = %id,
            book = %document.id,
            sections = shared.mapper.section_count(),
            ?mode,
            "opened reader session"
        );

        Ok(Self {
            id,
            document: Arc::new(document),
            tick_interval: context.config.progress_tick,
            shared,
            loader,
            ticker: None,
            disposed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn mode(&self) -> ReadingMode {
        self.shared.state.lock().mode
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.shared.events.lock().clone()
    }

    pub fn progress(&self) -> ReadingProgress {
        self.shared.state.lock().progress.snapshot()
    }

    /// Starts the progress tick. The first tick fires one interval after
    /// this call. Calling it again is a no-op.
    pub fn init(&mut self) {
        if self.ticker.is_some() || self.disposed {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = self.tick_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.ticker = Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                shared.tick().await;
            }
        }));
        debug!(session = %self.id, ?period, "started progress ticker");
    }

    /// Runs one progress tick immediately. Returns the page written, if any.
    pub async fn tick_progress(&self) -> Option<u32> {
        self.shared.tick().await
    }

    /// Applies a batch of renderer layout reports. Returns true when the
    /// visible set changed.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn apply_layout<I>(&self, viewport_height: f64, reports: I) -> bool
    where
        I: IntoIterator<Item = UnitLayout>,
    {
        if self.disposed {
            return false;
        }
        let (changed, sections) = {
            let mut state = self.shared.state.lock();
            state.viewport.set_viewport_height(viewport_height);
            let changed = state.viewport.observe_all(reports);
            let sections: Option<BTreeSet<SectionId>> = match state.mode {
                ReadingMode::Condensed => Some(state.viewport.visible_sections().collect()),
                ReadingMode::Original => None,
            };
            if let Some(page) = state.viewport.current_position(state.mode, &self.shared.mapper) {
                if page != state.last_position {
                    state.last_position = page;
                    self.shared
                        .events
                        .lock()
                        .push(SessionEvent::PositionChanged(page));
                }
            }
            (changed, sections)
        };

        if let Some(sections) = sections {
            self.loader.update_visible(&sections);
        }
        changed
    }

    /// Switches the reading mode. Units of the previous mode are forgotten
    /// and pending condensed fetches are cancelled when leaving condensed
    /// reading.
    pub fn set_mode(&self, mode: ReadingMode) {
        {
            let mut state = self.shared.state.lock();
            if state.mode == mode {
                return;
            }
            state.mode = mode;
            state.viewport.clear();
        }
        if mode == ReadingMode::Original {
            self.loader.update_visible(&BTreeSet::new());
        }
        info!(session = %self.id, ?mode, "switched reading mode");
        self.shared
            .events
            .lock()
            .push(SessionEvent::ModeChanged(mode));
    }

    pub fn current_position(&self) -> Option<u32> {
        self.shared.current_position()
    }

    /// Page shown to the reader: the resolved position, or the last one
    /// resolved while nothing of the current mode is visible.
    pub fn display_page(&self) -> u32 {
        let state = self.shared.state.lock();
        state
            .viewport
            .current_position(state.mode, &self.shared.mapper)
            .unwrap_or(state.last_position)
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.document.total_pages == 0 {
            return 0.0;
        }
        let page = f64::from(self.display_page());
        (page * 100.0 / f64::from(self.document.total_pages)).min(100.0)
    }

    pub fn active_section(&self) -> Option<SectionId> {
        self.shared
            .mapper
            .map_original_to_condensed(self.display_page())
            .map(|found| found.section)
    }

    pub fn section_state(&self, section: SectionId) -> SectionState {
        self.loader.state(section)
    }

    pub fn retry(&self, section: SectionId) -> bool {
        self.loader.retry(section)
    }

    /// Unit to scroll to when reopening at a persisted page.
    pub fn resume_target(&self, saved_page: u32) -> Option<UnitId> {
        if saved_page <= 1 {
            return None;
        }
        match self.mode() {
            ReadingMode::Original => {
                Some(UnitId::Page(saved_page.min(self.document.total_pages.max(1))))
            }
            ReadingMode::Condensed => self
                .shared
                .mapper
                .map_original_to_condensed(saved_page)
                .map(|found| UnitId::Section(found.section)),
        }
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.loader.dispose();
        self.shared.events.lock().push(SessionEvent::Disposed);
        info!(session = %self.id, book = %self.shared.book, "disposed reader session");
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

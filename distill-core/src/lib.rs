use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

mod clock;
mod config;
mod error;
mod loader;
mod mapper;
mod poller;
mod progress;
mod session;
mod viewport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheTtls, ConfigError, EngineConfig};
pub use error::FetchError;
pub use loader::{LazyContentLoader, SectionContentSource, SectionState};
pub use mapper::{PageMapper, PageRange, SectionMatch};
pub use poller::{poll_until_ready, PollMachine, PollPolicy, PollResponse, PollState, PollStep};
pub use progress::{ProgressStore, ProgressTracker, ReadingProgress};
pub use session::{EngineContext, ReaderSession, SessionEvent};
pub use viewport::{page_from_progress, scroll_progress, visible_fraction, UnitLayout, ViewportTracker};

pub type BookId = String;
pub type SectionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    Original,
    #[default]
    Condensed,
}

/// Identifier of one rendered unit. Ordering follows document position:
/// pages by number, sections by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum UnitId {
    Page(u32),
    Section(SectionId),
}

impl UnitId {
    pub fn as_page(self) -> Option<u32> {
        match self {
            UnitId::Page(page) => Some(page),
            UnitId::Section(_) => None,
        }
    }

    pub fn as_section(self) -> Option<SectionId> {
        match self {
            UnitId::Section(id) => Some(id),
            UnitId::Page(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub index: SectionId,
    pub start_page: u32,
    pub end_page: u32,
    pub title: String,
}

impl Section {
    pub fn range(&self) -> PageRange {
        PageRange::new(self.start_page, self.end_page)
    }

    pub fn contains(&self, page: u32) -> bool {
        self.range().contains(page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: BookId,
    pub total_pages: u32,
    pub sections: Vec<Section>,
}

impl Document {
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|section| section.index == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphKind {
    Core,
    Transition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(rename = "type")]
    pub kind: ParagraphKind,
    pub content: String,
    pub pages: Vec<u32>,
}

/// Condensed content produced by the distillation job for one page range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistilledPage {
    pub start_page: u32,
    pub end_page: u32,
    pub paragraphs: Vec<Paragraph>,
}

impl DistilledPage {
    /// Original pages cited by any paragraph, ascending.
    pub fn source_pages(&self) -> BTreeSet<u32> {
        self.paragraphs
            .iter()
            .flat_map(|paragraph| paragraph.pages.iter().copied())
            .collect()
    }

    /// Paragraphs derived from the given original page.
    pub fn paragraphs_citing(&self, page: u32) -> impl Iterator<Item = &Paragraph> {
        self.paragraphs
            .iter()
            .filter(move |paragraph| paragraph.pages.contains(&page))
    }
}

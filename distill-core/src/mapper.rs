use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Section, SectionId};

/// Inclusive range of original page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, page: u32) -> bool {
        self.start <= page && page <= self.end
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionMatch {
    pub section: SectionId,
    pub range: PageRange,
}

/// Bidirectional lookup between original pages and condensed sections.
///
/// Sections are sorted by start page before indexing. When ranges overlap
/// the earliest-starting section owns the shared pages; pages not covered
/// by any section map to `None`. Lookups binary-search the owned ranges,
/// so memory grows with the number of sections, not with page numbers.
#[derive(Debug, Clone, Default)]
pub struct PageMapper {
    owned: Vec<(PageRange, SectionId)>,
    by_section: HashMap<SectionId, PageRange>,
}

impl PageMapper {
    pub fn new(sections: &[Section]) -> Self {
        let mut ordered: Vec<&Section> = sections.iter().collect();
        ordered.sort_by_key(|section| (section.start_page, section.index));

        let mut owned = Vec::with_capacity(ordered.len());
        let mut by_section = HashMap::with_capacity(ordered.len());
        // First page not yet claimed by an earlier section.
        let mut next_free: u64 = 1;

        for section in ordered {
            let range = section.range();
            if range.is_empty() || range.start == 0 {
                warn!(
                    section = section.index,
                    start = range.start,
                    end = range.end,
                    "ignoring section with invalid page range"
                );
                continue;
            }
            if by_section.insert(section.index, range).is_some() {
                warn!(section = section.index, "duplicate section index");
            }
            let start = u64::from(range.start).max(next_free);
            if start > u64::from(range.end) {
                continue;
            }
            // start <= range.end, so it fits in u32.
            owned.push((PageRange::new(start as u32, range.end), section.index));
            next_free = u64::from(range.end) + 1;
        }

        Self { owned, by_section }
    }

    pub fn map_original_to_condensed(&self, page: u32) -> Option<SectionMatch> {
        let after = self.owned.partition_point(|(range, _)| range.start <= page);
        let (owned, section) = *self.owned.get(after.checked_sub(1)?)?;
        if !owned.contains(page) {
            return None;
        }
        let range = *self.by_section.get(&section)?;
        Some(SectionMatch { section, range })
    }

    pub fn map_condensed_to_original(&self, section: SectionId) -> Option<PageRange> {
        self.by_section.get(&section).copied()
    }

    pub fn section_count(&self) -> usize {
        self.by_section.len()
    }
}

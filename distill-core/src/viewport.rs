use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::mapper::{PageMapper, PageRange};
use crate::{ReadingMode, SectionId, UnitId};

/// Layout rectangle of one rendered unit, relative to the top of the
/// viewport. Negative `top` means the unit starts above the visible area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitLayout {
    pub unit: UnitId,
    pub top: f64,
    pub height: f64,
}

impl UnitLayout {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn intersects(&self, viewport_height: f64) -> bool {
        self.height > 0.0 && self.bottom() > 0.0 && self.top < viewport_height
    }
}

/// Share of the unit treated as visible, in `[.., 1]`.
pub fn visible_fraction(layout: &UnitLayout, viewport_height: f64) -> f64 {
    if layout.height <= 0.0 {
        return 0.0;
    }
    let hidden_above = (-layout.top).max(0.0);
    let hidden_below = (layout.bottom() - viewport_height).max(0.0);
    ((viewport_height - hidden_above - hidden_below) / layout.height).min(1.0)
}

/// How far the viewport has scrolled through a unit taller than itself.
pub fn scroll_progress(layout: &UnitLayout, viewport_height: f64) -> f64 {
    let scrollable = layout.height - viewport_height;
    if scrollable <= 0.0 {
        return 0.0;
    }
    (-layout.top / scrollable).clamp(0.0, 1.0)
}

/// Projects `progress` linearly onto an inclusive page range.
pub fn page_from_progress(range: PageRange, progress: f64) -> u32 {
    let span = f64::from(range.len());
    let page = (f64::from(range.start) + progress * span).floor();
    if page <= f64::from(range.start) {
        range.start
    } else if page >= f64::from(range.end) {
        range.end
    } else {
        page as u32
    }
}

/// Tracks which rendered units currently count as visible and resolves a
/// single reading position from them.
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    threshold: f64,
    viewport_height: f64,
    visible: BTreeSet<UnitId>,
    layouts: HashMap<UnitId, UnitLayout>,
}

impl ViewportTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            viewport_height: 0.0,
            visible: BTreeSet::new(),
            layouts: HashMap::new(),
        }
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = height.max(0.0);
    }

    /// Applies one layout report. Returns true when the visible set changed.
    pub fn observe(&mut self, layout: UnitLayout) -> bool {
        self.layouts.insert(layout.unit, layout);
        if self.qualifies(&layout) {
            self.visible.insert(layout.unit)
        } else {
            self.visible.remove(&layout.unit)
        }
    }

    pub fn observe_all<I>(&mut self, layouts: I) -> bool
    where
        I: IntoIterator<Item = UnitLayout>,
    {
        layouts
            .into_iter()
            .fold(false, |changed, layout| self.observe(layout) | changed)
    }

    /// Forgets a unit that is no longer rendered at all.
    pub fn remove(&mut self, unit: UnitId) -> bool {
        self.layouts.remove(&unit);
        self.visible.remove(&unit)
    }

    pub fn clear(&mut self) {
        self.visible.clear();
        self.layouts.clear();
    }

    pub fn is_visible(&self, unit: UnitId) -> bool {
        self.visible.contains(&unit)
    }

    pub fn visible(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.visible.iter().copied()
    }

    pub fn visible_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.visible.iter().filter_map(|unit| unit.as_page())
    }

    pub fn visible_sections(&self) -> impl Iterator<Item = SectionId> + '_ {
        self.visible.iter().filter_map(|unit| unit.as_section())
    }

    pub fn layout(&self, unit: UnitId) -> Option<&UnitLayout> {
        self.layouts.get(&unit)
    }

    /// Current logical page, or `None` when no unit of the mode's kind is
    /// visible.
    pub fn current_position(&self, mode: ReadingMode, mapper: &PageMapper) -> Option<u32> {
        match mode {
            ReadingMode::Original => self.visible_pages().max(),
            ReadingMode::Condensed => {
                let section = self.visible_sections().last()?;
                let range = mapper.map_condensed_to_original(section)?;
                let layout = self.layouts.get(&UnitId::Section(section));
                match layout {
                    Some(layout) if layout.height > self.viewport_height => {
                        let progress = scroll_progress(layout, self.viewport_height);
                        Some(page_from_progress(range, progress))
                    }
                    _ => Some(range.end),
                }
            }
        }
    }

    fn qualifies(&self, layout: &UnitLayout) -> bool {
        if !layout.intersects(self.viewport_height) {
            return false;
        }
        if layout.height > self.viewport_height {
            return true;
        }
        visible_fraction(layout, self.viewport_height) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Section;

    const VIEWPORT: f64 = 800.0;

    fn section_layout(id: SectionId, top: f64, height: f64) -> UnitLayout {
        UnitLayout {
            unit: UnitId::Section(id),
            top,
            height,
        }
    }

    fn page_layout(page: u32, top: f64, height: f64) -> UnitLayout {
        UnitLayout {
            unit: UnitId::Page(page),
            top,
            height,
        }
    }

    fn mapper() -> PageMapper {
        let sections: Vec<Section> = [(0, 1, 4), (1, 5, 14), (2, 15, 20)]
            .into_iter()
            .map(|(index, start_page, end_page)| Section {
                index,
                start_page,
                end_page,
                title: String::new(),
            })
            .collect();
        PageMapper::new(&sections)
    }

    fn tracker() -> ViewportTracker {
        let mut tracker = ViewportTracker::new(0.4);
        tracker.set_viewport_height(VIEWPORT);
        tracker
    }

    #[test]
    fn oversized_unit_progress_is_clamped() {
        let layout = section_layout(1, -300.0, 1000.0);
        assert_eq!(scroll_progress(&layout, VIEWPORT), 1.0);
        let halfway = section_layout(1, -100.0, 1000.0);
        assert_eq!(scroll_progress(&halfway, VIEWPORT), 0.5);
    }

    #[test]
    fn threshold_boundary_excludes_39_and_includes_41_percent() {
        let mut tracker = ViewportTracker::new(0.4);
        tracker.set_viewport_height(1000.0);

        let below = section_layout(0, -610.0, 1000.0);
        assert!((visible_fraction(&below, 1000.0) - 0.39).abs() < 1e-9);
        assert!(!tracker.observe(below));
        assert!(!tracker.is_visible(UnitId::Section(0)));

        let above = section_layout(0, -590.0, 1000.0);
        assert!((visible_fraction(&above, 1000.0) - 0.41).abs() < 1e-9);
        assert!(tracker.observe(above));
        assert!(tracker.is_visible(UnitId::Section(0)));

        assert!(tracker.observe(below));
        assert!(!tracker.is_visible(UnitId::Section(0)));
    }

    #[test]
    fn oversized_unit_counts_on_any_overlap() {
        let mut tracker = tracker();
        assert!(tracker.observe(section_layout(1, -1190.0, 2000.0)));
        assert!(tracker.is_visible(UnitId::Section(1)));
        assert!(tracker.observe(section_layout(1, -2000.0, 2000.0)));
        assert!(!tracker.is_visible(UnitId::Section(1)));
    }

    #[test]
    fn repeated_reports_are_idempotent() {
        let mut tracker = tracker();
        assert!(tracker.observe(page_layout(3, 0.0, 700.0)));
        assert!(!tracker.observe(page_layout(3, 10.0, 700.0)));
        assert_eq!(tracker.visible().count(), 1);
        assert!(!tracker.remove(UnitId::Page(8)));
        assert!(tracker.remove(UnitId::Page(3)));
        assert!(!tracker.remove(UnitId::Page(3)));
    }

    #[test]
    fn original_mode_resolves_furthest_visible_page() {
        let mut tracker = tracker();
        tracker.observe_all([
            page_layout(7, -100.0, 600.0),
            page_layout(8, 500.0, 600.0),
            page_layout(9, 900.0, 600.0),
        ]);
        assert_eq!(
            tracker.current_position(ReadingMode::Original, &mapper()),
            Some(8)
        );
        assert_eq!(tracker.current_position(ReadingMode::Condensed, &mapper()), None);
    }

    #[test]
    fn condensed_mode_interpolates_inside_oversized_section() {
        let mut tracker = tracker();
        tracker.observe(section_layout(0, -500.0, 700.0));
        tracker.observe(section_layout(1, 200.0, 2800.0));
        let mapper = mapper();
        // Section 1 spans pages 5..=14 and has not been scrolled into yet.
        assert_eq!(
            tracker.current_position(ReadingMode::Condensed, &mapper),
            Some(5)
        );

        tracker.observe(section_layout(0, -1200.0, 700.0));
        tracker.observe(section_layout(1, -1000.0, 2800.0));
        // progress = 1000 / 2000 = 0.5 -> floor(5 + 0.5 * 10) = 10
        assert_eq!(
            tracker.current_position(ReadingMode::Condensed, &mapper),
            Some(10)
        );

        tracker.observe(section_layout(1, -2500.0, 2800.0));
        assert_eq!(
            tracker.current_position(ReadingMode::Condensed, &mapper),
            Some(14)
        );
    }

    #[test]
    fn condensed_mode_uses_last_page_of_short_section() {
        let mut tracker = tracker();
        tracker.observe(section_layout(0, 0.0, 300.0));
        tracker.observe(section_layout(2, 350.0, 300.0));
        assert_eq!(
            tracker.current_position(ReadingMode::Condensed, &mapper()),
            Some(20)
        );
    }

    #[test]
    fn page_projection_stays_inside_range() {
        let range = PageRange::new(5, 14);
        assert_eq!(page_from_progress(range, 0.0), 5);
        assert_eq!(page_from_progress(range, 0.55), 10);
        assert_eq!(page_from_progress(range, 1.0), 14);
        assert_eq!(page_from_progress(PageRange::new(3, 3), 0.9), 3);
    }
}

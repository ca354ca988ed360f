use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use distill_core::{
    BookId, DistilledPage, FetchError, ProgressStore, ReaderSession, ReadingMode, Section,
    SectionContentSource, SectionState, UnitLayout,
};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::info;

/// One renderer report recorded during a reading session.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayEvent {
    pub at_ms: u64,
    pub viewport_height: f64,
    #[serde(default)]
    pub mode: Option<ReadingMode>,
    pub units: Vec<UnitLayout>,
}

pub fn read_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let file = File::open(path).with_context(|| format!("failed to open events file {:?}", path))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid event on line {} of {:?}", index + 1, path))?;
        events.push(event);
    }
    events.sort_by_key(|event| event.at_ms);
    Ok(events)
}

/// Feeds recorded events into `session` on their original schedule and
/// writes one JSON line per event.
pub async fn run<W: Write>(
    session: &mut ReaderSession,
    events: &[ReplayEvent],
    out: &mut W,
) -> Result<()> {
    session.init();
    let started = Instant::now();

    for event in events {
        tokio::time::sleep_until(started + Duration::from_millis(event.at_ms)).await;
        if let Some(mode) = event.mode {
            session.set_mode(mode);
        }
        session.apply_layout(event.viewport_height, event.units.iter().copied());
        let line = json!({
            "at_ms": event.at_ms,
            "mode": session.mode(),
            "position": session.current_position(),
            "display_page": session.display_page(),
            "section": session.active_section(),
            "percent": (session.progress_percentage() * 10.0).round() / 10.0,
        });
        writeln!(out, "{}", line)?;
    }

    session.tick_progress().await;
    let loaded = session
        .document()
        .sections
        .iter()
        .filter(|section| matches!(session.section_state(section.index), SectionState::Loaded(_)))
        .count();
    let progress = session.progress();
    writeln!(
        out,
        "{}",
        json!({
            "summary": {
                "events": events.len(),
                "last_persisted_page": progress.last_persisted_page,
                "sections_loaded": loaded,
            }
        })
    )?;
    session.dispose();
    info!(events = events.len(), "replay finished");
    Ok(())
}

/// Local stand-in for the remote API: sections come back empty and
/// progress writes are only logged.
#[derive(Debug, Default)]
pub struct DryRun;

#[async_trait]
impl SectionContentSource for DryRun {
    async fn load(&self, book: &BookId, section: &Section) -> Result<DistilledPage, FetchError> {
        info!(%book, section = section.index, "dry run: skipping content fetch");
        Ok(DistilledPage {
            start_page: section.start_page,
            end_page: section.end_page,
            paragraphs: Vec::new(),
        })
    }
}

#[async_trait]
impl ProgressStore for DryRun {
    async fn save_progress(&self, book: &BookId, page: u32) -> Result<(), FetchError> {
        info!(%book, page, "dry run: progress not sent");
        Ok(())
    }
}

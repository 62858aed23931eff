//! Paginated view over one channel's programmes

use chrono::{DateTime, Utc};

use super::format_time;
use super::parser::{ProgrammeEvent, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammeMarker {
    /// Airing now
    Current,
    /// Coming next
    Next,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuideItem {
    pub event: ProgrammeEvent,
    pub marker: Option<ProgrammeMarker>,
}

/// Entries appended to the view by one `load_next_batch` call
#[derive(Debug, Clone, PartialEq)]
pub struct GuideBatch {
    pub channel_id: String,
    pub items: Vec<GuideItem>,
    /// Cursor reached the end with this batch
    pub exhausted: bool,
}

/// Turns viewport proximity into a load decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadTrigger {
    /// Load once the end of the list is this close, in pixels
    pub threshold: f32,
}

impl Default for LoadTrigger {
    fn default() -> Self {
        Self { threshold: 200.0 }
    }
}

impl LoadTrigger {
    pub fn should_load(&self, distance_to_end: f32) -> bool {
        distance_to_end <= self.threshold
    }
}

pub struct GuideWindow {
    channel_id: String,
    events: Vec<ProgrammeEvent>,
    cursor: usize,
    batch_size: usize,
    rendered: usize,
    current: Option<usize>,
    next: Option<usize>,
    trigger: LoadTrigger,
}

impl GuideWindow {
    /// Keep the channel's programmes that have not finished by `now`
    pub fn new(channel_id: &str, schedule: &Schedule, now: DateTime<Utc>, batch_size: usize) -> Self {
        let mut events: Vec<ProgrammeEvent> = schedule
            .events_for(channel_id)
            .iter()
            .filter(|event| event.stop >= now)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.start);

        let current = events.iter().position(|event| event.is_airing(now));
        let next = match current {
            Some(index) => Some(index + 1).filter(|&n| n < events.len()),
            // A programme ending exactly now is kept but is not upcoming
            None => events.iter().position(|event| event.start >= now),
        };

        log::debug!(
            "[EPG] Guide window for {}: {} upcoming programmes",
            channel_id,
            events.len()
        );

        Self {
            channel_id: channel_id.to_string(),
            events,
            cursor: 0,
            batch_size: batch_size.max(1),
            rendered: 0,
            current,
            next,
            trigger: LoadTrigger::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: LoadTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// Entries actually handed to the view so far
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    pub fn current_programme(&self) -> Option<&ProgrammeEvent> {
        self.current.map(|i| &self.events[i])
    }

    pub fn next_programme(&self) -> Option<&ProgrammeEvent> {
        self.next.map(|i| &self.events[i])
    }

    fn marker_at(&self, index: usize) -> Option<ProgrammeMarker> {
        if self.current == Some(index) {
            Some(ProgrammeMarker::Current)
        } else if self.next == Some(index) {
            Some(ProgrammeMarker::Next)
        } else {
            None
        }
    }

    /// Next `batch_size` entries from the cursor. Untitled entries are
    /// skipped but still advance the cursor; an exhausted window yields an
    /// empty batch.
    pub fn load_next_batch(&mut self) -> GuideBatch {
        let end = (self.cursor + self.batch_size).min(self.events.len());
        let items: Vec<GuideItem> = (self.cursor..end)
            .filter(|&i| !self.events[i].title.trim().is_empty())
            .map(|i| GuideItem {
                event: self.events[i].clone(),
                marker: self.marker_at(i),
            })
            .collect();

        let skipped = (end - self.cursor) - items.len();
        if skipped > 0 {
            log::debug!("[EPG] Skipped {} untitled programmes", skipped);
        }
        self.cursor = end;
        self.rendered += items.len();

        GuideBatch {
            channel_id: self.channel_id.clone(),
            items,
            exhausted: self.is_exhausted(),
        }
    }

    /// Load another batch if the viewport is close enough to the end
    pub fn on_scroll(&mut self, distance_to_end: f32) -> Option<GuideBatch> {
        if self.is_exhausted() || !self.trigger.should_load(distance_to_end) {
            return None;
        }
        Some(self.load_next_batch())
    }

    /// Now/next summary with local times
    pub fn tooltip(&self) -> String {
        let mut lines = Vec::new();
        if let Some(event) = self.current_programme() {
            lines.push(format!(
                "Now: {} - {} {}",
                format_time(event.start),
                format_time(event.stop),
                event.title
            ));
        }
        if let Some(event) = self.next_programme() {
            lines.push(format!("Next: {} {}", format_time(event.start), event.title));
        }
        if lines.is_empty() {
            return "No programme information".to_string();
        }
        lines.join("\n")
    }
}

//! Routes channel selections to playback and the guide

use std::rc::Rc;

use crate::catalog::SourceCatalog;
use crate::epg::GuideController;
use crate::models::{ChannelSource, SourceId, StreamType};
use crate::playback::{PlaybackSession, PlayerState};
use crate::view::ViewCallbacks;

pub struct App {
    catalog: SourceCatalog,
    session: PlaybackSession,
    guide: GuideController,
    view: Rc<dyn ViewCallbacks>,
}

impl App {
    pub fn new(
        catalog: SourceCatalog,
        session: PlaybackSession,
        guide: GuideController,
        view: Rc<dyn ViewCallbacks>,
    ) -> Self {
        Self {
            catalog,
            session,
            guide,
            view,
        }
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn render_catalog(&self) {
        self.view.render_channel_cards(&self.catalog.sources_by_origin());
    }

    /// Look up a channel by its 1-based position in the rendered list, or by
    /// label (exact match first, then substring, both case-insensitive)
    pub fn find(&self, query: &str) -> Option<ChannelSource> {
        let sources: Vec<ChannelSource> = self
            .catalog
            .sources_by_origin()
            .into_iter()
            .flat_map(|(_, members)| members)
            .collect();

        if let Ok(position) = query.trim().parse::<usize>() {
            return position.checked_sub(1).and_then(|i| sources.get(i)).cloned();
        }

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        sources
            .iter()
            .find(|s| s.label.to_lowercase() == needle)
            .or_else(|| sources.iter().find(|s| s.label.to_lowercase().contains(&needle)))
            .cloned()
    }

    /// Play a channel and show its guide. Returns false if the id is unknown.
    pub fn select(&mut self, id: SourceId) -> bool {
        let Some(source) = self.catalog.get(id) else {
            log::warn!("[PLAY] No channel with id {}", id);
            return false;
        };

        self.view.set_current_channel_label(&source.label);
        self.session.start(source.clone());

        // A stream nothing could play won't get better on retry
        if source.stream_type == StreamType::Unknown && matches!(self.session.current_state(), PlayerState::Failed(_)) {
            log::info!("[PLAY] Removing unplayable channel {}", source.label);
            self.catalog.evict(id);
            self.render_catalog();
        }

        self.guide.show(source.guide_key());
        true
    }

    /// Apply pending playback events and guide results
    pub fn pump(&mut self) -> usize {
        self.session.poll_events() + self.guide.poll()
    }

    /// Whether the session still has something to report
    pub fn is_active(&self) -> bool {
        matches!(
            self.session.current_state(),
            PlayerState::Initializing(_) | PlayerState::Playing | PlayerState::Buffering
        )
    }
}

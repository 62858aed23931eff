//! Rendering callbacks consumed by the UI layer

use crate::epg::{format_time, GuideBatch, ProgrammeMarker};
use crate::models::ChannelSource;

/// Everything the core asks of the rendering layer
pub trait ViewCallbacks {
    fn set_spinner_visible(&self, visible: bool);

    fn render_channel_cards(&self, groups: &[(String, Vec<ChannelSource>)]);

    fn set_current_channel_label(&self, label: &str);

    fn set_programme_tooltip(&self, text: &str);

    fn render_guide_batch(&self, batch: &GuideBatch);

    /// User-visible message for an unrecoverable failure
    fn alert(&self, message: &str);

    /// Playback is ready but did not start by itself
    fn playback_blocked(&self, reason: &str);
}

/// Plain-text view for the command line
pub struct ConsoleView;

impl ViewCallbacks for ConsoleView {
    fn set_spinner_visible(&self, visible: bool) {
        if visible {
            println!("... loading");
        }
    }

    fn render_channel_cards(&self, groups: &[(String, Vec<ChannelSource>)]) {
        let mut index = 0;
        for (origin, sources) in groups {
            println!("== {} ({} channels)", origin, sources.len());
            for source in sources {
                index += 1;
                println!("{:>4}. {:<40} [{}] {}", index, source.label, source.stream_type.label(), source.url);
            }
        }
    }

    fn set_current_channel_label(&self, label: &str) {
        println!("Now watching: {}", label);
    }

    fn set_programme_tooltip(&self, text: &str) {
        println!("{}", text);
    }

    fn render_guide_batch(&self, batch: &GuideBatch) {
        for item in &batch.items {
            let marker = match item.marker {
                Some(ProgrammeMarker::Current) => "NOW ",
                Some(ProgrammeMarker::Next) => "NEXT",
                None => "    ",
            };
            println!(
                "  {} {} - {}  {}",
                marker,
                format_time(item.event.start),
                format_time(item.event.stop),
                item.event.title
            );
        }
    }

    fn alert(&self, message: &str) {
        eprintln!("!! {}", message);
    }

    fn playback_blocked(&self, reason: &str) {
        println!("Playback paused ({}) - start it from the player window", reason);
    }
}

//! Keeps the guide window in step with the selected channel
//!
//! Schedule downloads run on a worker thread and come back over a channel.
//! Each result is tagged with the channel that asked for it; a result whose
//! channel is no longer active is dropped when polled.

use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::parser::{Schedule, ScheduleSource};
use super::window::GuideWindow;
use crate::error::NetworkError;
use crate::view::ViewCallbacks;

struct FetchResult {
    channel_id: String,
    result: Result<Schedule, NetworkError>,
}

struct CachedSchedule {
    schedule: Arc<Schedule>,
    fetched_at: Instant,
}

pub struct GuideController {
    source: Arc<dyn ScheduleSource>,
    view: Rc<dyn ViewCallbacks>,
    batch_size: usize,
    refresh_interval: Duration,
    clock: fn() -> DateTime<Utc>,
    cache: Option<CachedSchedule>,
    active: Option<String>,
    window: Option<GuideWindow>,
    sender: Sender<FetchResult>,
    receiver: Receiver<FetchResult>,
}

impl GuideController {
    pub fn new(
        source: Arc<dyn ScheduleSource>,
        view: Rc<dyn ViewCallbacks>,
        batch_size: usize,
        refresh_interval: Duration,
    ) -> Self {
        let (sender, receiver) = channel();
        Self {
            source,
            view,
            batch_size,
            refresh_interval,
            clock: Utc::now,
            cache: None,
            active: None,
            window: None,
            sender,
            receiver,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn active_channel(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn window(&self) -> Option<&GuideWindow> {
        self.window.as_ref()
    }

    fn fresh_schedule(&self) -> Option<Arc<Schedule>> {
        self.cache
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.refresh_interval)
            .map(|cached| Arc::clone(&cached.schedule))
    }

    /// Switch the guide to a channel. The previous window is discarded.
    pub fn show(&mut self, channel_id: &str) {
        self.active = Some(channel_id.to_string());
        self.window = None;

        if let Some(schedule) = self.fresh_schedule() {
            self.open_window(channel_id, &schedule);
            return;
        }

        log::info!("[EPG] Fetching schedule for {}", channel_id);
        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        let channel_id = channel_id.to_string();
        thread::spawn(move || {
            let result = source.fetch();
            // Receiver is gone once the controller is dropped
            let _ = sender.send(FetchResult { channel_id, result });
        });
    }

    /// Apply finished fetches. Returns how many results were consumed.
    pub fn poll(&mut self) -> usize {
        let mut consumed = 0;
        while let Ok(fetched) = self.receiver.try_recv() {
            consumed += 1;
            if self.active.as_deref() != Some(fetched.channel_id.as_str()) {
                log::debug!("[EPG] Discarding schedule fetched for {}", fetched.channel_id);
                continue;
            }
            match fetched.result {
                Ok(schedule) => {
                    let schedule = Arc::new(schedule);
                    self.cache = Some(CachedSchedule {
                        schedule: Arc::clone(&schedule),
                        fetched_at: Instant::now(),
                    });
                    self.open_window(&fetched.channel_id, &schedule);
                }
                Err(e) => {
                    log::warn!("[EPG] Schedule unavailable: {}", e);
                    self.view.set_programme_tooltip("Programme guide unavailable");
                }
            }
        }
        consumed
    }

    fn open_window(&mut self, channel_id: &str, schedule: &Schedule) {
        let mut window = GuideWindow::new(channel_id, schedule, (self.clock)(), self.batch_size);
        self.view.set_programme_tooltip(&window.tooltip());
        let batch = window.load_next_batch();
        self.view.render_guide_batch(&batch);
        self.window = Some(window);
    }
}

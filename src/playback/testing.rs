//! In-memory backends for exercising the session without a player binary

use std::sync::{Arc, Mutex};

use crate::error::BackendError;
use crate::models::{ChannelSource, SourceId, StreamType};

use super::{BackendEvent, BackendKind, BackendProvider, EventSender, MediaSink, PlaybackBackend};

#[derive(Default)]
pub struct FakeState {
    pub created: Vec<BackendKind>,
    pub initialized: Vec<String>,
    pub destroyed: usize,
    pub recoveries: usize,
    pub senders: Vec<EventSender>,
}

impl FakeState {
    /// Backends created and not yet destroyed
    pub fn live(&self) -> usize {
        self.created.len() - self.destroyed
    }
}

pub struct FakeProvider {
    pub supported: Vec<BackendKind>,
    pub fail_init: bool,
    pub recovery: bool,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new(supported: &[BackendKind]) -> Self {
        Self {
            supported: supported.to_vec(),
            fail_init: false,
            recovery: false,
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    pub fn all() -> Self {
        Self::new(&[
            BackendKind::DashAdaptive,
            BackendKind::HlsAdaptive,
            BackendKind::NativeHls,
            BackendKind::DirectSink,
        ])
    }

    /// Push an event through the sender of the n-th created backend
    pub fn emit(state: &Arc<Mutex<FakeState>>, index: usize, event: BackendEvent) {
        let state = state.lock().unwrap();
        state.senders[index].send(event);
    }
}

impl BackendProvider for FakeProvider {
    fn supports(&self, kind: BackendKind) -> bool {
        self.supported.contains(&kind)
    }

    fn create(&self, kind: BackendKind) -> Result<Box<dyn PlaybackBackend>, BackendError> {
        if !self.supports(kind) {
            return Err(BackendError::Unsupported);
        }
        self.state.lock().unwrap().created.push(kind);
        Ok(Box::new(FakeBackend {
            kind,
            fail_init: self.fail_init,
            recovery: self.recovery,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeBackend {
    kind: BackendKind,
    fail_init: bool,
    recovery: bool,
    state: Arc<Mutex<FakeState>>,
}

impl PlaybackBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn attach_events(&mut self, events: EventSender) {
        self.state.lock().unwrap().senders.push(events);
    }

    fn initialize(&mut self, sink: &Arc<dyn MediaSink>, url: &str, _auto_play: bool) -> Result<(), BackendError> {
        if self.fail_init {
            return Err(BackendError::Attach("manifest unreachable".to_string()));
        }
        sink.bind(url);
        self.state.lock().unwrap().initialized.push(url.to_string());
        Ok(())
    }

    fn supports_recovery(&self) -> bool {
        self.recovery
    }

    fn recover_media_error(&mut self) -> bool {
        self.state.lock().unwrap().recoveries += 1;
        true
    }

    fn destroy(&mut self) {
        self.state.lock().unwrap().destroyed += 1;
    }
}

pub fn channel(id: u64, label: &str, url: &str) -> ChannelSource {
    ChannelSource {
        id: SourceId(id),
        label: label.to_string(),
        stream_type: StreamType::from_url(url),
        url: url.to_string(),
        logo_url: "thumbnail.jpg".to_string(),
        origin_group: "freeview".to_string(),
        guide_id: None,
        group_title: None,
    }
}

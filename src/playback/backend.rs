//! Backend contract shared by every playback implementation

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::BackendError;
use crate::playback::sink::MediaSink;

/// Concrete backend variants the session can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Adaptive-bitrate DASH player
    DashAdaptive,
    /// Adaptive-bitrate HLS player
    HlsAdaptive,
    /// The runtime's own HLS decoder
    NativeHls,
    /// URL assigned straight to the media sink
    DirectSink,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::DashAdaptive => "DASH adaptive",
            BackendKind::HlsAdaptive => "HLS adaptive",
            BackendKind::NativeHls => "native HLS",
            BackendKind::DirectSink => "direct",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    /// Decoder error the backend may be able to recover from in place
    MediaDecode,
    Other,
}

/// Lifecycle signals a backend reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Ready,
    BufferingStarted,
    BufferingEnded,
    Error {
        fatal: bool,
        kind: ErrorKind,
        detail: String,
    },
    /// Playback finished or the player was closed
    Ended,
}

/// Event channel bound to one session generation
#[derive(Clone)]
pub struct EventSender {
    generation: u64,
    sender: Sender<(u64, BackendEvent)>,
}

impl EventSender {
    pub fn new(generation: u64, sender: Sender<(u64, BackendEvent)>) -> Self {
        Self { generation, sender }
    }

    /// Returns false once the session is gone
    pub fn send(&self, event: BackendEvent) -> bool {
        self.sender.send((self.generation, event)).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Capability set every backend exposes to the session
pub trait PlaybackBackend {
    fn kind(&self) -> BackendKind;

    /// Called once, before `initialize`
    fn attach_events(&mut self, events: EventSender);

    fn initialize(&mut self, sink: &Arc<dyn MediaSink>, url: &str, auto_play: bool) -> Result<(), BackendError>;

    fn supports_recovery(&self) -> bool {
        false
    }

    /// In-place recovery from a media decode error. Returns false if nothing was attempted.
    fn recover_media_error(&mut self) -> bool {
        false
    }

    /// Release every resource and stop delivering events
    fn destroy(&mut self);
}

/// What the current runtime can construct
pub trait BackendProvider {
    fn supports(&self, kind: BackendKind) -> bool;

    fn create(&self, kind: BackendKind) -> Result<Box<dyn PlaybackBackend>, BackendError>;
}

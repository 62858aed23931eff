//! Playback session: one active channel, one attached backend
//!
//! Backends run on their own threads and report through an [`EventSender`].
//! Every event carries the generation it was issued under; the session bumps
//! the generation on each teardown, so events from a torn-down backend are
//! dropped in [`PlaybackSession::poll_events`].

mod backend;
mod external;
mod sink;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendEvent, BackendKind, BackendProvider, ErrorKind, EventSender, PlaybackBackend};
pub use external::{ProcessBackend, ProcessProvider};
pub use sink::{MediaSink, PlayerWindow, HLS_MIME};

use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use crate::error::PlaybackError;
use crate::models::{ChannelSource, StreamType};
use crate::view::ViewCallbacks;

/// Uniform player state, whatever the backend
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    Idle,
    Initializing(ChannelSource),
    Buffering,
    Playing,
    Failed(PlaybackError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub auto_play: bool,
    pub max_recovery_attempts: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_play: true,
            max_recovery_attempts: 3,
        }
    }
}

/// Pick a backend for a stream type. Depends only on the stream type and
/// what the runtime supports, never on stream content.
pub fn select_backend(
    stream_type: StreamType,
    provider: &dyn BackendProvider,
    sink: &dyn MediaSink,
) -> Result<BackendKind, PlaybackError> {
    match stream_type {
        StreamType::Dash if provider.supports(BackendKind::DashAdaptive) => Ok(BackendKind::DashAdaptive),
        StreamType::Hls if provider.supports(BackendKind::HlsAdaptive) => Ok(BackendKind::HlsAdaptive),
        StreamType::Hls if provider.supports(BackendKind::NativeHls) && sink.can_play_type(HLS_MIME) => {
            Ok(BackendKind::NativeHls)
        }
        StreamType::NativeAudio if provider.supports(BackendKind::DirectSink) => Ok(BackendKind::DirectSink),
        other => Err(PlaybackError::UnsupportedFormat(other)),
    }
}

pub struct PlaybackSession {
    provider: Box<dyn BackendProvider>,
    sink: Arc<dyn MediaSink>,
    view: Rc<dyn ViewCallbacks>,
    options: SessionOptions,
    state: PlayerState,
    channel: Option<ChannelSource>,
    backend: Option<Box<dyn PlaybackBackend>>,
    generation: u64,
    recovery_attempts: u32,
    sender: Sender<(u64, BackendEvent)>,
    receiver: Receiver<(u64, BackendEvent)>,
}

impl PlaybackSession {
    pub fn new(
        provider: Box<dyn BackendProvider>,
        sink: Arc<dyn MediaSink>,
        view: Rc<dyn ViewCallbacks>,
        options: SessionOptions,
    ) -> Self {
        let (sender, receiver) = channel();
        Self {
            provider,
            sink,
            view,
            options,
            state: PlayerState::Idle,
            channel: None,
            backend: None,
            generation: 0,
            recovery_attempts: 0,
            sender,
            receiver,
        }
    }

    pub fn current_state(&self) -> &PlayerState {
        &self.state
    }

    pub fn current_channel(&self) -> Option<&ChannelSource> {
        self.channel.as_ref()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    /// Begin playing a channel. Completion is reported through events.
    pub fn start(&mut self, channel: ChannelSource) {
        self.teardown();
        self.recovery_attempts = 0;
        self.channel = Some(channel.clone());
        self.state = PlayerState::Initializing(channel.clone());
        self.view.set_spinner_visible(true);
        log::info!("[PLAY] {} | {} | {}", channel.label, channel.stream_type.label(), channel.url);

        let kind = match select_backend(channel.stream_type, self.provider.as_ref(), self.sink.as_ref()) {
            Ok(kind) => kind,
            Err(e) => return self.fail(e),
        };

        let mut backend = match self.provider.create(kind) {
            Ok(backend) => backend,
            Err(e) => return self.fail(PlaybackError::InitializationFailed(e.to_string())),
        };
        backend.attach_events(EventSender::new(self.generation, self.sender.clone()));

        if let Err(e) = backend.initialize(&self.sink, &channel.url, self.options.auto_play) {
            backend.destroy();
            return self.fail(PlaybackError::InitializationFailed(e.to_string()));
        }
        log::info!("[PLAY] Using {} backend", kind);
        self.backend = Some(backend);
    }

    /// Stop playback and return to Idle
    pub fn stop(&mut self) {
        self.teardown();
        self.channel = None;
        self.state = PlayerState::Idle;
        self.view.set_spinner_visible(false);
    }

    /// Apply pending backend events. Returns how many were applied.
    pub fn poll_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.receiver.try_recv() {
                Ok((generation, event)) => {
                    if generation != self.generation {
                        log::debug!("[PLAY] Dropping {:?} from a previous session", event);
                        continue;
                    }
                    self.handle_event(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Ready => {
                if matches!(self.state, PlayerState::Initializing(_)) {
                    self.state = PlayerState::Playing;
                    self.view.set_spinner_visible(false);
                    if let Err(e) = self.sink.play() {
                        // Not fatal: the user can start playback by hand
                        log::warn!("[PLAY] Playback did not start: {}", e);
                        self.view.playback_blocked(&e.to_string());
                    }
                }
            }
            BackendEvent::BufferingStarted => {
                if self.state == PlayerState::Playing {
                    self.state = PlayerState::Buffering;
                    self.view.set_spinner_visible(true);
                }
            }
            BackendEvent::BufferingEnded => {
                if self.state == PlayerState::Buffering {
                    self.state = PlayerState::Playing;
                    self.view.set_spinner_visible(false);
                }
            }
            BackendEvent::Error { fatal, kind, detail } => self.handle_error(fatal, kind, detail),
            BackendEvent::Ended => {
                if self.backend.is_some() {
                    log::info!("[PLAY] Player closed");
                    self.stop();
                }
            }
        }
    }

    fn handle_error(&mut self, fatal: bool, kind: ErrorKind, detail: String) {
        if matches!(self.state, PlayerState::Idle | PlayerState::Failed(_)) {
            return;
        }
        if !fatal {
            log::warn!("[PLAY] {:?} error: {}", kind, detail);
            return;
        }

        if kind == ErrorKind::MediaDecode && self.recovery_attempts < self.options.max_recovery_attempts {
            if let Some(backend) = self.backend.as_mut().filter(|b| b.supports_recovery()) {
                self.recovery_attempts += 1;
                log::warn!(
                    "[PLAY] Media error, recovering (attempt {}/{}): {}",
                    self.recovery_attempts,
                    self.options.max_recovery_attempts,
                    detail
                );
                if backend.recover_media_error() {
                    return;
                }
            }
        }

        self.fail(PlaybackError::FatalPlaybackError(detail));
    }

    fn fail(&mut self, error: PlaybackError) {
        log::error!("[PLAY] {}", error);
        self.teardown();
        self.view.set_spinner_visible(false);
        self.view.alert(&error.to_string());
        self.state = PlayerState::Failed(error);
    }

    /// Destroy the backend and invalidate its events
    fn teardown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.destroy();
        }
        self.generation += 1;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

//! Media sink: the output surface a backend attaches to

use std::sync::Mutex;

use crate::error::SinkError;

pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

pub trait MediaSink: Send + Sync {
    /// Whether the sink can decode this MIME type without an adaptive backend
    fn can_play_type(&self, mime: &str) -> bool;

    fn bind(&self, url: &str);

    fn unbind(&self);

    /// Start playback of the bound source
    fn play(&self) -> Result<(), SinkError>;
}

/// Output window of the external player
pub struct PlayerWindow {
    title: String,
    native_types: Vec<String>,
    auto_play: bool,
    bound: Mutex<Option<String>>,
}

impl PlayerWindow {
    pub fn new(title: &str, native_types: Vec<String>, auto_play: bool) -> Self {
        Self {
            title: title.to_string(),
            native_types,
            auto_play,
            bound: Mutex::new(None),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn bound_source(&self) -> Option<String> {
        self.bound.lock().ok().and_then(|bound| bound.clone())
    }
}

impl MediaSink for PlayerWindow {
    fn can_play_type(&self, mime: &str) -> bool {
        self.native_types.iter().any(|native| {
            match native.strip_suffix("/*") {
                Some(family) => mime.split('/').next() == Some(family),
                None => native.eq_ignore_ascii_case(mime),
            }
        })
    }

    fn bind(&self, url: &str) {
        if let Ok(mut bound) = self.bound.lock() {
            if let Some(previous) = bound.as_deref() {
                log::warn!("[PLAY] Sink still bound to {} - replacing", previous);
            }
            *bound = Some(url.to_string());
        }
    }

    fn unbind(&self) {
        if let Ok(mut bound) = self.bound.lock() {
            *bound = None;
        }
    }

    fn play(&self) -> Result<(), SinkError> {
        if self.bound_source().is_none() {
            return Err(SinkError::NoSource);
        }
        if !self.auto_play {
            return Err(SinkError::PlayRejected("autoplay disabled".to_string()));
        }
        Ok(())
    }
}

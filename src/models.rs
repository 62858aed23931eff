//! Data models for Freeview IPTV

use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog-assigned channel identifier, stable for the lifetime of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Streaming protocol of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Dash,
    Hls,
    NativeAudio,
    Unknown,
}

const AUDIO_EXTENSIONS: [&str; 8] = ["mp3", "aac", "m4a", "ogg", "oga", "opus", "flac", "wav"];

impl StreamType {
    /// Infer the stream type from the trailing extension of a URL.
    /// Query string and fragment are ignored.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let last_segment = path.rsplit('/').next().unwrap_or(path);

        let ext = match last_segment.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return StreamType::Unknown,
        };

        match ext.as_str() {
            "mpd" => StreamType::Dash,
            "m3u8" | "m3u" => StreamType::Hls,
            e if AUDIO_EXTENSIONS.contains(&e) => StreamType::NativeAudio,
            _ => StreamType::Unknown,
        }
    }

    /// Known extension wins, otherwise the playlist hint, otherwise Unknown
    pub fn resolve(url: &str, hint: Option<StreamType>) -> Self {
        match Self::from_url(url) {
            StreamType::Unknown => hint.unwrap_or(StreamType::Unknown),
            known => known,
        }
    }

    /// Parse a manifest type hint such as "mpd" or "hls"
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "mpd" | "dash" => Some(StreamType::Dash),
            "hls" | "m3u8" => Some(StreamType::Hls),
            "audio" => Some(StreamType::NativeAudio),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StreamType::Dash => "DASH",
            StreamType::Hls => "HLS",
            StreamType::NativeAudio => "Audio",
            StreamType::Unknown => "Unknown",
        }
    }
}

/// A playable channel owned by the source catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSource {
    pub id: SourceId,
    pub label: String,
    pub stream_type: StreamType,
    pub url: String,
    pub logo_url: String,
    pub origin_group: String,
    /// Schedule channel id (tvg-id)
    pub guide_id: Option<String>,
    pub group_title: Option<String>,
}

impl ChannelSource {
    /// Identifier used to look up programme entries for this channel
    pub fn guide_key(&self) -> &str {
        self.guide_id.as_deref().unwrap_or(&self.label)
    }
}

/// A playlist to ingest, tagged with the origin it is grouped under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSource {
    pub origin: String,
    pub url: String,
}

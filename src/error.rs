//! Error types shared across the ingestion, playback and guide layers

use crate::models::StreamType;

/// Malformed playlist or schedule input
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("playlist misaligned: {names} metadata lines for {urls} urls")]
    Misaligned { names: usize, urls: usize },

    #[error("url on line {line} has no metadata line")]
    OrphanUrl { line: usize },

    #[error("playlist contains no channels")]
    EmptyPlaylist,

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },
}

/// Fetch or probe failure. Always absorbed below the component boundary.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("read failed: {0}")]
    Read(String),
}

impl From<ureq::Error> for NetworkError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(code) => NetworkError::Status(code),
            other => NetworkError::Request(other.to_string()),
        }
    }
}

/// Errors surfaced to the user by the playback session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("no playback backend available for {} streams", .0.label())]
    UnsupportedFormat(StreamType),

    #[error("failed to initialize playback: {0}")]
    InitializationFailed(String),

    #[error("playback stopped: {0}")]
    FatalPlaybackError(String),
}

/// Failure reported by a concrete playback backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to launch player '{player}': {source}")]
    Launch {
        player: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend not supported on this runtime")]
    Unsupported,

    #[error("{0}")]
    Attach(String),
}

/// Media sink refused an operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("no source bound to the sink")]
    NoSource,

    #[error("playback start rejected: {0}")]
    PlayRejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::m3u_parser::AlignmentPolicy;
use crate::models::PlaylistSource;

pub const DEFAULT_USER_AGENT: &str = "FreeviewIPTV/0.1";
pub const DEFAULT_LOGO: &str = "thumbnail.jpg";

/// External player settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player")]
    pub command: String,
    #[serde(default = "default_true")]
    pub supports_dash: bool,
    #[serde(default = "default_true")]
    pub supports_hls: bool,
    /// Player decodes HLS natively when the adaptive path is unavailable
    #[serde(default = "default_true")]
    pub native_hls: bool,
    #[serde(default = "default_buffer")]
    pub buffer_seconds: u32,
    #[serde(default = "default_true")]
    pub pass_user_agent: bool,
    #[serde(default = "default_true")]
    pub auto_play: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player(),
            supports_dash: true,
            supports_hls: true,
            native_hls: true,
            buffer_seconds: 5,
            pass_user_agent: true,
            auto_play: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_playlists")]
    pub playlists: Vec<PlaylistSource>,
    #[serde(default)]
    pub guide_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    // Liveness
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    // Parsing
    #[serde(default = "default_logo")]
    pub default_logo: String,
    #[serde(default)]
    pub alignment_policy: AlignmentPolicy,
    // Readiness
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
    // Guide
    #[serde(default = "default_batch_size")]
    pub guide_batch_size: usize,
    #[serde(default = "default_guide_refresh")]
    pub guide_refresh_hours: u64,
    // Playback
    #[serde(default = "default_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default)]
    pub player: PlayerConfig,
}

fn default_player() -> String { "ffplay".to_string() }
fn default_true() -> bool { true }
fn default_buffer() -> u32 { 5 }
fn default_user_agent() -> String { DEFAULT_USER_AGENT.to_string() }
fn default_probe_timeout() -> u64 { 5 }
fn default_probe_concurrency() -> usize { 16 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_logo() -> String { DEFAULT_LOGO.to_string() }
fn default_min_sources() -> usize { 1 }
fn default_readiness_timeout() -> u64 { 60 }
fn default_batch_size() -> usize { 10 }
fn default_guide_refresh() -> u64 { 24 }
fn default_recovery_attempts() -> u32 { 3 }

fn default_playlists() -> Vec<PlaylistSource> {
    vec![PlaylistSource {
        origin: "freeview".to_string(),
        url: "https://raw.githubusercontent.com/weareblahs/freeview/main/mytv_broadcasting.m3u8".to_string(),
    }]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            playlists: default_playlists(),
            guide_url: String::new(),
            user_agent: default_user_agent(),
            probe_timeout_secs: 5,
            probe_concurrency: 16,
            fetch_timeout_secs: 30,
            default_logo: default_logo(),
            alignment_policy: AlignmentPolicy::default(),
            min_sources: 1,
            readiness_timeout_secs: 60,
            guide_batch_size: 10,
            guide_refresh_hours: 24,
            max_recovery_attempts: 3,
            player: PlayerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("freeview_iptv");
        path.push("config.json");
        path
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("[CONFIG] {} - using defaults", e);
                Self::default()
            }
        }
    }

    /// Load from an explicit path; errors are reported to the caller
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write to the default location, returning where it went
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn guide_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.guide_refresh_hours * 3600)
    }
}

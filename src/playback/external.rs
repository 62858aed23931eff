//! External player backend (ffplay, mpv, vlc)
//!
//! The player process is the decoder. Its stderr is read on a background
//! thread and translated into [`BackendEvent`]s; process exit becomes either
//! `Ended` or a fatal error.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::PlayerConfig;
use crate::error::BackendError;
use crate::playback::backend::{BackendEvent, BackendKind, BackendProvider, ErrorKind, EventSender, PlaybackBackend};
use crate::playback::sink::MediaSink;

/// Player families with known command-line flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerFlavour {
    Ffplay,
    Mpv,
    Vlc,
    Generic,
}

impl PlayerFlavour {
    pub fn detect(command: &str) -> Self {
        let lower = command.to_lowercase();
        if lower.contains("ffplay") {
            PlayerFlavour::Ffplay
        } else if lower.contains("mpv") {
            PlayerFlavour::Mpv
        } else if lower.contains("vlc") {
            PlayerFlavour::Vlc
        } else {
            PlayerFlavour::Generic
        }
    }
}

/// Everything needed to build a player command line
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub buffer_seconds: u32,
    pub user_agent: Option<String>,
    pub title: String,
}

/// Arguments for one launch of the player
pub fn build_args(spec: &LaunchSpec, kind: BackendKind, url: &str, auto_play: bool) -> Vec<String> {
    let audio_only = kind == BackendKind::DirectSink;
    let mut args: Vec<String> = Vec::new();

    match PlayerFlavour::detect(&spec.command) {
        PlayerFlavour::Ffplay => {
            args.extend(["-window_title".to_string(), spec.title.clone()]);
            args.push("-autoexit".to_string());
            if audio_only {
                args.push("-nodisp".to_string());
            }
            if let Some(ua) = &spec.user_agent {
                args.extend(["-user_agent".to_string(), ua.clone()]);
            }
            // ffplay has no start-paused flag; auto_play is ignored
            args.push(url.to_string());
        }
        PlayerFlavour::Mpv => {
            args.push(format!("--title={}", spec.title));
            args.push(format!("--cache-secs={}", spec.buffer_seconds));
            args.push("--force-window=immediate".to_string());
            if audio_only {
                args.push("--no-video".to_string());
            }
            if !auto_play {
                args.push("--pause".to_string());
            }
            if let Some(ua) = &spec.user_agent {
                args.push(format!("--user-agent={}", ua));
            }
            args.push(url.to_string());
        }
        PlayerFlavour::Vlc => {
            args.push(format!("--meta-title={}", spec.title));
            args.push(format!("--network-caching={}", spec.buffer_seconds * 1000));
            if audio_only {
                args.push("--no-video".to_string());
            }
            if !auto_play {
                args.push("--start-paused".to_string());
            }
            if let Some(ua) = &spec.user_agent {
                args.push(format!("--http-user-agent={}", ua));
            }
            args.push(url.to_string());
        }
        PlayerFlavour::Generic => args.push(url.to_string()),
    }

    args
}

/// Map one line of player output to an event, if it carries one
pub fn classify_line(line: &str, buffering: bool) -> Option<BackendEvent> {
    let lower = line.to_lowercase();

    if lower.contains("failed to open")
        || lower.contains("server returned 4")
        || lower.contains("server returned 5")
        || lower.contains("connection refused")
        || lower.contains("no such file")
    {
        return Some(BackendEvent::Error {
            fatal: true,
            kind: ErrorKind::Network,
            detail: line.trim().to_string(),
        });
    }

    if lower.contains("error while decoding")
        || lower.contains("decode_slice_header error")
        || lower.contains("invalid data found")
        || lower.contains("non-existing pps")
    {
        return Some(BackendEvent::Error {
            fatal: false,
            kind: ErrorKind::MediaDecode,
            detail: line.trim().to_string(),
        });
    }

    let is_status = lower.contains("cache:") || lower.starts_with("av:") || lower.starts_with("a:");
    if lower.contains("buffering") {
        if !buffering {
            return Some(BackendEvent::BufferingStarted);
        }
    } else if buffering && is_status {
        return Some(BackendEvent::BufferingEnded);
    }

    None
}

/// First output line that means the stream opened
fn is_ready_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("Input #0")
        || trimmed.starts_with("Playing:")
        || trimmed.starts_with("(+) Video")
        || trimmed.starts_with("(+) Audio")
}

/// Playback through an external player process
pub struct ProcessBackend {
    kind: BackendKind,
    spec: LaunchSpec,
    events: Option<EventSender>,
    sink: Option<Arc<dyn MediaSink>>,
    child: Arc<Mutex<Option<Child>>>,
    /// Output readers from older launches stay silent
    launch: Arc<AtomicU64>,
    url: String,
    auto_play: bool,
}

impl ProcessBackend {
    pub fn new(kind: BackendKind, spec: LaunchSpec) -> Self {
        Self {
            kind,
            spec,
            events: None,
            sink: None,
            child: Arc::new(Mutex::new(None)),
            launch: Arc::new(AtomicU64::new(0)),
            url: String::new(),
            auto_play: true,
        }
    }

    fn spawn_player(&mut self) -> Result<(), BackendError> {
        let args = build_args(&self.spec, self.kind, &self.url, self.auto_play);
        log::info!("[PLAY] {} {}", self.spec.command, args.join(" "));

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&args);
        if let Some(ua) = &self.spec.user_agent {
            cmd.env("USER_AGENT", ua);
        }
        cmd.stderr(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| BackendError::Launch {
            player: self.spec.command.clone(),
            source,
        })?;
        log::info!("[PLAY] Player launched successfully (PID: {})", child.id());

        let launch_id = self.launch.fetch_add(1, Ordering::SeqCst) + 1;
        let stderr = child.stderr.take();
        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }

        if let Some(events) = self.events.clone() {
            let monitor = OutputMonitor {
                events,
                child: Arc::clone(&self.child),
                launch: Arc::clone(&self.launch),
                launch_id,
                announce_on_spawn: PlayerFlavour::detect(&self.spec.command) == PlayerFlavour::Generic,
            };
            thread::spawn(move || monitor.run(stderr));
        }
        Ok(())
    }

    fn kill_player(&self) {
        // Silence the reader before it sees the exit
        self.launch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.child.lock() {
            if let Some(mut child) = slot.take() {
                let _ = child.kill();
                let _ = child.wait(); // Reap the process
            }
        }
    }
}

impl PlaybackBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn attach_events(&mut self, events: EventSender) {
        self.events = Some(events);
    }

    fn initialize(&mut self, sink: &Arc<dyn MediaSink>, url: &str, auto_play: bool) -> Result<(), BackendError> {
        self.url = url.to_string();
        self.auto_play = auto_play;
        sink.bind(url);
        self.sink = Some(Arc::clone(sink));
        self.spawn_player()
    }

    fn supports_recovery(&self) -> bool {
        true
    }

    /// Relaunch the player on the same URL
    fn recover_media_error(&mut self) -> bool {
        self.kill_player();
        match self.spawn_player() {
            Ok(()) => true,
            Err(e) => {
                log::error!("[PLAY] Recovery failed: {}", e);
                false
            }
        }
    }

    fn destroy(&mut self) {
        self.kill_player();
        if let Some(sink) = self.sink.take() {
            sink.unbind();
        }
        self.events = None;
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.kill_player();
    }
}

struct OutputMonitor {
    events: EventSender,
    child: Arc<Mutex<Option<Child>>>,
    launch: Arc<AtomicU64>,
    launch_id: u64,
    announce_on_spawn: bool,
}

impl OutputMonitor {
    fn current(&self) -> bool {
        self.launch.load(Ordering::SeqCst) == self.launch_id
    }

    fn emit(&self, event: BackendEvent) {
        if self.current() {
            self.events.send(event);
        }
    }

    fn run(self, stderr: Option<ChildStderr>) {
        let mut ready = false;
        let mut buffering = false;
        let mut decode_errors = 0u32;

        if self.announce_on_spawn {
            self.emit(BackendEvent::Ready);
            ready = true;
        }

        if let Some(stderr) = stderr {
            let reader = BufReader::new(stderr);
            // Status lines are terminated by '\r', log lines by '\n'
            for chunk in reader.split(b'\r').map_while(Result::ok) {
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    if !self.current() {
                        return;
                    }
                    log::debug!("[PLAYER] {}", line);

                    if !ready && is_ready_line(line) {
                        ready = true;
                        self.emit(BackendEvent::Ready);
                    }
                    if let Some(event) = classify_line(line, buffering) {
                        match &event {
                            BackendEvent::BufferingStarted => buffering = true,
                            BackendEvent::BufferingEnded => buffering = false,
                            BackendEvent::Error { kind: ErrorKind::MediaDecode, .. } => decode_errors += 1,
                            _ => {}
                        }
                        self.emit(event);
                    }
                }
            }
        }

        self.report_exit(decode_errors);
    }

    /// Poll the child until it exits, without holding the lock while waiting
    fn report_exit(&self, decode_errors: u32) {
        loop {
            if !self.current() {
                return;
            }
            let status = match self.child.lock() {
                Ok(mut slot) => match slot.as_mut() {
                    Some(child) => child.try_wait(),
                    None => return,
                },
                Err(_) => return,
            };
            match status {
                Ok(Some(status)) if status.success() => {
                    self.emit(BackendEvent::Ended);
                    return;
                }
                Ok(Some(status)) => {
                    let kind = if decode_errors > 0 { ErrorKind::MediaDecode } else { ErrorKind::Other };
                    self.emit(BackendEvent::Error {
                        fatal: true,
                        kind,
                        detail: format!("player exited with {}", status),
                    });
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(100)),
                Err(e) => {
                    log::warn!("[PLAY] Failed to wait for player: {}", e);
                    return;
                }
            }
        }
    }
}

/// Builds [`ProcessBackend`]s according to the player configuration
pub struct ProcessProvider {
    config: PlayerConfig,
    user_agent: String,
    title: String,
}

impl ProcessProvider {
    pub fn new(config: PlayerConfig, user_agent: &str, title: &str) -> Self {
        Self {
            config,
            user_agent: user_agent.to_string(),
            title: title.to_string(),
        }
    }
}

impl BackendProvider for ProcessProvider {
    fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::DashAdaptive => self.config.supports_dash,
            BackendKind::HlsAdaptive => self.config.supports_hls,
            BackendKind::NativeHls => self.config.native_hls,
            BackendKind::DirectSink => true,
        }
    }

    fn create(&self, kind: BackendKind) -> Result<Box<dyn PlaybackBackend>, BackendError> {
        if !self.supports(kind) {
            return Err(BackendError::Unsupported);
        }
        let spec = LaunchSpec {
            command: self.config.command.clone(),
            buffer_seconds: self.config.buffer_seconds,
            user_agent: self.config.pass_user_agent.then(|| self.user_agent.clone()),
            title: self.title.clone(),
        };
        Ok(Box::new(ProcessBackend::new(kind, spec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::PlayerWindow;
    use std::sync::mpsc::channel;

    fn spec(command: &str) -> LaunchSpec {
        LaunchSpec {
            command: command.to_string(),
            buffer_seconds: 5,
            user_agent: Some("FreeviewIPTV/0.1".to_string()),
            title: "TV1".to_string(),
        }
    }

    #[test]
    fn test_detect_flavour() {
        assert_eq!(PlayerFlavour::detect("/usr/bin/ffplay"), PlayerFlavour::Ffplay);
        assert_eq!(PlayerFlavour::detect(r"C:\Program Files\mpv\mpv.exe"), PlayerFlavour::Mpv);
        assert_eq!(PlayerFlavour::detect("VLC"), PlayerFlavour::Vlc);
        assert_eq!(PlayerFlavour::detect("celluloid"), PlayerFlavour::Generic);
    }

    #[test]
    fn test_mpv_args() {
        let args = build_args(&spec("mpv"), BackendKind::HlsAdaptive, "http://example.com/a.m3u8", false);
        assert!(args.contains(&"--title=TV1".to_string()));
        assert!(args.contains(&"--cache-secs=5".to_string()));
        assert!(args.contains(&"--pause".to_string()));
        assert!(args.contains(&"--user-agent=FreeviewIPTV/0.1".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("http://example.com/a.m3u8"));
        assert!(!args.contains(&"--no-video".to_string()));
    }

    #[test]
    fn test_audio_only_args() {
        let args = build_args(&spec("ffplay"), BackendKind::DirectSink, "http://example.com/a.mp3", true);
        assert!(args.contains(&"-nodisp".to_string()));
        let args = build_args(&spec("vlc"), BackendKind::DirectSink, "http://example.com/a.mp3", true);
        assert!(args.contains(&"--no-video".to_string()));
        assert!(args.contains(&"--network-caching=5000".to_string()));
    }

    #[test]
    fn test_generic_player_gets_url_only() {
        let args = build_args(&spec("celluloid"), BackendKind::DashAdaptive, "http://example.com/a.mpd", true);
        assert_eq!(args, vec!["http://example.com/a.mpd".to_string()]);
    }

    #[test]
    fn test_classify_lines() {
        assert!(matches!(
            classify_line("[h264 @ 0x55] error while decoding MB 10 4", false),
            Some(BackendEvent::Error { fatal: false, kind: ErrorKind::MediaDecode, .. })
        ));
        assert!(matches!(
            classify_line("http://example.com/a.m3u8: Server returned 404 Not Found", false),
            Some(BackendEvent::Error { fatal: true, kind: ErrorKind::Network, .. })
        ));
        assert_eq!(classify_line("AV: 00:00:03 / 00:00:00 Cache: 0.1s (Buffering)", false), Some(BackendEvent::BufferingStarted));
        assert_eq!(classify_line("AV: 00:00:03 / 00:00:00 Cache: 0.1s (Buffering)", true), None);
        assert_eq!(classify_line("AV: 00:00:05 / 00:00:00 Cache: 4.9s", true), Some(BackendEvent::BufferingEnded));
        assert_eq!(classify_line("AV: 00:00:05 / 00:00:00 Cache: 4.9s", false), None);
        assert_eq!(classify_line("Stream #0:0: Video: h264", false), None);
    }

    #[test]
    fn test_provider_respects_config() {
        let config = PlayerConfig {
            supports_dash: false,
            ..PlayerConfig::default()
        };
        let provider = ProcessProvider::new(config, "ua", "title");
        assert!(!provider.supports(BackendKind::DashAdaptive));
        assert!(provider.supports(BackendKind::HlsAdaptive));
        assert!(matches!(provider.create(BackendKind::DashAdaptive), Err(BackendError::Unsupported)));
        assert_eq!(provider.create(BackendKind::HlsAdaptive).unwrap().kind(), BackendKind::HlsAdaptive);
    }

    #[test]
    fn test_missing_player_fails_to_launch() {
        let mut backend = ProcessBackend::new(BackendKind::HlsAdaptive, spec("/nonexistent/freeview-test-player"));
        let (tx, _rx) = channel();
        backend.attach_events(EventSender::new(1, tx));
        let sink: Arc<dyn MediaSink> = Arc::new(PlayerWindow::new("t", vec![], true));
        let result = backend.initialize(&sink, "http://example.com/a.m3u8", true);
        assert!(matches!(result, Err(BackendError::Launch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_reports_ready_then_ended() {
        let mut backend = ProcessBackend::new(BackendKind::HlsAdaptive, spec("true"));
        let (tx, rx) = channel();
        backend.attach_events(EventSender::new(7, tx));
        let sink: Arc<dyn MediaSink> = Arc::new(PlayerWindow::new("t", vec![], true));
        backend.initialize(&sink, "http://example.com/a.m3u8", true).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, (7, BackendEvent::Ready));
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, (7, BackendEvent::Ended));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_exit_is_fatal() {
        let mut backend = ProcessBackend::new(BackendKind::HlsAdaptive, spec("false"));
        let (tx, rx) = channel();
        backend.attach_events(EventSender::new(1, tx));
        let sink: Arc<dyn MediaSink> = Arc::new(PlayerWindow::new("t", vec![], true));
        backend.initialize(&sink, "http://example.com/a.m3u8", true).unwrap();

        let _ready = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (_, event) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, BackendEvent::Error { fatal: true, kind: ErrorKind::Other, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_destroy_silences_events_and_unbinds() {
        let mut backend = ProcessBackend::new(BackendKind::HlsAdaptive, spec("sleep"));
        let (tx, rx) = channel();
        backend.attach_events(EventSender::new(1, tx));
        let window = Arc::new(PlayerWindow::new("t", vec![], true));
        let sink: Arc<dyn MediaSink> = window.clone();
        // "sleep <url>" fails fast on the bogus duration; use a number instead
        backend.initialize(&sink, "5", true).unwrap();
        assert_eq!(window.bound_source().as_deref(), Some("5"));

        let _ready = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        backend.destroy();
        assert_eq!(window.bound_source(), None);
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }
}

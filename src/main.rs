//! Freeview IPTV - live channel aggregator and player
//! Ingests M3U playlists, keeps the channels that answer, plays them through
//! an external player and shows the XMLTV programme guide alongside.

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod app;
mod catalog;
mod config;
mod console;
mod epg;
mod error;
mod liveness;
mod m3u_parser;
mod models;
mod playback;
mod view;

use app::App;
use catalog::{ingest_all, Backoff, HttpFetcher, IngestReport, Ingestor, SourceCatalog};
use config::AppConfig;
use console::ConsoleLogger;
use epg::{format_datetime, GuideController, GuideWindow, HttpScheduleSource, Schedule, ScheduleSource};
use error::NetworkError;
use liveness::LivenessProber;
use m3u_parser::ParseOptions;
use models::PlaylistSource;
use playback::{PlaybackSession, PlayerWindow, ProcessProvider, SessionOptions, HLS_MIME};
use view::{ConsoleView, ViewCallbacks};

const APP_TITLE: &str = "Freeview IPTV";
const PUMP_INTERVAL: Duration = Duration::from_millis(50);
/// Log lines replayed to stderr when a quiet run fails
const FAILURE_LOG_LINES: usize = 20;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Playlist URL to ingest (repeatable, replaces the configured list)
    #[arg(long = "playlist", global = true)]
    playlists: Vec<String>,

    /// XMLTV guide URL
    #[arg(long, global = true)]
    guide_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest the playlists and list live channels by origin
    Channels,
    /// Play a channel by list number or name
    Play { query: String },
    /// Print the programme guide for a channel id
    Guide { channel_id: String },
    /// Check whether stream URLs are reachable
    Probe {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Write the effective configuration to the default config file
    SaveConfig,
}

/// Used when no guide URL is configured or announced by a playlist
struct NoSchedule;

impl ScheduleSource for NoSchedule {
    fn fetch(&self) -> Result<Schedule, NetworkError> {
        Err(NetworkError::Request("no guide URL configured".to_string()))
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, error::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };

    if !cli.playlists.is_empty() {
        config.playlists = cli
            .playlists
            .iter()
            .enumerate()
            .map(|(i, url)| PlaylistSource {
                origin: format!("playlist-{}", i + 1),
                url: url.clone(),
            })
            .collect();
    }
    if let Some(url) = &cli.guide_url {
        config.guide_url = url.clone();
    }
    Ok(config)
}

/// Start ingestion of every configured playlist
fn start_ingest(config: &AppConfig, catalog: &SourceCatalog) -> catalog::IngestHandle {
    let fetcher = HttpFetcher {
        user_agent: config.user_agent.clone(),
        timeout: config.fetch_timeout(),
    };
    let prober = LivenessProber::http(config.probe_timeout(), &config.user_agent, config.probe_concurrency);
    let options = ParseOptions {
        default_logo: config.default_logo.clone(),
        policy: config.alignment_policy,
    };
    let ingestor = Arc::new(Ingestor::new(Box::new(fetcher), prober, options));
    ingest_all(catalog, ingestor, config.playlists.clone())
}

fn print_report(report: &IngestReport) {
    for origin in &report.origins {
        match &origin.error {
            Some(e) => log::warn!("[INGEST] {}: {}", origin.origin, e),
            None => log::info!("[INGEST] {}: {} of {} channels live", origin.origin, origin.live, origin.parsed),
        }
    }
}

fn schedule_source(config: &AppConfig, report: &IngestReport) -> Arc<dyn ScheduleSource> {
    let url = Some(config.guide_url.as_str())
        .filter(|url| !url.is_empty())
        .or_else(|| report.guide_url());
    match url {
        Some(url) => Arc::new(HttpScheduleSource::new(url, &config.user_agent, config.fetch_timeout())),
        None => Arc::new(NoSchedule),
    }
}

fn run_channels(config: &AppConfig, view: &ConsoleView) -> bool {
    let catalog = SourceCatalog::new();
    view.set_spinner_visible(true);
    let report = start_ingest(config, &catalog).wait();
    view.set_spinner_visible(false);
    print_report(&report);

    if catalog.is_empty() {
        view.alert("No live channels found");
        return false;
    }
    view.render_channel_cards(&catalog.sources_by_origin());
    true
}

fn run_play(config: &AppConfig, query: &str) -> bool {
    let view: Rc<dyn ViewCallbacks> = Rc::new(ConsoleView);
    let catalog = SourceCatalog::new();
    view.set_spinner_visible(true);
    let handle = start_ingest(config, &catalog);

    let backoff = Backoff::with_deadline(config.readiness_timeout());
    if !catalog.wait_for_minimum(config.min_sources.max(1), &backoff) {
        view.set_spinner_visible(false);
        view.alert("No live channels found");
        return false;
    }
    // Channel numbers are only stable once every playlist settled
    let report = handle.wait();
    print_report(&report);

    let mut native_types = vec!["audio/*".to_string()];
    if config.player.native_hls {
        native_types.push(HLS_MIME.to_string());
    }
    let sink = Arc::new(PlayerWindow::new(APP_TITLE, native_types, config.player.auto_play));
    let provider = ProcessProvider::new(config.player.clone(), &config.user_agent, APP_TITLE);
    let options = SessionOptions {
        auto_play: config.player.auto_play,
        max_recovery_attempts: config.max_recovery_attempts,
    };
    let session = PlaybackSession::new(Box::new(provider), sink, Rc::clone(&view), options);
    let guide = GuideController::new(
        schedule_source(config, &report),
        Rc::clone(&view),
        config.guide_batch_size,
        config.guide_refresh_interval(),
    );
    let mut app = App::new(catalog, session, guide, Rc::clone(&view));

    let Some(channel) = app.find(query) else {
        view.set_spinner_visible(false);
        view.alert(&format!("No channel matches '{}'", query));
        app.render_catalog();
        return false;
    };
    app.select(channel.id);

    while app.is_active() {
        app.pump();
        thread::sleep(PUMP_INTERVAL);
    }
    app.pump();

    !matches!(app.session().current_state(), playback::PlayerState::Failed(_))
}

fn run_guide(config: &AppConfig, channel_id: &str, view: &ConsoleView) -> bool {
    if config.guide_url.is_empty() {
        view.alert("No guide URL configured (use --guide-url)");
        return false;
    }
    let source = HttpScheduleSource::new(&config.guide_url, &config.user_agent, config.fetch_timeout());
    view.set_spinner_visible(true);
    let schedule = match source.fetch() {
        Ok(schedule) => schedule,
        Err(e) => {
            view.alert(&format!("Failed to load guide: {}", e));
            return false;
        }
    };

    let now = chrono::Utc::now();
    let mut window = GuideWindow::new(channel_id, &schedule, now, config.guide_batch_size);
    let name = schedule
        .channels
        .get(channel_id)
        .map(|c| c.name.as_str())
        .unwrap_or(channel_id);
    println!("== {} ({} programmes from {})", name, window.len(), format_datetime(now));
    view.set_programme_tooltip(&window.tooltip());
    while !window.is_exhausted() {
        view.render_guide_batch(&window.load_next_batch());
    }
    true
}

fn run_probe(config: &AppConfig, urls: &[String]) -> bool {
    let prober = LivenessProber::http(config.probe_timeout(), &config.user_agent, config.probe_concurrency);
    let results = prober.probe_all(urls);
    for (url, live) in urls.iter().zip(&results) {
        println!("{:<8} {}", if *live { "online" } else { "offline" }, url);
    }
    results.iter().all(|live| *live)
}

fn run_save_config(config: &AppConfig) -> bool {
    match config.save() {
        Ok(path) => {
            println!("Saved configuration to {}", path.display());
            true
        }
        Err(e) => {
            log::error!("[CONFIG] {}", e);
            false
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    // Quiet runs keep the log in memory and only show it on failure
    let logger = ConsoleLogger::install(level, cli.verbose);

    let view = ConsoleView;
    let ok = match load_config(&cli) {
        Ok(config) => match &cli.command {
            Command::Channels => run_channels(&config, &view),
            Command::Play { query } => run_play(&config, query),
            Command::Guide { channel_id } => run_guide(&config, channel_id, &view),
            Command::Probe { urls } => run_probe(&config, urls),
            Command::SaveConfig => run_save_config(&config),
        },
        Err(e) => {
            log::error!("[CONFIG] {}", e);
            false
        }
    };

    if ok {
        return ExitCode::SUCCESS;
    }
    if !cli.verbose {
        let lines = logger.lines();
        for line in &lines[lines.len().saturating_sub(FAILURE_LOG_LINES)..] {
            eprintln!("{}", line);
        }
    }
    ExitCode::FAILURE
}

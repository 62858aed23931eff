//! Source catalog: live channels aggregated from one or more playlists
//!
//! Lifecycle is `new → ingest_all → read`. Ingestion runs on background
//! threads and appends each playlist's live channels as soon as that playlist
//! settles, so readers may observe the catalog growing.

use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::NetworkError;
use crate::liveness::LivenessProber;
use crate::m3u_parser::{download_playlist, parse_playlist, ParseOptions, PlaylistEntry};
use crate::models::{ChannelSource, PlaylistSource, SourceId};

#[derive(Default)]
struct CatalogInner {
    sources: Vec<ChannelSource>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct SourceCatalog {
    inner: Arc<RwLock<CatalogInner>>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append entries under an origin, assigning ids. Returns the number added.
    pub fn append(&self, origin: &str, entries: Vec<PlaylistEntry>) -> usize {
        let mut inner = self.write();
        let count = entries.len();
        for entry in entries {
            let id = SourceId(inner.next_id);
            inner.next_id += 1;
            inner.sources.push(ChannelSource {
                id,
                label: entry.label,
                stream_type: entry.stream_type,
                url: entry.url,
                logo_url: entry.logo_url,
                origin_group: origin.to_string(),
                guide_id: entry.guide_id,
                group_title: entry.group_title,
            });
        }
        count
    }

    pub fn all_sources(&self) -> Vec<ChannelSource> {
        self.read().sources.clone()
    }

    /// Sources grouped by origin; groups appear in first-seen order
    pub fn sources_by_origin(&self) -> Vec<(String, Vec<ChannelSource>)> {
        let inner = self.read();
        let mut groups: Vec<(String, Vec<ChannelSource>)> = Vec::new();
        for source in &inner.sources {
            match groups.iter_mut().find(|(origin, _)| *origin == source.origin_group) {
                Some((_, members)) => members.push(source.clone()),
                None => groups.push((source.origin_group.clone(), vec![source.clone()])),
            }
        }
        groups
    }

    pub fn has_minimum_sources(&self, n: usize) -> bool {
        self.read().sources.len() >= n
    }

    pub fn len(&self) -> usize {
        self.read().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: SourceId) -> Option<ChannelSource> {
        self.read().sources.iter().find(|s| s.id == id).cloned()
    }

    /// Remove a source, e.g. one whose stream type no backend could play
    pub fn evict(&self, id: SourceId) -> Option<ChannelSource> {
        let mut inner = self.write();
        let index = inner.sources.iter().position(|s| s.id == id)?;
        Some(inner.sources.remove(index))
    }

    /// Poll the readiness predicate with capped exponential backoff.
    /// Fallback for callers that can't wait on an [`IngestHandle`].
    pub fn wait_for_minimum(&self, n: usize, backoff: &Backoff) -> bool {
        let started = Instant::now();
        let mut interval = backoff.initial;
        loop {
            if self.has_minimum_sources(n) {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= backoff.deadline {
                return false;
            }
            thread::sleep(interval.min(backoff.deadline - elapsed));
            interval = backoff.next(interval);
        }
    }
}

/// Capped exponential backoff for readiness polling
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max_interval: Duration,
    pub deadline: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2,
            max_interval: Duration::from_secs(2),
            deadline: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }

    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(self.factor).min(self.max_interval)
    }
}

/// Source of playlist text
pub trait PlaylistFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, NetworkError>;
}

pub struct HttpFetcher {
    pub user_agent: String,
    pub timeout: Duration,
}

impl PlaylistFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, NetworkError> {
        download_playlist(url, &self.user_agent, self.timeout)
    }
}

/// Outcome of one playlist's pipeline
#[derive(Debug, Clone, Default)]
pub struct OriginReport {
    pub origin: String,
    pub parsed: usize,
    pub live: usize,
    pub guide_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// In completion order
    pub origins: Vec<OriginReport>,
}

impl IngestReport {
    pub fn total_live(&self) -> usize {
        self.origins.iter().map(|o| o.live).sum()
    }

    /// First guide URL announced by a playlist header
    pub fn guide_url(&self) -> Option<&str> {
        self.origins.iter().find_map(|o| o.guide_url.as_deref())
    }
}

/// fetch → parse → probe → append
pub struct Ingestor {
    fetcher: Box<dyn PlaylistFetcher>,
    prober: LivenessProber,
    options: ParseOptions,
}

impl Ingestor {
    pub fn new(fetcher: Box<dyn PlaylistFetcher>, prober: LivenessProber, options: ParseOptions) -> Self {
        Self { fetcher, prober, options }
    }

    /// Run one playlist through the pipeline. Errors are logged and reported,
    /// never propagated.
    pub fn run(&self, catalog: &SourceCatalog, playlist: &PlaylistSource) -> OriginReport {
        let mut report = OriginReport {
            origin: playlist.origin.clone(),
            ..Default::default()
        };

        log::info!("[INGEST] Fetching playlist {} ({})", playlist.origin, playlist.url);
        let content = match self.fetcher.fetch(&playlist.url) {
            Ok(content) => content,
            Err(e) => {
                log::error!("[INGEST] Failed to fetch playlist {}: {}", playlist.url, e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let parsed = match parse_playlist(&content, &self.options) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!("[INGEST] Failed to parse playlist {}: {}", playlist.url, e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.parsed = parsed.entries.len();
        report.guide_url = parsed.guide_url;
        log::info!("[INGEST] Processing {} channels from {}", report.parsed, playlist.origin);

        let urls: Vec<String> = parsed.entries.iter().map(|e| e.url.clone()).collect();
        let liveness = self.prober.probe_all(&urls);
        let live: Vec<PlaylistEntry> = parsed
            .entries
            .into_iter()
            .zip(liveness)
            .filter_map(|(entry, live)| live.then_some(entry))
            .collect();

        report.live = catalog.append(&playlist.origin, live);
        log::info!(
            "[INGEST] {} channels online from {} ({} in catalog)",
            report.live,
            playlist.origin,
            catalog.len()
        );
        report
    }
}

/// Completion signal for a batch of ingestion pipelines
pub struct IngestHandle {
    receiver: Receiver<OriginReport>,
    expected: usize,
    workers: Vec<thread::JoinHandle<()>>,
}

impl IngestHandle {
    /// True once every pipeline settled
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|w| w.is_finished())
    }

    /// Block until every pipeline settled
    pub fn wait(self) -> IngestReport {
        let mut report = IngestReport::default();
        while report.origins.len() < self.expected {
            match self.receiver.recv() {
                Ok(origin) => report.origins.push(origin),
                // A worker died without reporting
                Err(_) => break,
            }
        }
        for worker in self.workers {
            let _ = worker.join();
        }
        report
    }
}

/// Run one playlist's pipeline on a background thread
pub fn ingest(catalog: &SourceCatalog, ingestor: Arc<Ingestor>, playlist: PlaylistSource) -> thread::JoinHandle<OriginReport> {
    let catalog = catalog.clone();
    thread::spawn(move || ingestor.run(&catalog, &playlist))
}

/// Run every playlist's pipeline concurrently
pub fn ingest_all(catalog: &SourceCatalog, ingestor: Arc<Ingestor>, playlists: Vec<PlaylistSource>) -> IngestHandle {
    let (sender, receiver) = channel();
    let expected = playlists.len();
    let workers = playlists
        .into_iter()
        .map(|playlist| {
            let catalog = catalog.clone();
            let ingestor = Arc::clone(&ingestor);
            let sender = sender.clone();
            thread::spawn(move || {
                let report = ingestor.run(&catalog, &playlist);
                let _ = sender.send(report);
            })
        })
        .collect();

    IngestHandle {
        receiver,
        expected,
        workers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::Probe;
    use crate::models::StreamType;
    use std::collections::HashMap;

    struct MapFetcher(HashMap<String, String>);

    impl PlaylistFetcher for MapFetcher {
        fn fetch(&self, url: &str) -> Result<String, NetworkError> {
            self.0.get(url).cloned().ok_or(NetworkError::Status(404))
        }
    }

    struct OfflineSet(Vec<&'static str>);

    impl Probe for OfflineSet {
        fn is_live(&self, url: &str) -> bool {
            !self.0.iter().any(|offline| url == *offline)
        }
    }

    const THREE_CHANNELS: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="tv1" tvg-logo="http://logos.example.com/tv1.png",TV1
https://example.com/tv1.m3u8
#EXTINF:-1 tvg-id="tv2" tvg-logo="http://logos.example.com/tv2.png",TV2
https://example.com/tv2.m3u8
#EXTINF:-1 tvg-id="tv3",TV3
https://example.com/tv3.m3u8
"#;

    fn ingestor(playlists: &[(&str, &str)], offline: Vec<&'static str>) -> Arc<Ingestor> {
        let fetcher = MapFetcher(
            playlists
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        );
        Arc::new(Ingestor::new(
            Box::new(fetcher),
            LivenessProber::new(Box::new(OfflineSet(offline)), 4),
            ParseOptions::default(),
        ))
    }

    fn playlist(origin: &str, url: &str) -> PlaylistSource {
        PlaylistSource {
            origin: origin.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_all_online_keeps_every_channel() {
        let catalog = SourceCatalog::new();
        let ingestor = ingestor(&[("http://lists.example.com/a.m3u", THREE_CHANNELS)], vec![]);
        let report = ingest_all(&catalog, ingestor, vec![playlist("a", "http://lists.example.com/a.m3u")]).wait();
        assert_eq!(report.total_live(), 3);
        assert_eq!(catalog.all_sources().len(), 3);
    }

    #[test]
    fn test_offline_channel_excluded() {
        let catalog = SourceCatalog::new();
        let ingestor = ingestor(
            &[("http://lists.example.com/a.m3u", THREE_CHANNELS)],
            vec!["https://example.com/tv2.m3u8"],
        );
        ingest_all(&catalog, ingestor, vec![playlist("a", "http://lists.example.com/a.m3u")]).wait();

        let sources = catalog.all_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].label, "TV1");
        assert_eq!(sources[0].logo_url, "http://logos.example.com/tv1.png");
        assert_eq!(sources[1].label, "TV3");
        assert_eq!(sources[1].url, "https://example.com/tv3.m3u8");
        assert_eq!(sources[1].logo_url, crate::config::DEFAULT_LOGO);
        assert_eq!(sources[1].guide_key(), "tv3");
        assert_eq!(sources[0].stream_type, StreamType::Hls);
    }

    #[test]
    fn test_failed_playlist_does_not_block_others() {
        let catalog = SourceCatalog::new();
        let ingestor = ingestor(&[("http://lists.example.com/a.m3u", THREE_CHANNELS)], vec![]);
        let report = ingest_all(
            &catalog,
            ingestor,
            vec![
                playlist("missing", "http://lists.example.com/missing.m3u"),
                playlist("a", "http://lists.example.com/a.m3u"),
            ],
        )
        .wait();
        assert_eq!(report.origins.len(), 2);
        assert_eq!(catalog.len(), 3);
        let missing = report.origins.iter().find(|o| o.origin == "missing").unwrap();
        assert!(missing.error.is_some());
        assert_eq!(missing.live, 0);
    }

    #[test]
    fn test_grouped_by_origin() {
        let catalog = SourceCatalog::new();
        let radio = "#EXTM3U\n#EXTINF:-1,Radio One\nhttp://radio.example.com/one.mp3\n";
        let ingestor = ingestor(
            &[
                ("http://lists.example.com/tv.m3u", THREE_CHANNELS),
                ("http://lists.example.com/radio.m3u", radio),
            ],
            vec![],
        );
        ingest_all(
            &catalog,
            ingestor,
            vec![
                playlist("tv", "http://lists.example.com/tv.m3u"),
                playlist("radio", "http://lists.example.com/radio.m3u"),
            ],
        )
        .wait();

        let groups = catalog.sources_by_origin();
        assert_eq!(groups.len(), 2);
        let radio_group = groups.iter().find(|(origin, _)| origin == "radio").unwrap();
        assert_eq!(radio_group.1.len(), 1);
        assert_eq!(radio_group.1[0].stream_type, StreamType::NativeAudio);
        let tv_group = groups.iter().find(|(origin, _)| origin == "tv").unwrap();
        assert_eq!(tv_group.1.len(), 3);
    }

    #[test]
    fn test_ids_unique_and_evict() {
        let catalog = SourceCatalog::new();
        let ingestor = ingestor(&[("http://lists.example.com/a.m3u", THREE_CHANNELS)], vec![]);
        ingest_all(&catalog, ingestor, vec![playlist("a", "http://lists.example.com/a.m3u")]).wait();

        let ids: Vec<SourceId> = catalog.all_sources().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SourceId(0), SourceId(1), SourceId(2)]);

        let evicted = catalog.evict(SourceId(1)).unwrap();
        assert_eq!(evicted.label, "TV2");
        assert!(catalog.get(SourceId(1)).is_none());
        assert_eq!(catalog.get(SourceId(2)).unwrap().label, "TV3");
        assert!(catalog.evict(SourceId(1)).is_none());
    }

    #[test]
    fn test_single_ingest_joins_with_report() {
        let catalog = SourceCatalog::new();
        let ingestor = ingestor(
            &[("http://lists.example.com/a.m3u", THREE_CHANNELS)],
            vec!["https://example.com/tv1.m3u8"],
        );
        let report = ingest(&catalog, ingestor, playlist("a", "http://lists.example.com/a.m3u"))
            .join()
            .unwrap();
        assert_eq!(report.parsed, 3);
        assert_eq!(report.live, 2);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_guide_url_reported() {
        let catalog = SourceCatalog::new();
        let body = "#EXTM3U x-tvg-url=\"http://epg.example.com/guide.xml\"\n#EXTINF:-1,A\nhttp://example.com/a.m3u8\n";
        let ingestor = ingestor(&[("http://lists.example.com/a.m3u", body)], vec![]);
        let report = ingest_all(&catalog, ingestor, vec![playlist("a", "http://lists.example.com/a.m3u")]).wait();
        assert_eq!(report.guide_url(), Some("http://epg.example.com/guide.xml"));
    }

    #[test]
    fn test_wait_for_minimum_polls_until_ready() {
        let catalog = SourceCatalog::new();
        let writer = catalog.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            writer.append(
                "late",
                vec![PlaylistEntry {
                    label: "Late".to_string(),
                    url: "http://example.com/late.m3u8".to_string(),
                    logo_url: "placeholder.png".to_string(),
                    stream_type: StreamType::Hls,
                    guide_id: None,
                    group_title: None,
                }],
            );
        });
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            factor: 2,
            max_interval: Duration::from_millis(50),
            deadline: Duration::from_secs(5),
        };
        assert!(catalog.wait_for_minimum(1, &backoff));
    }

    #[test]
    fn test_wait_for_minimum_gives_up_at_deadline() {
        let catalog = SourceCatalog::new();
        let backoff = Backoff::with_deadline(Duration::from_millis(120));
        let started = Instant::now();
        assert!(!catalog.wait_for_minimum(1, &backoff));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff::default();
        let mut interval = backoff.initial;
        for _ in 0..10 {
            interval = backoff.next(interval);
        }
        assert_eq!(interval, backoff.max_interval);
    }
}

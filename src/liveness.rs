//! Point-in-time reachability checks for channel URLs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::NetworkError;

/// A single reachability check
pub trait Probe: Send + Sync {
    fn is_live(&self, url: &str) -> bool;
}

/// HEAD request; live iff a 2xx arrives before the timeout
pub struct HttpProbe {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .max_idle_connections(4)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent();
        Self {
            agent,
            user_agent: user_agent.to_string(),
        }
    }

    fn check(&self, url: &str) -> Result<(), NetworkError> {
        let response = self
            .agent
            .head(url)
            .header("User-Agent", &self.user_agent)
            .call()?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NetworkError::Status(response.status().as_u16()))
        }
    }
}

impl Probe for HttpProbe {
    fn is_live(&self, url: &str) -> bool {
        match self.check(url) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[PROBE] {} offline: {}", url, e);
                false
            }
        }
    }
}

pub struct LivenessProber {
    probe: Box<dyn Probe>,
    max_concurrency: usize,
}

impl LivenessProber {
    pub fn new(probe: Box<dyn Probe>, max_concurrency: usize) -> Self {
        Self {
            probe,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn http(timeout: Duration, user_agent: &str, max_concurrency: usize) -> Self {
        Self::new(Box::new(HttpProbe::new(timeout, user_agent)), max_concurrency)
    }

    /// Check every URL; result `i` belongs to `urls[i]`.
    /// Returns only after all checks settled.
    pub fn probe_all(&self, urls: &[String]) -> Vec<bool> {
        if urls.is_empty() {
            return Vec::new();
        }

        let next = AtomicUsize::new(0);
        let results = Mutex::new(vec![false; urls.len()]);
        let workers = self.max_concurrency.min(urls.len());
        let probe = self.probe.as_ref();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(url) = urls.get(index) else {
                        break;
                    };
                    let live = probe.is_live(url);
                    if let Ok(mut results) = results.lock() {
                        results[index] = live;
                    }
                });
            }
        });

        let results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::info!(
            "[PROBE] {} of {} channels online",
            results.iter().filter(|live| **live).count(),
            urls.len()
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    struct StaticProbe<F: Fn(&str) -> bool + Send + Sync>(F);

    impl<F: Fn(&str) -> bool + Send + Sync> Probe for StaticProbe<F> {
        fn is_live(&self, url: &str) -> bool {
            (self.0)(url)
        }
    }

    /// Tracks how many checks run at once
    struct CountingProbe {
        in_flight: AtomicUsize,
        peak: std::sync::Arc<AtomicUsize>,
    }

    impl Probe for CountingProbe {
        fn is_live(&self, _url: &str) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            true
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://example.com/{}.m3u8", i)).collect()
    }

    /// Minimal HTTP server: "/ok" answers 200, anything else 404
    fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let status = if request.starts_with("HEAD /ok ") { "200 OK" } else { "404 Not Found" };
                let _ = write!(stream, "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
            }
        });
        format!("http://{}", addr)
    }

    /// Accepts connections and never answers
    fn spawn_silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_results_align_with_input() {
        let prober = LivenessProber::new(Box::new(StaticProbe(|url: &str| url.ends_with("1.m3u8") || url.ends_with("3.m3u8"))), 2);
        let results = prober.probe_all(&urls(5));
        assert_eq!(results, vec![false, true, false, true, false]);
    }

    #[test]
    fn test_all_failing_reports_zero() {
        let prober = LivenessProber::new(Box::new(StaticProbe(|_: &str| false)), 8);
        let results = prober.probe_all(&urls(10));
        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().filter(|live| **live).count(), 0);
    }

    #[test]
    fn test_empty_input() {
        let prober = LivenessProber::new(Box::new(StaticProbe(|_: &str| true)), 4);
        assert!(prober.probe_all(&[]).is_empty());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let peak = std::sync::Arc::new(AtomicUsize::new(0));
        let prober = LivenessProber::new(
            Box::new(CountingProbe {
                in_flight: AtomicUsize::new(0),
                peak: peak.clone(),
            }),
            3,
        );
        let results = prober.probe_all(&urls(12));
        assert!(results.iter().all(|live| *live));
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {}", peak);
        assert!(peak >= 1);
    }

    #[test]
    fn test_waits_for_every_check() {
        let finished = std::sync::Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let prober = LivenessProber::new(
            Box::new(StaticProbe(move |url: &str| {
                if url.ends_with("0.m3u8") {
                    thread::sleep(Duration::from_millis(100));
                    flag.store(true, Ordering::SeqCst);
                }
                true
            })),
            4,
        );
        prober.probe_all(&urls(4));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_http_probe_status() {
        let base = spawn_server();
        let probe = HttpProbe::new(Duration::from_secs(5), "test-agent");
        assert!(probe.is_live(&format!("{}/ok", base)));
        assert!(!probe.is_live(&format!("{}/missing", base)));
    }

    #[test]
    fn test_http_probe_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let probe = HttpProbe::new(Duration::from_secs(2), "test-agent");
        assert!(!probe.is_live(&format!("http://127.0.0.1:{}/ok", port)));
    }

    #[test]
    fn test_http_probe_times_out() {
        let base = spawn_silent_server();
        let prober = LivenessProber::http(Duration::from_millis(300), "test-agent", 4);
        let started = Instant::now();
        let results = prober.probe_all(&[format!("{}/a", base), format!("{}/b", base)]);
        assert_eq!(results, vec![false, false]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

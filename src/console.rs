//! Console log: a `log` backend that keeps recent lines in memory

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_LINES: usize = 500;

/// Get current time as HH:MM:SS (UTC)
fn timestamp_now() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let secs = now % 86400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Clone)]
pub struct ConsoleLogger {
    level: LevelFilter,
    mirror_stderr: bool,
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter, mirror_stderr: bool) -> Self {
        Self {
            level,
            mirror_stderr,
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LINES))),
        }
    }

    /// Install as the global logger. Returns a handle for reading lines back.
    pub fn install(level: LevelFilter, mirror_stderr: bool) -> Self {
        let logger = Self::new(level, mirror_stderr);
        if log::set_boxed_logger(Box::new(logger.clone())).is_ok() {
            log::set_max_level(level);
        }
        logger
    }

    /// Snapshot of the buffered lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == MAX_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        let line = format!("[{}] [{}] {}", timestamp_now(), tag, record.args());
        if self.mirror_stderr {
            eprintln!("{}", line);
        }
        self.push(line);
    }

    fn flush(&self) {}
}

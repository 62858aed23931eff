//! XMLTV schedule parser
//! Streaming parser built on quick-xml events - handles 100MB+ guides
//! Supports both plain XML and gzip-compressed payloads

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use crate::error::{NetworkError, ParseError};

/// Stored parse errors are capped, the count is not
const MAX_STORED_ERRORS: usize = 50;

/// A single scheduled programme
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammeEvent {
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl ProgrammeEvent {
    pub fn is_airing(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.stop
    }
}

/// Channel information from the guide
#[derive(Debug, Clone, PartialEq)]
pub struct GuideChannel {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
}

/// Parsed schedule document
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub channels: HashMap<String, GuideChannel>,
    /// Programmes by channel id, sorted by start time
    pub programmes: HashMap<String, Vec<ProgrammeEvent>>,
    /// Programmes rejected for bad timestamps
    pub dropped: usize,
    /// First XML errors encountered
    pub errors: Vec<String>,
    pub error_count: usize,
}

impl Schedule {
    pub fn events_for(&self, channel_id: &str) -> &[ProgrammeEvent] {
        self.programmes.get(channel_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn programme_count(&self) -> usize {
        self.programmes.values().map(|v| v.len()).sum()
    }
}

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    Root,
    Channel,
    Programme,
    Title,
    Desc,
    Category,
    DisplayName,
}

/// Programme under construction; times stay raw until the element closes
struct PendingProgramme {
    channel_id: String,
    start: Option<String>,
    stop: Option<String>,
    title: String,
    description: Option<String>,
    category: Option<String>,
}

impl PendingProgramme {
    fn finish(self) -> Result<ProgrammeEvent, ParseError> {
        let start = parse_xmltv_time(self.start.as_deref().unwrap_or_default())?;
        let stop = parse_xmltv_time(self.stop.as_deref().unwrap_or_default())?;
        if start > stop {
            return Err(ParseError::InvalidTimestamp(format!(
                "start {} is after stop {}",
                start, stop
            )));
        }
        Ok(ProgrammeEvent {
            channel_id: self.channel_id,
            title: self.title,
            description: self.description,
            category: self.category,
            start,
            stop,
        })
    }
}

pub struct ScheduleParser;

impl ScheduleParser {
    pub fn parse(xml: &str) -> Schedule {
        Self::parse_reader(xml.as_bytes())
    }

    /// Parse from a reader, auto-detecting gzip by its magic bytes
    pub fn parse_stream<R: Read>(reader: R) -> Result<Schedule, NetworkError> {
        let mut reader = BufReader::with_capacity(64 * 1024, reader);
        let head = reader.fill_buf().map_err(|e| NetworkError::Read(e.to_string()))?;
        let gzip = head.starts_with(&[0x1f, 0x8b]);

        if gzip {
            log::debug!("[EPG] Gzip payload detected");
            let decoder = BufReader::with_capacity(64 * 1024, GzDecoder::new(reader));
            Ok(Self::parse_reader(SanitizingBufReader::new(decoder)))
        } else {
            Ok(Self::parse_reader(SanitizingBufReader::new(reader)))
        }
    }

    /// Streaming parse. Malformed programmes are dropped, never fatal.
    pub fn parse_reader<R: BufRead>(reader: R) -> Schedule {
        // Text is trimmed per element; trimming per event would eat the
        // spaces around entity references
        let mut xml_reader = Reader::from_reader(reader);

        let mut schedule = Schedule::default();
        let mut buf = Vec::with_capacity(8192);

        let mut state = ParserState::Root;
        let mut current_channel: Option<GuideChannel> = None;
        let mut current_programme: Option<PendingProgramme> = None;
        let mut text_buf = String::new();

        loop {
            let position = xml_reader.buffer_position();
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                    b"channel" => {
                        state = ParserState::Channel;
                        current_channel = Some(GuideChannel {
                            id: get_attribute(e, b"id").unwrap_or_default(),
                            name: String::new(),
                            icon: None,
                        });
                    }
                    b"programme" => {
                        state = ParserState::Programme;
                        current_programme = Some(PendingProgramme {
                            channel_id: get_attribute(e, b"channel").unwrap_or_default(),
                            start: get_attribute(e, b"start"),
                            stop: get_attribute(e, b"stop"),
                            title: String::new(),
                            description: None,
                            category: None,
                        });
                    }
                    b"title" if state == ParserState::Programme => {
                        state = ParserState::Title;
                        text_buf.clear();
                    }
                    b"desc" if state == ParserState::Programme => {
                        state = ParserState::Desc;
                        text_buf.clear();
                    }
                    b"category" if state == ParserState::Programme => {
                        state = ParserState::Category;
                        text_buf.clear();
                    }
                    b"display-name" if state == ParserState::Channel => {
                        state = ParserState::DisplayName;
                        text_buf.clear();
                    }
                    b"icon" if state == ParserState::Channel => {
                        if let (Some(src), Some(chan)) = (get_attribute(e, b"src"), current_channel.as_mut()) {
                            chan.icon = Some(src);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    if collects_text(state) {
                        let raw = String::from_utf8_lossy(e.as_ref());
                        text_buf.push_str(&decode_xml_entities(&raw));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    // Entity references arrive as their own events
                    if collects_text(state) {
                        let entity = format!("&{};", String::from_utf8_lossy(e.as_ref()));
                        text_buf.push_str(&decode_xml_entities(&entity));
                    }
                }
                Ok(Event::End(ref e)) => match e.name().as_ref() {
                    b"channel" => {
                        if let Some(channel) = current_channel.take() {
                            if !channel.id.is_empty() {
                                schedule.channels.insert(channel.id.clone(), channel);
                            }
                        }
                        state = ParserState::Root;
                    }
                    b"programme" => {
                        if let Some(pending) = current_programme.take() {
                            if !pending.channel_id.is_empty() {
                                match pending.finish() {
                                    Ok(event) => schedule
                                        .programmes
                                        .entry(event.channel_id.clone())
                                        .or_default()
                                        .push(event),
                                    Err(e) => {
                                        log::warn!("[EPG] Dropping programme: {}", e);
                                        schedule.dropped += 1;
                                    }
                                }
                            }
                        }
                        state = ParserState::Root;
                    }
                    b"title" if state == ParserState::Title => {
                        if let Some(prog) = current_programme.as_mut() {
                            prog.title = text_buf.trim().to_string();
                        }
                        state = ParserState::Programme;
                    }
                    b"desc" if state == ParserState::Desc => {
                        if let Some(prog) = current_programme.as_mut() {
                            prog.description = non_empty(&text_buf);
                        }
                        state = ParserState::Programme;
                    }
                    b"category" if state == ParserState::Category => {
                        if let Some(prog) = current_programme.as_mut() {
                            if prog.category.is_none() {
                                prog.category = non_empty(&text_buf);
                            }
                        }
                        state = ParserState::Programme;
                    }
                    b"display-name" if state == ParserState::DisplayName => {
                        if let Some(chan) = current_channel.as_mut() {
                            if chan.name.is_empty() {
                                chan.name = text_buf.trim().to_string();
                            }
                        }
                        state = ParserState::Channel;
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    schedule.error_count += 1;
                    let error = ParseError::Xml {
                        position,
                        message: e.to_string(),
                    };
                    log::debug!("[EPG] {}", error);
                    if schedule.errors.len() < MAX_STORED_ERRORS {
                        schedule.errors.push(error.to_string());
                    }
                    // Skip the malformed element
                    current_programme = None;
                    current_channel = None;
                    state = ParserState::Root;
                    text_buf.clear();
                    if xml_reader.buffer_position() == position {
                        break;
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        for programmes in schedule.programmes.values_mut() {
            programmes.sort_by_key(|p| p.start);
        }

        log::info!(
            "[EPG] Parsed {} programmes for {} channels ({} dropped, {} XML errors)",
            schedule.programme_count(),
            schedule.programmes.len(),
            schedule.dropped,
            schedule.error_count
        );
        schedule
    }
}

fn collects_text(state: ParserState) -> bool {
    matches!(
        state,
        ParserState::Title | ParserState::Desc | ParserState::Category | ParserState::DisplayName
    )
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// BufReader wrapper that filters out illegal XML 1.0 characters on read
/// and escapes bare ampersands, which real-world guides are full of
struct SanitizingBufReader<R> {
    inner: R,
    buffer: Vec<u8>,
    out_buffer: Vec<u8>,
    carry: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl<R: Read> SanitizingBufReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: vec![0u8; 64 * 1024],
            out_buffer: Vec::with_capacity(96 * 1024),
            carry: Vec::new(),
            pos: 0,
            filled: 0,
        }
    }

    fn sanitize_byte(b: u8) -> u8 {
        match b {
            0x09 | 0x0A | 0x0D => b,
            0x00..=0x1F | 0x7F => 0x20,
            _ => b,
        }
    }

    /// Refill `out_buffer` from the inner reader. An `&` too close to the
    /// end of a read to be judged is carried over to the next refill.
    fn refill_buffer(&mut self) -> std::io::Result<()> {
        self.out_buffer.clear();
        self.pos = 0;

        loop {
            let n = self.inner.read(&mut self.buffer)?;
            let mut input = std::mem::take(&mut self.carry);
            input.extend_from_slice(&self.buffer[..n]);

            let split = if n == 0 { input.len() } else { Self::unfinished_entity(&input) };
            self.carry = input.split_off(split);

            for i in 0..input.len() {
                let b = Self::sanitize_byte(input[i]);
                if b == b'&' && !Self::is_valid_entity_start(&input[i..]) {
                    self.out_buffer.extend_from_slice(b"&amp;");
                    continue;
                }
                self.out_buffer.push(b);
            }

            if n == 0 || !self.out_buffer.is_empty() {
                break;
            }
        }

        self.filled = self.out_buffer.len();
        Ok(())
    }

    /// Offset of a trailing `&...` that may still become an entity
    fn unfinished_entity(bytes: &[u8]) -> usize {
        let Some(start) = bytes.iter().rposition(|&b| b == b'&') else {
            return bytes.len();
        };
        let tail = &bytes[start + 1..];
        let open = tail.len() < 9 && tail.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'#');
        if open {
            start
        } else {
            bytes.len()
        }
    }

    /// Whether bytes starting with '&' look like `&name;` or `&#...;`
    fn is_valid_entity_start(bytes: &[u8]) -> bool {
        if bytes.len() < 2 {
            return false;
        }
        if bytes[1] == b'#' {
            return true;
        }
        let mut end = 1;
        while end < bytes.len() && end < 10 {
            match bytes[end] {
                b';' => return end > 1,
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => end += 1,
                _ => return false,
            }
        }
        false
    }
}

impl<R: Read> Read for SanitizingBufReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.filled {
            self.refill_buffer()?;
            if self.filled == 0 {
                return Ok(0);
            }
        }
        let to_copy = (self.filled - self.pos).min(buf.len());
        buf[..to_copy].copy_from_slice(&self.out_buffer[self.pos..self.pos + to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }
}

impl<R: Read> BufRead for SanitizingBufReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.refill_buffer()?;
        }
        Ok(&self.out_buffer[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

/// Decode XML entities back to normal characters
fn decode_xml_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut result = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");

    while let Some(start) = result.find("&#") {
        let Some(end) = result[start..].find(';') else { break };
        let entity = result[start..start + end + 1].to_string();
        let digits = &entity[2..entity.len() - 1];
        let code = match digits.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => digits.parse::<u32>().ok(),
        };
        match code.and_then(char::from_u32) {
            Some(c) => result = result.replace(&entity, &c.to_string()),
            None => break,
        }
    }

    // Last, so "&amp;lt;" stays "&lt;"
    result.replace("&amp;", "&")
}

fn get_attribute(e: &quick_xml::events::BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| decode_xml_entities(&String::from_utf8_lossy(attr.value.as_ref())))
}

/// Parse XMLTV time: "20240115120000 +0100". No offset means UTC.
pub fn parse_xmltv_time(time_str: &str) -> Result<DateTime<Utc>, ParseError> {
    let invalid = || ParseError::InvalidTimestamp(time_str.to_string());
    let trimmed = time_str.trim();

    let (datetime, offset) = match trimmed.split_once(' ') {
        Some((dt, tz)) => (dt, Some(tz.trim())),
        None if trimmed.len() > 14 && trimmed.is_char_boundary(14) => {
            (&trimmed[..14], Some(trimmed[14..].trim()))
        }
        None => (trimmed, None),
    };

    let naive = NaiveDateTime::parse_from_str(datetime, "%Y%m%d%H%M%S").map_err(|_| invalid())?;
    match offset.filter(|tz| !tz.is_empty()) {
        None => Ok(Utc.from_utc_datetime(&naive)),
        Some(tz) => {
            let seconds = parse_tz_offset(tz).ok_or_else(invalid)?;
            let offset = FixedOffset::east_opt(seconds).ok_or_else(invalid)?;
            offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(invalid)
        }
    }
}

/// "+0100" / "-0530" to seconds east of UTC
fn parse_tz_offset(tz: &str) -> Option<i32> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => (1, tz),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

/// Where schedules come from
pub trait ScheduleSource: Send + Sync {
    fn fetch(&self) -> Result<Schedule, NetworkError>;
}

pub struct HttpScheduleSource {
    url: String,
    user_agent: String,
    timeout: Duration,
}

impl HttpScheduleSource {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            user_agent: user_agent.to_string(),
            timeout,
        }
    }
}

impl ScheduleSource for HttpScheduleSource {
    fn fetch(&self) -> Result<Schedule, NetworkError> {
        log::info!("[EPG] Downloading {}", self.url);
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .new_agent();

        let response = agent.get(&self.url).header("User-Agent", &self.user_agent).call()?;
        ScheduleParser::parse_stream(response.into_body().into_reader())
    }
}

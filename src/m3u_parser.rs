//! M3U playlist parser with HTTPS download support
//!
//! Each URL line is bound to the `#EXTINF` line directly above it. When the
//! two groups don't line up the playlist is either rejected or padded with
//! placeholder names, depending on [`AlignmentPolicy`]; a name or logo is
//! never moved onto another channel's URL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{NetworkError, ParseError};
use crate::models::StreamType;

/// What to do when metadata lines and URL lines don't pair up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Reject the whole playlist
    #[default]
    Discard,
    /// Keep unnamed URLs under a placeholder label, drop orphan metadata
    PadNames,
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub default_logo: String,
    pub policy: AlignmentPolicy,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            default_logo: crate::config::DEFAULT_LOGO.to_string(),
            policy: AlignmentPolicy::Discard,
        }
    }
}

/// One channel as it appears in the playlist, before liveness filtering
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub label: String,
    pub url: String,
    pub logo_url: String,
    pub stream_type: StreamType,
    pub guide_id: Option<String>,
    pub group_title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedPlaylist {
    pub entries: Vec<PlaylistEntry>,
    /// From x-tvg-url / url-tvg in header
    pub guide_url: Option<String>,
}

/// Metadata collected from one `#EXTINF` line
#[derive(Debug, Default)]
struct Metadata {
    name: String,
    attrs: HashMap<String, String>,
    hint: Option<StreamType>,
}

/// Download playlist text (supports HTTP and HTTPS)
pub fn download_playlist(url: &str, user_agent: &str, timeout: Duration) -> Result<String, NetworkError> {
    let agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .new_agent();

    let mut response = agent
        .get(url)
        .header("User-Agent", user_agent)
        .call()?;

    if response.status() != 200 {
        return Err(NetworkError::Status(response.status().as_u16()));
    }

    response
        .body_mut()
        .read_to_string()
        .map_err(|e| NetworkError::Read(e.to_string()))
}

/// Parse playlist text into entries
pub fn parse_playlist(content: &str, options: &ParseOptions) -> Result<ParsedPlaylist, ParseError> {
    let mut playlist = ParsedPlaylist::default();

    // Check first line for guide URL
    if let Some(first_line) = content.lines().next() {
        let first_line = first_line.trim_start_matches('\u{feff}');
        if first_line.starts_with("#EXTM3U") {
            playlist.guide_url = extract_header_attr(first_line, "x-tvg-url")
                .or_else(|| extract_header_attr(first_line, "url-tvg"));
        }
    }

    let mut pending: Option<Metadata> = None;
    let mut pending_hint: Option<StreamType> = None;
    let mut pairs: Vec<(Option<Metadata>, &str, usize)> = Vec::new();
    let mut name_count = 0;
    let mut orphan_metadata = 0;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(info) = line.strip_prefix("#EXTINF:") {
            name_count += 1;
            if pending.is_some() {
                orphan_metadata += 1;
            }
            let mut meta = parse_extinf(info);
            meta.hint = pending_hint.take();
            pending = Some(meta);
        } else if let Some(hint) = extract_manifest_hint(line) {
            match pending.as_mut() {
                Some(meta) => meta.hint = Some(hint),
                None => pending_hint = Some(hint),
            }
        } else if !line.starts_with('#') {
            pairs.push((pending.take(), line, index + 1));
        }
    }
    if pending.is_some() {
        orphan_metadata += 1;
    }

    if pairs.is_empty() {
        return Err(ParseError::EmptyPlaylist);
    }

    if options.policy == AlignmentPolicy::Discard {
        if name_count != pairs.len() {
            log::warn!(
                "[M3U] Discarding playlist: {} names for {} urls",
                name_count,
                pairs.len()
            );
            return Err(ParseError::Misaligned { names: name_count, urls: pairs.len() });
        }
        if let Some((_, _, line)) = pairs.iter().find(|(meta, _, _)| meta.is_none()) {
            log::warn!("[M3U] Discarding playlist: url on line {} has no #EXTINF", line);
            return Err(ParseError::OrphanUrl { line: *line });
        }
    } else if orphan_metadata > 0 {
        log::warn!("[M3U] Dropped {} #EXTINF lines with no url", orphan_metadata);
    }

    for (position, (meta, url, line)) in pairs.into_iter().enumerate() {
        if !is_http_url(url) {
            log::debug!("[M3U] Skipping non-HTTP url on line {}: {}", line, url);
            continue;
        }

        let meta = match meta {
            Some(meta) => meta,
            None => {
                log::warn!("[M3U] Url on line {} has no #EXTINF - using placeholder name", line);
                Metadata::default()
            }
        };

        let label = if meta.name.is_empty() {
            format!("Channel {}", position + 1)
        } else {
            meta.name
        };
        let logo_url = meta
            .attrs
            .get("tvg-logo")
            .filter(|logo| !logo.is_empty())
            .cloned()
            .unwrap_or_else(|| options.default_logo.clone());

        playlist.entries.push(PlaylistEntry {
            label,
            url: url.to_string(),
            logo_url,
            // M3U entries are HLS unless the url or an explicit hint says otherwise
            stream_type: StreamType::resolve(url, Some(meta.hint.unwrap_or(StreamType::Hls))),
            guide_id: meta.attrs.get("tvg-id").filter(|id| !id.is_empty()).cloned(),
            group_title: meta.attrs.get("group-title").filter(|g| !g.is_empty()).cloned(),
        });
    }

    Ok(playlist)
}

fn is_http_url(line: &str) -> bool {
    let lower = line.get(..8).unwrap_or(line).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Extract attribute from #EXTM3U header line
fn extract_header_attr(line: &str, attr_name: &str) -> Option<String> {
    let search = format!("{}=\"", attr_name);
    let start = line.to_ascii_lowercase().find(&search)?;
    let rest = &line[start + search.len()..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// `#KODIPROP:inputstream.adaptive.manifest_type=mpd` or the VLC equivalent
fn extract_manifest_hint(line: &str) -> Option<StreamType> {
    let body = line
        .strip_prefix("#KODIPROP:")
        .or_else(|| line.strip_prefix("#EXTVLCOPT:"))?;
    let (key, value) = body.split_once('=')?;
    if key.trim().ends_with("manifest_type") {
        StreamType::from_hint(value)
    } else {
        None
    }
}

/// Split an EXTINF body into attributes and display name
fn parse_extinf(info: &str) -> Metadata {
    let body = info.trim_start_matches(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
    // Alternate layout: duration,attrs,name
    let body = match body.strip_prefix(',') {
        Some(after) if after.contains('=') && find_name_separator(after).is_some() => after,
        _ => body,
    };

    let (attr_part, name) = match find_name_separator(body) {
        Some(pos) => (&body[..pos], body[pos + 1..].trim()),
        None => (body, ""),
    };

    let mut meta = Metadata {
        name: name.to_string(),
        ..Default::default()
    };
    extract_attrs(attr_part, &mut meta.attrs);
    meta
}

/// First comma outside a quoted attribute value
fn find_name_separator(info: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in info.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    // Unbalanced quotes: fall back to the last comma
    info.rfind(',')
}

/// Extract `key="value"` and `key=value` pairs
fn extract_attrs(attr_part: &str, attrs: &mut HashMap<String, String>) {
    let mut chars = attr_part.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            chars.next();
            if c == '=' {
                break;
            }
            key.push(c);
        }
        // Stray quotes show up in real-world playlists ("tvg-name=...)
        let key = key.trim().trim_matches('"').to_lowercase();

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        if !key.is_empty() && !key.contains(char::is_whitespace) {
            attrs.insert(key, value);
        }
    }
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;

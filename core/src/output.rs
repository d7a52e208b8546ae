//! Pattern matching over captured process output.
//!
//! Two jobs: pull a conflicting TCP port out of error text (EADDRINUSE and
//! friends), and sniff server URLs out of startup logs. Both are pure
//! functions over arbitrary, possibly multi-line text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns that carry a conflicting port number, one per message family:
/// - `Port 3000 is already in use` (also "Ports ... are")
/// - `EADDRINUSE` messages with an address prefix (`:::3000`, `0.0.0.0:3000`,
///   `127.0.0.1:3000`, `localhost:3000`, or bare `:3000`)
/// - `address already in use: 3000`
/// - `:3000 (EADDRINUSE)`
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b\w+\s+(\d+)\s+(?:is|are)\s+already\s+in\s+use").unwrap(),
        Regex::new(r"(?i)EADDRINUSE[^\n]*:(\d+)").unwrap(),
        Regex::new(r"(?i)address\s+already\s+in\s+use\s*:\s*(\d+)").unwrap(),
        Regex::new(r"(?i):(\d+)\s*\(EADDRINUSE\)").unwrap(),
    ]
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\)\]]+"#).unwrap());

/// Extract a plausible conflicting port from process output.
///
/// All pattern families are matched over the whole text; when several ports
/// appear, the one earliest by position wins, regardless of which family
/// matched it. Candidates outside 1..=65535 are rejected.
pub fn extract_port(text: &str) -> Option<u16> {
    let mut best: Option<(usize, u16)> = None;

    for pattern in PORT_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let m = match caps.get(1) {
                Some(m) => m,
                None => continue,
            };
            let port = match m.as_str().parse::<u32>() {
                Ok(p) if (1..=65535).contains(&p) => p as u16,
                _ => continue,
            };
            if best.map_or(true, |(pos, _)| m.start() < pos) {
                best = Some((m.start(), port));
            }
        }
    }

    best.map(|(_, port)| port)
}

/// Permissive scan for `http://` / `https://` URLs in process output.
///
/// Returns URLs in order of first appearance, deduplicated, with trailing
/// punctuation stripped.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }

    urls
}

//! SAMI (.smi) parser
//!
//! `<SYNC Start=ms>` blocks; a cue ends where the next sync begins (or at
//! an `&nbsp;` clearing block).

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

static SYNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<sync\s+start\s*=\s*(\d+)[^>]*>").unwrap());

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

pub fn identify(head: &str) -> bool {
    let lower = head.to_lowercase();
    lower.contains("<sami") || lower.contains("<sync")
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    // Each sync's body runs until the next sync tag.
    let matches: Vec<(std::ops::Range<usize>, i64)> = SYNC_RE
        .captures_iter(input)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let start_ms: i64 = caps.get(1)?.as_str().parse().ok()?;
            Some((whole.range(), start_ms))
        })
        .collect();

    let mut raw: Vec<(i64, String)> = Vec::new();
    for (i, (range, start_ms)) in matches.iter().enumerate() {
        let body_end = matches
            .get(i + 1)
            .map(|(next_range, _)| next_range.start)
            .unwrap_or(input.len());
        let body = &input[range.end..body_end];
        let body = TAG_RE.replace_all(body, "\n");
        let text = STRIP_RE
            .replace_all(&body, "")
            .replace("&nbsp;", "")
            .trim()
            .to_string();
        raw.push((*start_ms, text));
    }
    if raw.is_empty() {
        return None;
    }

    let mut cues = Vec::new();
    for i in 0..raw.len() {
        let (start_ms, text) = &raw[i];
        if text.is_empty() {
            // A clearing sync only terminates the previous cue.
            continue;
        }
        // The next sync (clearing or not) ends this cue; the last cue gets
        // a nominal five seconds.
        let end_ms = raw.get(i + 1).map(|(next, _)| *next).unwrap_or(start_ms + 5_000);
        cues.push(Cue {
            index: cues.len() as u32 + 1,
            start_ms: *start_ms,
            end_ms,
            text: text.clone(),
        });
    }
    (!cues.is_empty()).then_some(cues)
}

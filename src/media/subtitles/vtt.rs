//! WebVTT parser and renderer

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

static TIMING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:(\d{1,2}):)?(\d{2}):(\d{2})\.(\d{3})\s*-->\s*(?:(\d{1,2}):)?(\d{2}):(\d{2})\.(\d{3})",
    )
    .unwrap()
});

pub fn identify(head: &str) -> bool {
    head.trim_start_matches('\u{feff}').trim_start().starts_with("WEBVTT")
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    let normalized = input.replace("\r\n", "\n");
    let body = normalized.trim_start_matches('\u{feff}');
    if !body.trim_start().starts_with("WEBVTT") {
        return None;
    }

    let mut cues = Vec::new();
    for block in body.split("\n\n") {
        let block = block.trim();
        if block.is_empty()
            || block.starts_with("WEBVTT")
            || block.starts_with("NOTE")
            || block.starts_with("STYLE")
            || block.starts_with("REGION")
        {
            continue;
        }
        let mut lines = block.lines();
        let first = lines.next()?;
        // Optional cue identifier line before the timing.
        let timing_line = if TIMING_RE.is_match(first) {
            first
        } else {
            match lines.next() {
                Some(line) if TIMING_RE.is_match(line) => line,
                _ => continue,
            }
        };
        let caps = TIMING_RE.captures(timing_line)?;
        let start_ms = timestamp_ms(&caps, 1);
        let end_ms = timestamp_ms(&caps, 5);
        let text = lines.collect::<Vec<_>>().join("\n");
        if text.is_empty() {
            continue;
        }
        cues.push(Cue { index: cues.len() as u32 + 1, start_ms, end_ms, text });
    }
    (!cues.is_empty()).then_some(cues)
}

pub fn render(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms),
            cue.text
        ));
    }
    out
}

fn timestamp_ms(caps: &regex::Captures<'_>, base: usize) -> i64 {
    let h: i64 = caps.get(base).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let m: i64 = caps[base + 1].parse().unwrap_or(0);
    let s: i64 = caps[base + 2].parse().unwrap_or(0);
    let ms: i64 = caps[base + 3].parse().unwrap_or(0);
    ((h * 60 + m) * 60 + s) * 1000 + ms
}

fn format_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_hours() {
        let input = "WEBVTT\n\n00:01.000 --> 00:02.500\nShort form\n\n01:00:01.000 --> 01:00:02.000\nLong form\n";
        let cues = parse(input).unwrap();
        assert_eq!(cues[0].start_ms, 1_000);
        assert_eq!(cues[0].end_ms, 2_500);
        assert_eq!(cues[1].start_ms, 3_601_000);
    }

    #[test]
    fn test_notes_and_styles_skipped() {
        let input = "WEBVTT\n\nNOTE a comment\n\nSTYLE\n::cue { color: red }\n\n00:01.000 --> 00:02.000\nReal cue\n";
        let cues = parse(input).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Real cue");
    }

    #[test]
    fn test_render_round_trip() {
        let cues = vec![Cue { index: 1, start_ms: 1_000, end_ms: 2_000, text: "Hi".into() }];
        let rendered = render(&cues);
        assert!(identify(&rendered));
        assert_eq!(parse(&rendered).unwrap(), cues);
    }
}

//! SubRip (.srt) parser and renderer

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

static TIMING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})",
    )
    .unwrap()
});

pub fn identify(head: &str) -> bool {
    // A bare counter line followed by an SRT timing arrow.
    let mut lines = head.lines().filter(|l| !l.trim().is_empty());
    matches!(
        (lines.next(), lines.next()),
        (Some(first), Some(second))
            if first.trim().parse::<u32>().is_ok() && TIMING_RE.is_match(second)
    )
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    let mut cues = Vec::new();
    // Blocks are separated by blank lines.
    for block in input.replace("\r\n", "\n").split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let first = lines.next()?;
        // The counter line is optional in sloppy files.
        let timing_line = if TIMING_RE.is_match(first) {
            first
        } else {
            lines.next()?
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
    let mut out = String::new();
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
    let h: i64 = caps[base].parse().unwrap_or(0);
    let m: i64 = caps[base + 1].parse().unwrap_or(0);
    let s: i64 = caps[base + 2].parse().unwrap_or(0);
    let ms: i64 = caps[base + 3].parse().unwrap_or(0);
    ((h * 60 + m) * 60 + s) * 1000 + ms
}

fn format_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    format!(
        "{:02}:{:02}:{:02},{:03}",
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
    fn test_parse_and_render_round_trip() {
        let input = "1\n00:00:01,500 --> 00:00:03,250\nHello\nWorld\n\n2\n00:01:00,000 --> 00:01:05,000\nBye\n";
        let cues = parse(input).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1_500);
        assert_eq!(cues[0].end_ms, 3_250);
        assert_eq!(cues[0].text, "Hello\nWorld");

        let rendered = render(&cues);
        assert_eq!(parse(&rendered).unwrap(), cues);
    }

    #[test]
    fn test_identify() {
        assert!(identify("1\n00:00:01,000 --> 00:00:02,000\nHi"));
        assert!(!identify("WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHi"));
    }

    #[test]
    fn test_counterless_blocks_accepted() {
        let input = "00:00:01,000 --> 00:00:02,000\nLoose block\n";
        let cues = parse(input).unwrap();
        assert_eq!(cues[0].text, "Loose block");
    }
}

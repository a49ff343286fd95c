//! ASS/SSA parser
//!
//! Reads `Dialogue:` events from Advanced SubStation files. Styling
//! override blocks (`{\...}`) are stripped; conversion targets are plain
//! text formats.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})[.:](\d{2})$").unwrap());

static OVERRIDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}").unwrap());

pub fn identify(head: &str) -> bool {
    let lower = head.to_lowercase();
    lower.contains("[script info]") || lower.contains("[v4+ styles]") || lower.contains("[events]")
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    let mut cues = Vec::new();
    // Field order comes from the Format: line in [Events]; default layout
    // puts Start/End at positions 1/2 and Text last.
    let mut text_field = 9usize;
    for line in input.lines() {
        let line = line.trim();
        if let Some(format_def) = line.strip_prefix("Format:") {
            let fields: Vec<&str> = format_def.split(',').map(str::trim).collect();
            if let Some(position) = fields.iter().position(|f| f.eq_ignore_ascii_case("Text")) {
                text_field = position;
            }
            continue;
        }
        let Some(event) = line.strip_prefix("Dialogue:") else {
            continue;
        };
        let fields: Vec<&str> = event.splitn(text_field + 1, ',').collect();
        if fields.len() < 3 {
            continue;
        }
        let (Some(start_ms), Some(end_ms)) =
            (parse_time(fields.get(1)?.trim()), parse_time(fields.get(2)?.trim()))
        else {
            continue;
        };
        let raw_text = fields.last().copied().unwrap_or_default();
        let text = OVERRIDE_RE
            .replace_all(raw_text, "")
            .replace("\\N", "\n")
            .replace("\\n", "\n")
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }
        cues.push(Cue { index: cues.len() as u32 + 1, start_ms, end_ms, text });
    }
    cues.sort_by_key(|c| c.start_ms);
    for (i, cue) in cues.iter_mut().enumerate() {
        cue.index = i as u32 + 1;
    }
    (!cues.is_empty()).then_some(cues)
}

/// `H:MM:SS.cc` centisecond timestamps.
fn parse_time(raw: &str) -> Option<i64> {
    let caps = TIME_RE.captures(raw)?;
    let h: i64 = caps[1].parse().ok()?;
    let m: i64 = caps[2].parse().ok()?;
    let s: i64 = caps[3].parse().ok()?;
    let cs: i64 = caps[4].parse().ok()?;
    Some(((h * 60 + m) * 60 + s) * 1000 + cs * 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASS: &str = r"[Script Info]
Title: Test

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
Dialogue: 0,0:00:01.50,0:00:03.00,Default,,0,0,0,,{\i1}Styled{\i0} line\NSecond row
Dialogue: 0,0:00:05.00,0:00:06.00,Default,,0,0,0,,Plain line
";

    #[test]
    fn test_parse_dialogue_events() {
        let cues = parse(ASS).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1_500);
        assert_eq!(cues[0].end_ms, 3_000);
        assert_eq!(cues[0].text, "Styled line\nSecond row");
    }

    #[test]
    fn test_identify() {
        assert!(identify("[Script Info]\nTitle: x"));
        assert!(!identify("1\n00:00:01,000 --> 00:00:02,000"));
    }
}

//! TTML parser
//!
//! Reads `<p begin="..." end="...">` paragraphs from Timed Text Markup
//! documents.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::Cue;

static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})(?:\.(\d{1,3}))?$").unwrap());

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\d.]+)(h|m|s|ms)$").unwrap());

pub fn identify(head: &str) -> bool {
    let lower = head.to_lowercase();
    lower.contains("<tt") && (lower.contains("ttml") || lower.contains("xmlns"))
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut cues: Vec<Cue> = Vec::new();
    let mut current: Option<(i64, i64, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"p" => {
                let mut begin = None;
                let mut end = None;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).to_string();
                    match attr.key.as_ref() {
                        b"begin" => begin = parse_time(&value),
                        b"end" => end = parse_time(&value),
                        _ => {}
                    }
                }
                if let (Some(begin), Some(end)) = (begin, end) {
                    current = Some((begin, end, String::new()));
                }
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"br" => {
                if let Some((_, _, text)) = current.as_mut() {
                    text.push('\n');
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some((_, _, text)) = current.as_mut() {
                    text.push_str(t.unescape().unwrap_or_default().trim());
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"p" => {
                if let Some((start_ms, end_ms, text)) = current.take() {
                    if !text.is_empty() {
                        cues.push(Cue {
                            index: cues.len() as u32 + 1,
                            start_ms,
                            end_ms,
                            text,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }
    (!cues.is_empty()).then_some(cues)
}

fn parse_time(raw: &str) -> Option<i64> {
    if let Some(caps) = CLOCK_RE.captures(raw) {
        let h: i64 = caps[1].parse().ok()?;
        let m: i64 = caps[2].parse().ok()?;
        let s: i64 = caps[3].parse().ok()?;
        let frac = caps
            .get(4)
            .map(|f| {
                let digits = f.as_str();
                let value: i64 = digits.parse().unwrap_or(0);
                value * 10i64.pow(3 - digits.len() as u32)
            })
            .unwrap_or(0);
        return Some(((h * 60 + m) * 60 + s) * 1000 + frac);
    }
    if let Some(caps) = OFFSET_RE.captures(raw) {
        let value: f64 = caps[1].parse().ok()?;
        let ms = match &caps[2] {
            "h" => value * 3_600_000.0,
            "m" => value * 60_000.0,
            "s" => value * 1000.0,
            _ => value,
        };
        return Some(ms as i64);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tt xmlns="http://www.w3.org/ns/ttml">
  <body>
    <div>
      <p begin="00:00:01.000" end="00:00:03.000">First<br/>cue</p>
      <p begin="4s" end="6.5s">Offset cue</p>
    </div>
  </body>
</tt>"#;

    #[test]
    fn test_parse_paragraphs() {
        let cues = parse(TTML).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1_000);
        assert_eq!(cues[0].text, "First\ncue");
        assert_eq!(cues[1].start_ms, 4_000);
        assert_eq!(cues[1].end_ms, 6_500);
    }

    #[test]
    fn test_identify() {
        assert!(identify(TTML));
        assert!(!identify("WEBVTT"));
    }
}

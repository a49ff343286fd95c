//! MicroDVD (.sub) parser
//!
//! Frame-based `{start}{end}Text` lines. With no fps declaration in the
//! file (a `{1}{1}fps` header), a 23.976 default applies.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Cue;

static LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{(\d+)\}\{(\d+)\}(.*)$").unwrap());

const DEFAULT_FPS: f64 = 23.976;

pub fn identify(head: &str) -> bool {
    head.lines()
        .filter(|l| !l.trim().is_empty())
        .take(3)
        .all(|l| LINE_RE.is_match(l.trim()))
        && head.lines().any(|l| !l.trim().is_empty())
}

pub fn parse(input: &str) -> Option<Vec<Cue>> {
    let mut fps = DEFAULT_FPS;
    let mut cues = Vec::new();

    for line in input.lines() {
        let line = line.trim();
        let Some(caps) = LINE_RE.captures(line) else {
            continue;
        };
        let start_frame: i64 = caps[1].parse().ok()?;
        let end_frame: i64 = caps[2].parse().ok()?;
        let text = caps[3].trim();

        // `{1}{1}25` declares the frame rate.
        if start_frame == 1 && end_frame == 1 {
            if let Ok(declared) = text.parse::<f64>() {
                if declared > 0.0 {
                    fps = declared;
                    continue;
                }
            }
        }
        if text.is_empty() {
            continue;
        }

        let text = text.replace('|', "\n");
        cues.push(Cue {
            index: cues.len() as u32 + 1,
            start_ms: (start_frame as f64 / fps * 1000.0) as i64,
            end_ms: (end_frame as f64 / fps * 1000.0) as i64,
            text,
        });
    }
    (!cues.is_empty()).then_some(cues)
}

//! Subtitle conversion
//!
//! Format conversion and time-window filtering over a registry of text
//! subtitle parsers. Image-based codecs (PGS/DVB/VOB/XSUB) cannot be
//! converted in text form and go through an out-of-process FFmpeg
//! extraction first.

pub mod ass;
pub mod extract;
pub mod smi;
pub mod srt;
pub mod sub;
pub mod ttml;
pub mod vtt;

use thiserror::Error;
use tracing::debug;

/// One timed cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub index: u32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("unknown subtitle format '{0}'")]
    UnknownFormat(String),
    #[error("input does not parse as any known subtitle format")]
    Unparsable,
    #[error("cannot render to '{0}'")]
    UnsupportedTarget(String),
    #[error("codec '{0}' requires ffmpeg extraction")]
    RequiresExtraction(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Text subtitle formats the registry understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Ass,
    Ttml,
    Smi,
    MicroDvd,
}

impl SubtitleFormat {
    /// Registry keys: `vtt|webvtt|srt|subrip|ass|ssa|ttml|smi|sub`.
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key.to_lowercase().as_str() {
            "vtt" | "webvtt" => SubtitleFormat::Vtt,
            "srt" | "subrip" => SubtitleFormat::Srt,
            "ass" | "ssa" => SubtitleFormat::Ass,
            "ttml" => SubtitleFormat::Ttml,
            "smi" => SubtitleFormat::Smi,
            "sub" => SubtitleFormat::MicroDvd,
            _ => return None,
        })
    }

    pub const ALL: [SubtitleFormat; 6] = [
        SubtitleFormat::Srt,
        SubtitleFormat::Vtt,
        SubtitleFormat::Ass,
        SubtitleFormat::Ttml,
        SubtitleFormat::Smi,
        SubtitleFormat::MicroDvd,
    ];

    /// Whether the first lines of `head` look like this format.
    pub fn identify(self, head: &str) -> bool {
        match self {
            SubtitleFormat::Srt => srt::identify(head),
            SubtitleFormat::Vtt => vtt::identify(head),
            SubtitleFormat::Ass => ass::identify(head),
            SubtitleFormat::Ttml => ttml::identify(head),
            SubtitleFormat::Smi => smi::identify(head),
            SubtitleFormat::MicroDvd => sub::identify(head),
        }
    }

    pub fn parse(self, input: &str) -> Option<Vec<Cue>> {
        match self {
            SubtitleFormat::Srt => srt::parse(input),
            SubtitleFormat::Vtt => vtt::parse(input),
            SubtitleFormat::Ass => ass::parse(input),
            SubtitleFormat::Ttml => ttml::parse(input),
            SubtitleFormat::Smi => smi::parse(input),
            SubtitleFormat::MicroDvd => sub::parse(input),
        }
    }

    pub fn render(self, cues: &[Cue]) -> Result<String, SubtitleError> {
        match self {
            SubtitleFormat::Srt => Ok(srt::render(cues)),
            SubtitleFormat::Vtt => Ok(vtt::render(cues)),
            other => Err(SubtitleError::UnsupportedTarget(format!("{other:?}"))),
        }
    }
}

/// Image-based subtitle codecs that need FFmpeg extraction before text
/// conversion.
pub fn requires_ffmpeg_extraction(codec: &str) -> bool {
    matches!(
        codec,
        "hdmv_pgs_subtitle" | "pgssub" | "dvb_subtitle" | "dvbsub" | "dvd_subtitle" | "dvdsub"
            | "xsub"
    )
}

/// .NET-style ticks (100 ns) to milliseconds.
fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / 10_000
}

/// Parse, optionally window, and re-render a subtitle stream.
///
/// The claimed `from` format is tried first; if it fails to self-identify
/// on the first lines (or fails to parse), every known format is tried.
/// With a time window, cues fully outside it are dropped, the rest shift
/// by `-start` (clamped at zero) and are renumbered; cues touching the
/// boundary are kept.
pub fn convert(
    input: &str,
    from: &str,
    to: &str,
    start_ticks: Option<i64>,
    end_ticks: Option<i64>,
) -> Result<String, SubtitleError> {
    let target =
        SubtitleFormat::from_key(to).ok_or_else(|| SubtitleError::UnknownFormat(to.to_string()))?;

    let cues = parse_with_fallback(input, from)?;
    let cues = match (start_ticks, end_ticks) {
        (None, None) => cues,
        (start, end) => apply_window(
            cues,
            start.map(ticks_to_ms).unwrap_or(0),
            end.map(ticks_to_ms),
        ),
    };

    target.render(&cues)
}

fn parse_with_fallback(input: &str, from: &str) -> Result<Vec<Cue>, SubtitleError> {
    let head: String = input.lines().take(10).collect::<Vec<_>>().join("\n");

    if let Some(claimed) = SubtitleFormat::from_key(from) {
        if claimed.identify(&head) {
            if let Some(cues) = claimed.parse(input) {
                return Ok(cues);
            }
        }
        debug!(claimed = from, "Claimed format failed to self-identify; trying all formats");
    }

    for format in SubtitleFormat::ALL {
        if format.identify(&head) {
            if let Some(cues) = format.parse(input) {
                return Ok(cues);
            }
        }
    }
    Err(SubtitleError::Unparsable)
}

/// Window filter: keep cues overlapping `[start_ms, end_ms]`, shift left by
/// `start_ms`, clamp into `[0, end_ms - start_ms]`, renumber from 1.
fn apply_window(cues: Vec<Cue>, start_ms: i64, end_ms: Option<i64>) -> Vec<Cue> {
    let width = end_ms.map(|end| end - start_ms);
    cues.into_iter()
        .filter(|cue| {
            let after_start = cue.end_ms >= start_ms;
            let before_end = end_ms.is_none_or(|end| cue.start_ms <= end);
            after_start && before_end
        })
        .enumerate()
        .map(|(i, cue)| {
            let mut shifted_end = (cue.end_ms - start_ms).max(0);
            if let Some(width) = width {
                // A cue running past the window's end is truncated at it.
                shifted_end = shifted_end.min(width);
            }
            Cue {
                index: i as u32 + 1,
                start_ms: (cue.start_ms - start_ms).max(0),
                end_ms: shifted_end,
                text: cue.text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:03,000\nFirst line\n\n2\n00:00:10,000 --> 00:00:12,000\nSecond line\n\n3\n00:01:00,000 --> 00:01:02,000\nThird line\n";

    #[test]
    fn test_convert_srt_to_vtt() {
        let out = convert(SRT, "srt", "vtt", None, None).unwrap();
        assert!(out.starts_with("WEBVTT"));
        assert!(out.contains("00:00:01.000 --> 00:00:03.000"));
        assert!(out.contains("First line"));
    }

    #[test]
    fn test_window_drops_shifts_and_renumbers() {
        // Window [10s, 61s]: drops the first cue, keeps the second and the
        // boundary-touching third, shifts both left by 10s.
        let out = convert(
            SRT,
            "srt",
            "srt",
            Some(10 * 10_000_000),
            Some(61 * 10_000_000),
        )
        .unwrap();
        let cues = srt::parse(&out).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[0].start_ms, 0);
        assert_eq!(cues[0].end_ms, 2_000);
        // The boundary cue ran to 62s; its shifted end is truncated at the
        // 51s window width so every cue lies within [0, end - start].
        assert_eq!(cues[1].start_ms, 50_000);
        assert_eq!(cues[1].end_ms, 51_000);
    }

    #[test]
    fn test_window_clamps_negative_starts() {
        // Window starting mid-cue clamps its shifted start to zero.
        let out = convert(SRT, "srt", "srt", Some(2 * 10_000_000), None).unwrap();
        let cues = srt::parse(&out).unwrap();
        assert_eq!(cues[0].start_ms, 0);
        assert_eq!(cues[0].end_ms, 1_000);
    }

    #[test]
    fn test_wrong_claimed_format_falls_back() {
        // Claimed vtt but actually srt: the registry self-identifies.
        let out = convert(SRT, "vtt", "vtt", None, None).unwrap();
        assert!(out.contains("First line"));
    }

    #[test]
    fn test_unparsable_input_errors() {
        assert!(matches!(
            convert("complete nonsense", "srt", "vtt", None, None),
            Err(SubtitleError::Unparsable)
        ));
    }

    #[test]
    fn test_image_codecs_flagged_for_extraction() {
        assert!(requires_ffmpeg_extraction("hdmv_pgs_subtitle"));
        assert!(requires_ffmpeg_extraction("dvd_subtitle"));
        assert!(requires_ffmpeg_extraction("xsub"));
        assert!(!requires_ffmpeg_extraction("subrip"));
    }
}

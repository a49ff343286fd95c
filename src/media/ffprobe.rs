//! FFprobe-based media analysis
//!
//! Uses ffprobe (command-line) to extract container, stream, chapter and
//! keyframe information. The JSON output format is stable and
//! well-documented, which makes this more reliable than library bindings.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::model::{HdrType, MediaPart, MediaStream, StreamType};

/// Complete analysis result for one file.
#[derive(Debug, Clone)]
pub struct MediaAnalysis {
    pub container_format: Option<String>,
    pub duration_ms: Option<i64>,
    pub bitrate: Option<i64>,
    pub size_bytes: Option<i64>,
    pub streams: Vec<MediaStream>,
    /// Container-level tags (title, artist, ...).
    pub tags: HashMap<String, String>,
}

/// FFprobe JSON output structures
mod ffprobe_json {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct Output {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: i32,
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
        pub profile: Option<String>,
        pub level: Option<i32>,

        // Video
        pub width: Option<i32>,
        pub height: Option<i32>,
        pub pix_fmt: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub color_transfer: Option<String>,
        pub color_primaries: Option<String>,
        pub bits_per_raw_sample: Option<String>,

        // Audio
        pub channels: Option<i32>,
        pub sample_rate: Option<String>,

        pub bit_rate: Option<String>,
        pub disposition: Option<Disposition>,
        pub tags: Option<HashMap<String, String>>,
        pub side_data_list: Option<Vec<SideData>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Disposition {
        pub default: Option<i32>,
        pub forced: Option<i32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub side_data_type: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct PacketsOutput {
        pub packets: Option<Vec<Packet>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Packet {
        pub pts_time: Option<String>,
        pub flags: Option<String>,
    }
}

/// FFprobe analysis service.
#[derive(Clone)]
pub struct FfprobeService {
    ffprobe_path: String,
}

impl Default for FfprobeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FfprobeService {
    pub fn new() -> Self {
        Self { ffprobe_path: "ffprobe".to_string() }
    }

    pub fn with_path(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Analyze a media file and extract stream information.
    pub async fn analyze(&self, path: &Path) -> Result<MediaAnalysis> {
        debug!(path = %path.display(), "Analyzing media file with ffprobe");

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffprobe failed for '{}': {}", path.display(), stderr.trim());
        }

        let parsed: ffprobe_json::Output =
            serde_json::from_slice(&output.stdout).context("Parse ffprobe JSON")?;

        let format = parsed.format;
        let container_format = format
            .as_ref()
            .and_then(|f| f.format_name.as_ref())
            .map(|n| normalize_container(n));
        let duration_ms = format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0) as i64);
        let bitrate = format
            .as_ref()
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse().ok());
        let size_bytes = format
            .as_ref()
            .and_then(|f| f.size.as_deref())
            .and_then(|s| s.parse().ok());
        let tags = format.and_then(|f| f.tags).unwrap_or_default();

        let placeholder_part = Uuid::nil();
        let streams = parsed
            .streams
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| convert_stream(placeholder_part, s))
            .collect();

        Ok(MediaAnalysis { container_format, duration_ms, bitrate, size_bytes, streams, tags })
    }

    /// Fill a media part's streams, duration and container from disk.
    pub async fn analyze_part(&self, part: &mut MediaPart) -> Result<()> {
        let analysis = self.analyze(Path::new(&part.file_path)).await?;
        part.duration_ms = analysis.duration_ms;
        if part.container.is_none() {
            part.container = analysis.container_format;
        }
        part.streams = analysis
            .streams
            .into_iter()
            .map(|mut s| {
                s.media_part_id = part.id;
                s
            })
            .collect();
        Ok(())
    }

    /// Keyframe timestamps (ms) of the first video stream, ascending.
    /// Drives GoP-aligned seek reloads.
    pub async fn keyframes_ms(&self, path: &Path) -> Result<Vec<i64>> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .args(["-show_packets"])
            .args(["-show_entries", "packet=pts_time,flags"])
            .args(["-print_format", "json"])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffprobe keyframe scan failed for '{}': {}", path.display(), stderr.trim());
        }

        let parsed: ffprobe_json::PacketsOutput =
            serde_json::from_slice(&output.stdout).context("Parse ffprobe packets JSON")?;

        let mut keyframes: Vec<i64> = parsed
            .packets
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.flags.as_deref().is_some_and(|f| f.contains('K')))
            .filter_map(|p| p.pts_time.as_deref().and_then(|t| t.parse::<f64>().ok()))
            .map(|secs| (secs * 1000.0) as i64)
            .collect();
        keyframes.sort_unstable();
        keyframes.dedup();
        Ok(keyframes)
    }
}

/// ffprobe reports matroska as "matroska,webm" and mp4 as a long list;
/// collapse to the canonical short name.
fn normalize_container(format_name: &str) -> String {
    let first = format_name.split(',').next().unwrap_or(format_name);
    match first {
        "matroska" => "mkv".to_string(),
        "mov" => "mp4".to_string(),
        other => other.to_string(),
    }
}

fn convert_stream(part_id: Uuid, s: ffprobe_json::Stream) -> Option<MediaStream> {
    let stream_type = match s.codec_type.as_deref() {
        Some("video") => StreamType::Video,
        Some("audio") => StreamType::Audio,
        Some("subtitle") => StreamType::Subtitle,
        _ => return None,
    };
    let codec = s.codec_name.clone()?;

    let mut stream = MediaStream::new(part_id, s.index, stream_type, codec);
    stream.profile = s.profile;
    stream.level = s.level.filter(|l| *l > 0);
    stream.width = s.width;
    stream.height = s.height;
    stream.channels = s.channels;
    stream.sample_rate = s.sample_rate.as_deref().and_then(|r| r.parse().ok());
    stream.bitrate = s.bit_rate.as_deref().and_then(|b| b.parse().ok());
    stream.frame_rate = s.avg_frame_rate.as_deref().and_then(parse_frame_rate);
    stream.bit_depth = s
        .bits_per_raw_sample
        .as_deref()
        .and_then(|b| b.parse().ok())
        .or_else(|| bit_depth_from_pix_fmt(s.pix_fmt.as_deref()));
    if let Some(d) = &s.disposition {
        stream.is_default = d.default.unwrap_or(0) != 0;
        stream.is_forced = d.forced.unwrap_or(0) != 0;
    }
    if let Some(tags) = &s.tags {
        stream.language = tags.get("language").cloned();
        stream.title = tags.get("title").cloned();
    }
    if stream_type == StreamType::Video {
        stream.hdr_type = detect_hdr(
            s.color_transfer.as_deref(),
            s.color_primaries.as_deref(),
            s.side_data_list.as_deref(),
        );
    }
    Some(stream)
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.parse().ok()
}

fn bit_depth_from_pix_fmt(pix_fmt: Option<&str>) -> Option<i32> {
    let fmt = pix_fmt?;
    if fmt.contains("12le") || fmt.contains("12be") {
        Some(12)
    } else if fmt.contains("10le") || fmt.contains("10be") {
        Some(10)
    } else {
        Some(8)
    }
}

fn detect_hdr(
    transfer: Option<&str>,
    primaries: Option<&str>,
    side_data: Option<&[ffprobe_json::SideData]>,
) -> Option<HdrType> {
    let side_types: Vec<&str> = side_data
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.side_data_type.as_deref())
        .collect();

    if side_types.iter().any(|t| t.contains("DOVI")) {
        return Some(HdrType::DolbyVision);
    }
    match transfer {
        Some("smpte2084") => {
            if side_types.iter().any(|t| t.contains("HDR10+") || t.contains("Dynamic HDR")) {
                Some(HdrType::Hdr10Plus)
            } else {
                Some(HdrType::Hdr10)
            }
        }
        Some("arib-std-b67") => Some(HdrType::Hlg),
        _ => {
            if primaries == Some("bt2020") && transfer == Some("smpte2084") {
                Some(HdrType::Hdr10)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_container() {
        assert_eq!(normalize_container("matroska,webm"), "mkv");
        assert_eq!(normalize_container("mov,mp4,m4a,3gp,3g2,mj2"), "mp4");
        assert_eq!(normalize_container("avi"), "avi");
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(24000.0 / 1001.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn test_bit_depth_from_pix_fmt() {
        assert_eq!(bit_depth_from_pix_fmt(Some("yuv420p10le")), Some(10));
        assert_eq!(bit_depth_from_pix_fmt(Some("yuv420p")), Some(8));
        assert_eq!(bit_depth_from_pix_fmt(None), None);
    }

    #[test]
    fn test_detect_hdr() {
        assert_eq!(detect_hdr(Some("smpte2084"), Some("bt2020"), None), Some(HdrType::Hdr10));
        assert_eq!(detect_hdr(Some("arib-std-b67"), None, None), Some(HdrType::Hlg));
        assert_eq!(detect_hdr(Some("bt709"), Some("bt709"), None), None);
    }

    #[test]
    fn test_stream_conversion_reads_disposition_and_tags() {
        let raw = r#"{
            "index": 1,
            "codec_name": "aac",
            "codec_type": "audio",
            "channels": 6,
            "sample_rate": "48000",
            "bit_rate": "384000",
            "disposition": {"default": 1, "forced": 0},
            "tags": {"language": "eng", "title": "Surround"}
        }"#;
        let parsed: ffprobe_json::Stream = serde_json::from_str(raw).unwrap();
        let stream = convert_stream(Uuid::nil(), parsed).unwrap();
        assert_eq!(stream.stream_type, StreamType::Audio);
        assert_eq!(stream.channels, Some(6));
        assert_eq!(stream.sample_rate, Some(48_000));
        assert!(stream.is_default);
        assert_eq!(stream.language.as_deref(), Some("eng"));
    }
}
